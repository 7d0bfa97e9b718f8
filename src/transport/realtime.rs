//! Realtime channel selection and supervision.
//!
//! `connect_with_fallback` opens the first channel that works, in
//! `ChannelKind` order, and hands it to a supervisor task that feeds events to
//! the caller's handler. If an open channel fails mid-stream, an `error` event
//! is emitted and the supervisor degrades to the next kind. Polling is the
//! last resort and keeps going through failed polls.
//!
//! The returned `RealtimeConnection` owns the supervisor. Closing it (or
//! dropping it) releases whichever channel is active.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{PlaygroundError, PlaygroundResult};
use crate::event::StreamEvent;
use crate::ids::SimulationId;

use super::EventHandler;

/// The three interchangeable realtime transports, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKind {
    /// Persistent socket.
    WebSocket,
    /// Server-push stream.
    ServerSentEvents,
    /// Fixed-interval status polling.
    Polling,
}

impl ChannelKind {
    /// The next kind to try after this one fails.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::WebSocket => Some(Self::ServerSentEvents),
            Self::ServerSentEvents => Some(Self::Polling),
            Self::Polling => None,
        }
    }

    /// Lower-case name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WebSocket => "websocket",
            Self::ServerSentEvents => "sse",
            Self::Polling => "polling",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform capability of an open realtime channel.
#[async_trait]
pub trait Channel: Send {
    /// Which transport this is.
    fn kind(&self) -> ChannelKind;

    /// Wait for the next event.
    ///
    /// `None` means the channel ended. Transport errors mean the channel is
    /// no longer usable; validation errors concern a single message only.
    async fn next_event(&mut self) -> Option<PlaygroundResult<StreamEvent>>;

    /// Release the channel's resources. Must be safe to call more than once.
    async fn close(&mut self);
}

/// Opens channels of a given kind for a simulation.
#[async_trait]
pub trait ChannelOpener: Send + Sync {
    /// Open a channel, or fail so the caller can try the next kind.
    async fn open(&self, kind: ChannelKind, simulation_id: &SimulationId) -> PlaygroundResult<Box<dyn Channel>>;
}

/// Handle to an active realtime subscription.
///
/// Holds exactly one channel at a time. `close` is idempotent and
/// non-blocking; dropping the handle closes it.
pub struct RealtimeConnection {
    simulation_id: SimulationId,
    kind: watch::Receiver<ChannelKind>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    closed: AtomicBool,
    task: JoinHandle<()>,
}

impl fmt::Debug for RealtimeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeConnection")
            .field("simulation_id", &self.simulation_id)
            .field("kind", &*self.kind.borrow())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RealtimeConnection {
    /// Simulation this connection is keyed by.
    #[must_use]
    pub const fn simulation_id(&self) -> &SimulationId {
        &self.simulation_id
    }

    /// The currently active channel kind.
    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        *self.kind.borrow()
    }

    /// Watch the active channel kind as the supervisor degrades.
    #[must_use]
    pub fn watch_kind(&self) -> watch::Receiver<ChannelKind> {
        self.kind.clone()
    }

    /// Returns true once `close` was called or the handle is dropping.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns true once the supervisor task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the supervisor to close the active channel.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let sender = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = sender {
            // The supervisor may already have exited after a `complete` event.
            let _ = tx.send(());
        }
        debug!(simulation_id = %self.simulation_id, "realtime connection closed");
    }
}

impl Drop for RealtimeConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Open the first working channel and start supervising it.
///
/// # Errors
///
/// Fails only if no kind, polling included, could be opened.
pub async fn connect_with_fallback(
    opener: Arc<dyn ChannelOpener>,
    simulation_id: &SimulationId,
    on_event: EventHandler,
) -> PlaygroundResult<RealtimeConnection> {
    let channel = open_from(opener.as_ref(), ChannelKind::WebSocket, simulation_id).await?;
    debug!(simulation_id = %simulation_id, kind = %channel.kind(), "realtime channel selected");

    let (kind_tx, kind_rx) = watch::channel(channel.kind());
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(supervise(
        opener,
        simulation_id.clone(),
        channel,
        on_event,
        kind_tx,
        shutdown_rx,
    ));

    Ok(RealtimeConnection {
        simulation_id: simulation_id.clone(),
        kind: kind_rx,
        shutdown: Mutex::new(Some(shutdown_tx)),
        closed: AtomicBool::new(false),
        task,
    })
}

async fn open_from(
    opener: &dyn ChannelOpener,
    first: ChannelKind,
    simulation_id: &SimulationId,
) -> PlaygroundResult<Box<dyn Channel>> {
    let mut kind = first;
    loop {
        match opener.open(kind, simulation_id).await {
            Ok(channel) => return Ok(channel),
            Err(err) => {
                let Some(next) = kind.next() else {
                    return Err(err);
                };
                warn!(simulation_id = %simulation_id, failed = %kind, next = %next, error = %err, "realtime channel unavailable, falling back");
                kind = next;
            }
        }
    }
}

async fn supervise(
    opener: Arc<dyn ChannelOpener>,
    simulation_id: SimulationId,
    mut channel: Box<dyn Channel>,
    on_event: EventHandler,
    kind_tx: watch::Sender<ChannelKind>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        // Either an explicit close or the handle being dropped.
        let next = tokio::select! {
            _ = &mut shutdown => None,
            item = channel.next_event() => Some(item),
        };
        let Some(item) = next else {
            channel.close().await;
            return;
        };

        match item {
            Some(Ok(event)) => {
                let done = event.is_complete();
                on_event(event);
                if done {
                    channel.close().await;
                    return;
                }
            }
            Some(Err(err @ PlaygroundError::Validation(_))) => {
                on_event(StreamEvent::error(err.to_string()));
            }
            Some(Err(err)) => {
                on_event(StreamEvent::error(err.to_string()));

                let failed = channel.kind();
                let Some(next) = failed.next() else {
                    // Polling keeps trying on the next tick.
                    continue;
                };
                channel.close().await;
                warn!(simulation_id = %simulation_id, failed = %failed, next = %next, error = %err, "realtime channel failed, degrading");

                channel = match open_from(opener.as_ref(), next, &simulation_id).await {
                    Ok(channel) => channel,
                    Err(err) => {
                        on_event(StreamEvent::error(err.to_string()));
                        return;
                    }
                };
                kind_tx.send_replace(channel.kind());
            }
            None => {
                debug!(simulation_id = %simulation_id, kind = %channel.kind(), "realtime channel ended");
                channel.close().await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::{HashSet, VecDeque};
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::error::{TransportError, ValidationError};
    use crate::event::{PipelineStepUpdate, StreamEventKind};

    /// Replays a fixed list of results, then pends forever.
    struct ListChannel {
        kind: ChannelKind,
        items: VecDeque<PlaygroundResult<StreamEvent>>,
        closes: Arc<Mutex<Vec<ChannelKind>>>,
    }

    #[async_trait]
    impl Channel for ListChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn next_event(&mut self) -> Option<PlaygroundResult<StreamEvent>> {
            match self.items.pop_front() {
                Some(item) => Some(item),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {
            self.closes.lock().unwrap().push(self.kind);
        }
    }

    #[derive(Default)]
    struct FakeOpener {
        unavailable: HashSet<ChannelKind>,
        scripts: Mutex<Vec<(ChannelKind, Vec<PlaygroundResult<StreamEvent>>)>>,
        opened: Mutex<Vec<ChannelKind>>,
        closes: Arc<Mutex<Vec<ChannelKind>>>,
    }

    impl FakeOpener {
        fn script(self, kind: ChannelKind, items: Vec<PlaygroundResult<StreamEvent>>) -> Self {
            self.scripts.lock().unwrap().push((kind, items));
            self
        }

        fn unavailable(mut self, kind: ChannelKind) -> Self {
            self.unavailable.insert(kind);
            self
        }
    }

    #[async_trait]
    impl ChannelOpener for FakeOpener {
        async fn open(&self, kind: ChannelKind, _id: &SimulationId) -> PlaygroundResult<Box<dyn Channel>> {
            if self.unavailable.contains(&kind) {
                return Err(TransportError::ConnectionFailed {
                    message: format!("{kind} refused"),
                }
                .into());
            }
            self.opened.lock().unwrap().push(kind);
            let mut scripts = self.scripts.lock().unwrap();
            let pos = scripts.iter().position(|(k, _)| *k == kind);
            let items = pos.map(|pos| scripts.remove(pos).1).unwrap_or_default();
            Ok(Box::new(ListChannel {
                kind,
                items: items.into(),
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    fn collector() -> (EventHandler, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: EventHandler = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        (handler, rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> StreamEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("handler dropped")
    }

    fn step(index: usize) -> PlaygroundResult<StreamEvent> {
        Ok(StreamEvent::now(StreamEventKind::PipelineUpdate {
            steps: vec![PipelineStepUpdate::completed(index)],
        }))
    }

    fn transport_failure() -> PlaygroundResult<StreamEvent> {
        Err(TransportError::ChannelClosed {
            reason: "reset by peer".to_string(),
        }
        .into())
    }

    #[tokio::test]
    async fn prefers_websocket_when_available() {
        let opener = Arc::new(FakeOpener::default());
        let (handler, _rx) = collector();
        let conn = connect_with_fallback(opener.clone(), &SimulationId::new("s"), handler)
            .await
            .unwrap();
        assert_eq!(conn.kind(), ChannelKind::WebSocket);
        assert_eq!(*opener.opened.lock().unwrap(), vec![ChannelKind::WebSocket]);
    }

    #[tokio::test]
    async fn falls_back_in_order_at_connect_time() {
        let opener = Arc::new(
            FakeOpener::default()
                .unavailable(ChannelKind::WebSocket)
                .unavailable(ChannelKind::ServerSentEvents),
        );
        let (handler, _rx) = collector();
        let conn = connect_with_fallback(opener.clone(), &SimulationId::new("s"), handler)
            .await
            .unwrap();
        assert_eq!(conn.kind(), ChannelKind::Polling);
        assert_eq!(*opener.opened.lock().unwrap(), vec![ChannelKind::Polling]);
    }

    #[tokio::test]
    async fn fails_when_nothing_opens() {
        let opener = Arc::new(
            FakeOpener::default()
                .unavailable(ChannelKind::WebSocket)
                .unavailable(ChannelKind::ServerSentEvents)
                .unavailable(ChannelKind::Polling),
        );
        let (handler, _rx) = collector();
        let err = connect_with_fallback(opener, &SimulationId::new("s"), handler)
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn mid_stream_failure_emits_error_and_degrades() {
        let opener = Arc::new(
            FakeOpener::default()
                .script(ChannelKind::WebSocket, vec![step(0), transport_failure()])
                .script(ChannelKind::ServerSentEvents, vec![step(1)]),
        );
        let (handler, mut rx) = collector();
        let conn = connect_with_fallback(opener.clone(), &SimulationId::new("s"), handler)
            .await
            .unwrap();
        let mut kind = conn.watch_kind();

        assert!(matches!(recv(&mut rx).await.kind, StreamEventKind::PipelineUpdate { .. }));
        assert!(matches!(recv(&mut rx).await.kind, StreamEventKind::Error { .. }));
        assert!(matches!(recv(&mut rx).await.kind, StreamEventKind::PipelineUpdate { .. }));

        kind.wait_for(|k| *k == ChannelKind::ServerSentEvents).await.unwrap();
        assert_eq!(*opener.closes.lock().unwrap(), vec![ChannelKind::WebSocket]);
    }

    #[tokio::test]
    async fn malformed_message_does_not_degrade() {
        let malformed = Err(ValidationError::MalformedEvent {
            event_type: "metric_update".to_string(),
            reason: "expected object".to_string(),
        }
        .into());
        let opener = Arc::new(FakeOpener::default().script(ChannelKind::WebSocket, vec![malformed, step(2)]));
        let (handler, mut rx) = collector();
        let conn = connect_with_fallback(opener.clone(), &SimulationId::new("s"), handler)
            .await
            .unwrap();

        assert!(matches!(recv(&mut rx).await.kind, StreamEventKind::Error { .. }));
        assert!(matches!(recv(&mut rx).await.kind, StreamEventKind::PipelineUpdate { .. }));
        assert_eq!(conn.kind(), ChannelKind::WebSocket);
        assert_eq!(opener.opened.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn polling_failures_keep_polling() {
        let opener = Arc::new(
            FakeOpener::default()
                .unavailable(ChannelKind::WebSocket)
                .unavailable(ChannelKind::ServerSentEvents)
                .script(ChannelKind::Polling, vec![transport_failure(), step(0)]),
        );
        let (handler, mut rx) = collector();
        let conn = connect_with_fallback(opener, &SimulationId::new("s"), handler)
            .await
            .unwrap();

        assert!(matches!(recv(&mut rx).await.kind, StreamEventKind::Error { .. }));
        assert!(matches!(recv(&mut rx).await.kind, StreamEventKind::PipelineUpdate { .. }));
        assert_eq!(conn.kind(), ChannelKind::Polling);
        assert!(!conn.is_finished());
    }

    #[tokio::test]
    async fn complete_event_ends_supervision() {
        let complete = Ok(StreamEvent::now(StreamEventKind::Complete {
            metrics: serde_json::Map::new(),
        }));
        let opener = Arc::new(FakeOpener::default().script(ChannelKind::WebSocket, vec![complete]));
        let (handler, mut rx) = collector();
        let conn = connect_with_fallback(opener.clone(), &SimulationId::new("s"), handler)
            .await
            .unwrap();

        assert!(recv(&mut rx).await.is_complete());
        tokio::time::timeout(Duration::from_secs(2), async {
            while !conn.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*opener.closes.lock().unwrap(), vec![ChannelKind::WebSocket]);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_releases_channel() {
        let opener = Arc::new(FakeOpener::default());
        let (handler, _rx) = collector();
        let conn = connect_with_fallback(opener.clone(), &SimulationId::new("s"), handler)
            .await
            .unwrap();

        conn.close();
        conn.close();
        assert!(conn.is_closed());

        tokio::time::timeout(Duration::from_secs(2), async {
            while !conn.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        drop(conn);
        assert_eq!(*opener.closes.lock().unwrap(), vec![ChannelKind::WebSocket]);
    }
}
