//! Polling channel: fetches the status endpoint on a fixed interval.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval, Interval, MissedTickBehavior};
use url::Url;

use crate::error::{PlaygroundResult, TransportError};
use crate::event::{StatusResponse, StreamEvent, WireEnvelope};

use super::realtime::{Channel, ChannelKind};

/// Realtime channel that polls `GET /api/interactive/status/{id}`.
///
/// The first poll happens immediately. A failed poll is reported as a
/// transport error; the next call to `next_event` polls again on schedule.
#[derive(Debug)]
pub struct PollingChannel {
    client: reqwest::Client,
    url: Url,
    ticker: Interval,
    queue: VecDeque<WireEnvelope>,
    closed: bool,
}

impl PollingChannel {
    /// Poll `url` every `period`.
    #[must_use]
    pub fn new(client: reqwest::Client, url: Url, period: Duration) -> Self {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            client,
            url,
            ticker,
            queue: VecDeque::new(),
            closed: false,
        }
    }

    async fn poll_once(&self) -> PlaygroundResult<Vec<WireEnvelope>> {
        let resp = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                code: status.as_u16(),
                endpoint: self.url.path().to_string(),
            }
            .into());
        }

        let body: StatusResponse = resp.json().await.map_err(TransportError::from)?;
        Ok(body.updates)
    }
}

#[async_trait]
impl Channel for PollingChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Polling
    }

    async fn next_event(&mut self) -> Option<PlaygroundResult<StreamEvent>> {
        loop {
            if self.closed {
                return None;
            }
            while let Some(envelope) = self.queue.pop_front() {
                match StreamEvent::from_envelope(envelope) {
                    Ok(Some(event)) => return Some(Ok(event)),
                    Ok(None) => {}
                    Err(err) => return Some(Err(err.into())),
                }
            }

            self.ticker.tick().await;
            match self.poll_once().await {
                Ok(updates) => self.queue.extend(updates),
                Err(err) => return Some(Err(err)),
            }
        }
    }

    async fn close(&mut self) {
        self.closed = true;
        self.queue.clear();
    }
}
