//! Terminal walkthrough of one guided simulation.
//!
//! Walks the four phases against the backend (or the offline mock), printing
//! each phase view as it goes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use playground_sim::views::{DecisionItem, PipelineItem};
use playground_sim::{
    BriefView, ClientConfig, DecisionPanel, FallbackPolicy, HttpTransport, ImpactView, Intent, MockTransport,
    Phase, PhaseView, ScenarioId, ScenarioView, SimulationApi, SimulationSession, SimulationView, SolutionConfig,
    SolutionRegistry,
};

/// How long to wait for the backend to report completion.
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

struct Args {
    industry: String,
    solution: String,
    scenario: Option<String>,
    base_url: Option<String>,
    strict: bool,
    offline: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            industry: "fintech".to_string(),
            solution: "fraud-detection".to_string(),
            scenario: None,
            base_url: None,
            strict: false,
            offline: false,
        }
    }
}

fn value_of(args: &[String], i: usize, flag: &str) -> String {
    match args.get(i + 1) {
        Some(value) => value.clone(),
        None => {
            eprintln!("error: {flag} requires a value");
            std::process::exit(1);
        }
    }
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--industry" | "-i" => {
                parsed.industry = value_of(&args, i, "--industry");
                i += 2;
            }
            "--solution" | "-s" => {
                parsed.solution = value_of(&args, i, "--solution");
                i += 2;
            }
            "--scenario" => {
                parsed.scenario = Some(value_of(&args, i, "--scenario"));
                i += 2;
            }
            "--base-url" => {
                parsed.base_url = Some(value_of(&args, i, "--base-url"));
                i += 2;
            }
            "--strict" => {
                parsed.strict = true;
                i += 1;
            }
            "--offline" => {
                parsed.offline = true;
                i += 1;
            }
            "--help" | "-h" => {
                println!("sim-walkthrough - guided AI simulation in the terminal");
                println!();
                println!("USAGE:");
                println!("    sim-walkthrough [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -i, --industry <NAME>     Industry key [default: fintech]");
                println!("    -s, --solution <ID>       Solution id [default: fraud-detection]");
                println!("        --scenario <ID>       Scenario to run [default: recommended]");
                println!("        --base-url <URL>      Backend base URL [env: PLAYGROUND_API_URL]");
                println!("        --strict              Fail instead of substituting mock responses");
                println!("        --offline             Use canned data, no network");
                println!("    -h, --help                Print help information");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    parsed
}

fn build_api(args: &Args) -> Result<Arc<dyn SimulationApi>, String> {
    if args.offline {
        return Ok(Arc::new(MockTransport::new()));
    }

    let mut config = ClientConfig::from_env().map_err(|e| e.to_string())?;
    if let Some(url) = &args.base_url {
        config = config.with_base_url(url).map_err(|e| e.to_string())?;
    }
    if args.strict {
        config = config.with_fallback(FallbackPolicy::Strict);
    }
    info!(base_url = %config.base_url, fallback = ?config.fallback, "using backend");
    let transport = HttpTransport::new(config).map_err(|e| e.to_string())?;
    Ok(Arc::new(transport))
}

fn render_brief(view: &BriefView) {
    println!("== {} ==", view.title);
    if !view.tagline.is_empty() {
        println!("{}", view.tagline);
    }
    println!();
    println!("{}", view.business_story);
    println!();
    println!("Pipeline: {}", view.pipeline.join(" -> "));
    println!("{} scenarios available", view.scenario_count);
}

fn render_scenarios(view: &ScenarioView) {
    println!("== Choose a scenario ==");
    for card in &view.scenarios {
        let marker = if card.recommended { " (recommended)" } else { "" };
        println!("  [{}] {}{} - {}", card.id, card.label, marker, card.description);
    }
}

fn render_pipeline(items: &[PipelineItem]) {
    for item in items {
        let mark = if item.completed { "x" } else { " " };
        println!("  [{mark}] {}. {}", item.index + 1, item.label);
    }
}

fn render_decisions(items: &[DecisionItem]) {
    for item in items {
        let mark = if item.chosen { "*" } else { "-" };
        println!("  {mark} {} -> {} ({})", item.label, item.outcome, item.id);
    }
}

fn render_simulation(view: &SimulationView) {
    let label = view.scenario.as_ref().map_or("no scenario", |s| s.label.as_str());
    println!("== Simulation: {label} ==");
    if let Some(id) = &view.simulation_id {
        println!("simulation id: {id}");
    }
    println!("progress: {:.0}%{}", view.progress() * 100.0, if view.loading { " (loading)" } else { "" });
    render_pipeline(&view.pipeline);
    println!("decisions:");
    render_decisions(&view.decisions);
    for (key, value) in &view.metrics {
        println!("  {key}: {value}");
    }
    if let Some(error) = &view.error {
        println!("! {error}");
    }
}

fn render_impact(view: &ImpactView) {
    println!("== {} ==", view.headline);
    for highlight in &view.highlights {
        println!("  * {highlight}");
    }
    for row in &view.metrics {
        let delta = row.delta.map(|d| format!(" ({d:+})")).unwrap_or_default();
        println!("  {}: {}{}{}", row.label, row.value, row.unit, delta);
    }
    for (key, value) in &view.live_metrics {
        println!("  live {key}: {value}");
    }
    for (decision, outcome) in &view.decisions {
        println!("  decided {decision}: {outcome}");
    }
}

fn render(session: &SimulationSession, config: &SolutionConfig) {
    match PhaseView::build(&session.state(), config) {
        PhaseView::Brief(view) => render_brief(&view),
        PhaseView::Scenario(view) => render_scenarios(&view),
        PhaseView::Simulation(view) => render_simulation(&view),
        PhaseView::Impact(view) => render_impact(&view),
    }
    println!();
}

async fn walk(session: &SimulationSession, config: &SolutionConfig, scenario: Option<&str>) -> Result<(), String> {
    render(session, config);

    session.dispatch(Intent::Start).await;
    render(session, config);

    let scenario_id = match scenario {
        Some(id) => ScenarioId::from(id),
        None => config
            .recommended_scenario()
            .or_else(|| config.scenarios.first())
            .map(|s| s.id.clone())
            .ok_or_else(|| "solution offers no scenarios".to_string())?,
    };
    let select = Intent::SelectScenario(scenario_id.clone());
    select
        .validate(&session.state(), config)
        .map_err(|e| e.to_string())?;
    session.dispatch(select).await;
    render(session, config);

    let decision = config
        .scenario(&scenario_id)
        .and_then(|s| s.decisions.first())
        .cloned();
    if let Some(decision) = decision {
        let mut panel = DecisionPanel::default();
        panel.select(decision.id.clone()).map_err(|e| e.to_string())?;
        session.dispatch(Intent::decide(&decision)).await;
        panel.acknowledge();
        info!(decision = %decision.id, "decision acknowledged");
        render(session, config);
    }

    let mut updates = session.subscribe();
    let finished = tokio::time::timeout(COMPLETION_TIMEOUT, updates.wait_for(|s| s.phase == Phase::Impact))
        .await
        .is_ok_and(|r| r.is_ok());
    if !finished {
        warn!("backend did not report completion, finishing locally");
        session.dispatch(Intent::Complete).await;
    }
    render(session, config);
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = parse_args();

    let registry = match SolutionRegistry::bundled() {
        Ok(registry) => registry,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };
    let config = match registry.require(&args.industry, &args.solution) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            eprintln!("available: {}", registry.keys().join(", "));
            std::process::exit(1);
        }
    };

    let api = match build_api(&args) {
        Ok(api) => api,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };

    let session = SimulationSession::for_solution(api, config);
    let result = walk(&session, config, args.scenario.as_deref()).await;
    session.shutdown();

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
