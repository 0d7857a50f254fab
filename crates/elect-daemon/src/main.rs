//! elect-daemon: Leader election simulation.
//!
//! Runs a group of supervised candidates against an in-memory coordination
//! service. Each elected leader holds office for one term and then resigns,
//! so the group re-elects in ascending sequence order.

use anyhow::Result;
use clap::Parser;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use elect_core::{
    CoordinationClient, ElectionConfig, EventBus, InMemoryCoordinator, fetch_election_state,
};
use elect_daemon::{
    Candidate, CandidateError, DaemonSettings, Leadership, SettingsOverrides, strategy_factory,
};

#[derive(Parser, Debug)]
#[command(name = "elect-daemon")]
#[command(about = "Leader election simulation over an in-memory coordination service")]
struct Args {
    /// Path to a YAML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: SettingsOverrides,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

type Outcome = (String, Result<Leadership, CandidateError>);

/// Simulation state shared by the main loop.
struct Simulation {
    settings: DaemonSettings,
    config: ElectionConfig,
    service: InMemoryCoordinator,
    events: Arc<EventBus>,
    outcomes: mpsc::UnboundedSender<Outcome>,
    /// Candidates currently running
    active: usize,
}

impl Simulation {
    /// Start a supervised candidate on its own task.
    fn spawn_candidate(&mut self, name: String) {
        let factory = strategy_factory(
            self.settings.strategy,
            self.config.clone(),
            Some(Arc::clone(&self.events)),
        );
        let candidate = Candidate::new(name, self.service.clone(), factory)
            .with_retry(self.settings.retry_config());
        let outcomes = self.outcomes.clone();

        self.active += 1;
        tokio::spawn(async move {
            let result = candidate.run().await;
            let _ = outcomes.send((candidate.name().to_string(), result));
        });
    }

    /// Hold office for one term, then step down and rejoin as a new member.
    async fn serve_term(&mut self, name: String, leadership: Leadership, term: usize) {
        let observer: Arc<dyn CoordinationClient> = self.service.connect();
        let election = fetch_election_state(&self.config, observer.as_ref()).await;
        info!(
            "Term {}: {} leads as {} (candidate {}, {} attempt(s), election {:?})",
            term,
            name,
            leadership.member_path().unwrap_or_default(),
            leadership.candidate_id(),
            leadership.attempts(),
            election,
        );

        let jitter = rand::rng().random_range(0..=self.settings.term_ms / 2);
        tokio::time::sleep(self.settings.term() + std::time::Duration::from_millis(jitter)).await;

        leadership.resign();
        self.spawn_candidate(name);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,elect_daemon=debug,elect_core=debug"
    } else {
        "info,elect_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut settings = DaemonSettings::load(args.config.as_deref())?;
    settings.apply(&args.overrides);
    settings.validate()?;

    let config = settings.election_config();
    info!("Starting elect-daemon");
    info!("Strategy: {:?}", settings.strategy);
    info!("Election: {}/{}*", config.root, config.member_prefix);

    let events = Arc::new(EventBus::new());
    let _event_log = events.subscribe(|event| debug!("{}", event.to_json()));

    let (outcomes, mut outcome_rx) = mpsc::unbounded_channel();
    let mut simulation = Simulation {
        config,
        service: InMemoryCoordinator::new(),
        events,
        outcomes,
        active: 0,
        settings,
    };
    for i in 0..simulation.settings.candidates {
        simulation.spawn_candidate(format!("candidate-{i}"));
    }

    info!("Simulation running. Press Ctrl+C to stop.");

    let mut terms = 0;
    loop {
        tokio::select! {
            Some((name, result)) = outcome_rx.recv() => {
                simulation.active -= 1;
                match result {
                    Ok(leadership) => {
                        terms += 1;
                        simulation.serve_term(name, leadership, terms).await;
                        if simulation.settings.rounds != 0 && terms >= simulation.settings.rounds {
                            info!("Completed {} term(s)", terms);
                            break;
                        }
                    }
                    Err(e) => {
                        error!("{} gave up: {}", name, e);
                        if simulation.active == 0 {
                            error!("No candidates left");
                            break;
                        }
                    }
                }
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down");
    Ok(())
}
