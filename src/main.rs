mod call;
mod cli;
mod convergence;
mod evidence;
mod llm;
mod report;
mod research;
mod search;
mod sessions;
mod state;
mod verify;

#[cfg(test)]
mod testing;

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};

use cli::{Cli, Mode};
use evidence::EvidenceCollector;
use llm::LlmClient;
use report::MarkdownReport;
use research::{Orchestrator, ReportAssembler};
use search::WebSearch;
use sessions::SessionStore;
use state::ResearchConfig;
use verify::ClaimVerifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load env
    let _ = dotenv::dotenv();
    let level = dotenv::var("LOG_LEVEL")
        .ok()
        .and_then(|l| Level::from_str(&l).ok())
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = ResearchConfig::from_env()?;
    let store = SessionStore::new(&config.data_dir).await?;

    let query = match cli.mode() {
        Mode::List => {
            for id in store.list().await? {
                println!("{}", id);
            }
            return Ok(());
        }
        Mode::Show(id) => {
            let state = store.load(&id).await?;
            println!("{}", MarkdownReport.assemble(&state)?);
            return Ok(());
        }
        Mode::Research(query) => query,
    };
    if query.is_empty() {
        bail!("the question is empty");
    }
    let language = config.language_for(&query);

    let search = Arc::new(WebSearch::from_env()?);
    let llm = Arc::new(LlmClient::from_env()?);
    info!(model = llm.model(), %language, "clients initialized");

    let collector = EvidenceCollector::new(search.clone(), config.collector());
    let verifier = ClaimVerifier::new(config.verifier()).with_search(search);
    let orchestrator = Orchestrator::new(
        collector,
        llm,
        verifier,
        Arc::new(MarkdownReport),
        config.loops(),
    );

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(
                    run_id = %event.run_id,
                    from = %event.from,
                    to = %event.to,
                    loop_count = event.loop_count,
                    "progress"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "progress listener lagged")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing with what we have");
            on_signal.cancel();
        }
    });

    let completion = orchestrator
        .run(&query, language, &cancel)
        .await
        .context("research run aborted")?;

    info!(
        run_id = %completion.state.id,
        unverified = completion.state.unverified_claims(),
        errors = completion.state.errors.len(),
        "run complete"
    );
    match store.save(&completion.state).await {
        Ok(path) => info!(path = ?path, "session saved"),
        Err(e) => error!(error = %e, "Failed to save session"),
    }

    match completion.report {
        Some(report) => println!("{}", report),
        None => bail!("report assembly failed for run {}", completion.state.id),
    }

    Ok(())
}
