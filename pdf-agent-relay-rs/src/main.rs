// pdf-agent-relay-rs/src/main.rs
// Main Entry Point for pdf-agent-relay-rs
// Loads the configured PDF into the agent's knowledge store, then relays
// questions to the agent and streams its answers to the terminal

use std::env;
use std::io::{self, Write};

use anyhow::{bail, Context};
use futures::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};

use relay_sdk::config::{CompositeConfigProvider, DEFAULT_PROVIDER};
use relay_sdk::{
    converse, CancellationToken, IngestionConfig, IngestionStatus, ReducerState, Session,
    StreamConfig, StreamRetryClient,
};

mod render;

use render::{print_history, AnswerRenderer};

const USAGE: &str = "usage: pdf-agent-relay-rs [ingest | chat [--no-ingest] | ask <question>]";

enum Command {
    Ingest,
    Chat { ingest: bool },
    Ask(String),
}

fn parse_args() -> anyhow::Result<Command> {
    let mut args = env::args().skip(1);

    match args.next().as_deref() {
        None | Some("chat") => {
            let ingest = !args.any(|arg| arg == "--no-ingest");
            Ok(Command::Chat { ingest })
        }
        Some("ingest") => Ok(Command::Ingest),
        Some("ask") => {
            let question = args.collect::<Vec<_>>().join(" ");
            if question.trim().is_empty() {
                bail!("{}", USAGE);
            }
            Ok(Command::Ask(question))
        }
        Some(other) => bail!("unknown command '{}'\n{}", other, USAGE),
    }
}

/// Cancel `token` on the next Ctrl-C; abort the returned handle once the work is done
fn cancel_on_ctrl_c(token: &CancellationToken) -> tokio::task::JoinHandle<()> {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl-C received, cancelling");
            token.cancel();
        }
    })
}

/// Run the startup ingestion; only a fatal failure is an error
async fn ingest(config: &IngestionConfig) -> anyhow::Result<()> {
    let coordinator = config
        .build_coordinator()
        .context("failed to set up ingestion")?;
    let job = config.job();

    log::info!("Loading {} into the knowledge store", job.source_locator);

    let cancel = CancellationToken::new();
    let watcher = cancel_on_ctrl_c(&cancel);
    let result = coordinator.run(&job, &cancel).await;
    watcher.abort();

    match result {
        Ok(report) => {
            match report.status {
                IngestionStatus::AlreadyPresent => log::info!("Document already loaded"),
                IngestionStatus::Loaded => {
                    log::info!("Document loaded after {} attempts", report.attempts.len())
                }
                IngestionStatus::Verified => log::info!(
                    "Document loaded after {} attempts and verified after {} probes",
                    report.attempts.len(),
                    report.probes
                ),
            }
            Ok(())
        }
        Err(failure) if failure.is_fatal() => Err(failure).context("ingestion aborted"),
        Err(failure) => {
            log::error!("Ingestion failed, answers may be incomplete: {}", failure);
            Ok(())
        }
    }
}

/// Stream one answer into the session, rendering it as it arrives
async fn ask(client: &StreamRetryClient, session: &mut Session, question: &str) -> ReducerState {
    let cancel = CancellationToken::new();
    let watcher = cancel_on_ctrl_c(&cancel);

    let mut renderer = AnswerRenderer::new();
    let state = converse(client, session, question, cancel, |event, reducer| {
        renderer.update(event, reducer)
    })
    .await;
    watcher.abort();

    renderer.finish(&state, session);
    state
}

async fn chat(client: &StreamRetryClient) -> anyhow::Result<()> {
    let mut session = Session::new();
    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());

    println!("Agent Chat PDF. Type a question, /history to review, /quit or Ctrl-C to leave.");

    loop {
        print!("\n> ");
        io::stdout().flush()?;

        // No request in flight here, so Ctrl-C leaves the chat
        let next = tokio::select! {
            next = lines.next() => next,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };

        let line = match next {
            Some(line) => line.context("failed to read stdin")?,
            None => break,
        };

        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => print_history(&session),
            question => {
                ask(client, &mut session, question).await;
            }
        }
    }

    log::info!("Session {} ended with {} messages", session.id, session.len());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Load environment variables
    dotenv::dotenv().ok();
    dotenv::from_path(".venv/.env").ok();

    let command = parse_args()?;

    // Create a composite provider for fallbacks
    let provider = CompositeConfigProvider::new().with_provider((**DEFAULT_PROVIDER).clone());

    match command {
        Command::Ingest => {
            let config = IngestionConfig::from_provider(&provider)?;
            ingest(&config).await
        }
        Command::Chat { ingest: load } => {
            let stream = StreamConfig::from_provider(&provider)?;
            if load {
                ingest(&IngestionConfig::from_provider(&provider)?).await?;
            }
            log::info!("Relaying questions to {}", stream.endpoint);
            chat(&stream.build_client()?).await
        }
        Command::Ask(question) => {
            let client = StreamConfig::from_provider(&provider)?.build_client()?;
            let mut session = Session::new();
            match ask(&client, &mut session, &question).await {
                ReducerState::Failed => bail!("the agent did not answer"),
                _ => Ok(()),
            }
        }
    }
}
