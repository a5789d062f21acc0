use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use docchat_rag::{AnswerEvent, RagQueryRequest};
use docchat_retrieval::IngestSource;
use docchat_server::AppState;

mod app;
mod repl;

const DEFAULT_LOG_FILTER: &str =
    "docchat=info,docchat_core=info,docchat_retrieval=info,docchat_rag=info,docchat_server=info";

#[derive(Parser)]
#[command(name = "docchat")]
#[command(about = "Chat with your PDFs through a local retrieval-augmented model", long_about = None)]
struct Cli {
    /// YAML configuration file; flags and environment variables override it.
    #[arg(long, global = true, env = "DOCCHAT_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: app::Overrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rebuild the index from a directory of PDFs, or add a single file.
    Ingest {
        /// Defaults to the configured documents directory.
        path: Option<PathBuf>,
    },
    /// Answer one question from the index.
    Ask {
        question: String,
        /// Print the answer and its sources as JSON instead of streaming text.
        #[arg(long)]
        json: bool,
    },
    /// Interactive chat session in the terminal.
    Chat,
    /// Serve chat sessions over HTTP.
    Serve {
        #[arg(long, env = "DOCCHAT_ADDR", default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
    },
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let cli = Cli::parse();

    let config = app::load_config(cli.config.as_deref(), &cli.overrides)?;
    let docchat = app::build(config).await?;

    match cli.command {
        Command::Ingest { path } => {
            let path = path.unwrap_or_else(|| docchat.documents_dir().to_path_buf());
            let source = if path.is_dir() {
                IngestSource::Directory(path)
            } else {
                IngestSource::File(path)
            };
            let report = docchat.ingest(source).await.context("ingestion failed")?;
            println!(
                "Indexed {} chunks from {} pages ({}).",
                report.chunks, report.documents, report.mode
            );
        }
        Command::Ask { question, json } => {
            if json {
                let answer = docchat.query(RagQueryRequest { query: question }).await?;
                let output = serde_json::json!({
                    "answer": answer.answer,
                    "sources": answer.sources,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                ask(&docchat, question).await?;
            }
        }
        Command::Chat => repl::run(docchat).await?,
        Command::Serve { addr } => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("cannot bind {addr}"))?;
            docchat_server::serve(listener, AppState::from_app(docchat), async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %err, "cannot listen for ctrl-c");
                }
            })
            .await?;
        }
    }

    Ok(())
}

async fn ask(docchat: &docchat_rag::DocChat, question: String) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut events = docchat.query_stream(RagQueryRequest { query: question }, cancel);
    while let Some(event) = events.next().await {
        match event? {
            AnswerEvent::Retrieved { .. } => {}
            AnswerEvent::Token(token) => repl::print_flush(&token)?,
            AnswerEvent::Answer(answer) => {
                println!();
                repl::print_sources(&answer.sources);
            }
        }
    }
    Ok(())
}
