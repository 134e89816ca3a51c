use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod assistant;
mod commands;
mod error;
mod insights;
mod render;
mod results;
mod session;
mod settings;
mod storage;
mod store;
mod turn;

use assistant::HttpAssistant;
use commands::{CommandContext, Dispatched, Intent, dispatch, parse_line};
use render::{RenderOptions, render};
use settings::{ClientSettings, SettingsLayer, resolve_client_settings};
use storage::{BlobStore, MemoryBlobStore, SqliteBlobStore};
use store::Store;
use turn::TurnController;

const HELP: &str = "\
/new              nouvelle session
/delete           supprimer la session active
/switch N         ouvrir la session N
/sort MODE        trier par score | price | year
/compare N|ID     ajouter/retirer un véhicule du comparateur
/details N|ID     fiche détaillée d’un véhicule
/reply N          envoyer la suggestion N
/reset            repartir de zéro
/export [PATH]    exporter la session en JSON
/quit             quitter
Tout autre texte est envoyé à l’assistant.";

#[derive(Debug, Parser)]
#[command(name = "copilot")]
#[command(about = "Conversational car-shopping assistant in the terminal", long_about = None)]
struct Cli {
    /// Assistant endpoint receiving `{session_id, message}`.
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[arg(long, global = true)]
    database_url: Option<String>,
    #[arg(long, global = true)]
    storage_key: Option<String>,
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
    /// Keep everything in memory; nothing survives the process.
    #[arg(long, global = true)]
    ephemeral: bool,
    /// Serve Prometheus metrics on this address.
    #[arg(long, global = true)]
    metrics_listen: Option<SocketAddr>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive chat (default).
    Chat,
    /// List stored sessions.
    Sessions,
    /// Write the active session as JSON.
    Export {
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

impl Cli {
    fn settings_layer(&self) -> SettingsLayer {
        SettingsLayer {
            api_url: self.api_url.clone(),
            database_url: self.database_url.clone(),
            storage_key: self.storage_key.clone(),
            timeout_secs: self.timeout_secs,
            transcript_rows: None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = resolve_client_settings(&cli.settings_layer(), &SettingsLayer::from_env()?)?;

    if let Some(addr) = cli.metrics_listen {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to start metrics exporter")?;
        info!(%addr, "metrics exporter listening");
    }

    let turns = Arc::new(open_controller(&settings, cli.ephemeral).await?);
    let ctx = CommandContext { turns: &turns };

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(turns.clone(), RenderOptions { transcript_rows: settings.transcript_rows }).await?,
        Commands::Sessions => {
            let store = turns.store().lock().await;
            let root = store.root();
            for (i, s) in root.sessions.iter().enumerate() {
                let marker = if root.active_id == Some(s.id) { '*' } else { ' ' };
                println!("{marker} {:>2}. {}  {}  {} msg  {}", i + 1, s.id, s.title, s.messages.len(), s.updated_at.to_rfc3339());
            }
        }
        Commands::Export { out } => {
            if let Dispatched::Exported(path) = dispatch(&ctx, Intent::Export(out)).await? {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}

async fn open_controller(settings: &ClientSettings, ephemeral: bool) -> anyhow::Result<TurnController> {
    let backend: Arc<dyn BlobStore> = if ephemeral {
        Arc::new(MemoryBlobStore::default())
    } else {
        Arc::new(SqliteBlobStore::initialize(settings.database_url.clone()).await?)
    };
    let store = Store::open(backend, settings.storage_key.clone()).await?.shared();
    let assistant = HttpAssistant::new(settings.api_url.clone(), settings.timeout())?;
    info!(api_url = %settings.api_url, "assistant configured");
    Ok(TurnController::new(store, Arc::new(assistant)))
}

async fn run_chat(turns: Arc<TurnController>, opts: RenderOptions) -> anyhow::Result<()> {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<anyhow::Result<Dispatched>>();
    let mut status = turns.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    redraw(&turns, &opts).await?;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "/quit" | "/exit" => break,
                    "/help" => {
                        println!("{HELP}");
                        continue;
                    }
                    _ => {}
                }
                let parsed = {
                    let store = turns.store().lock().await;
                    parse_line(&line, store.root())
                };
                match parsed {
                    Err(usage) => {
                        println!("{usage} (/help)");
                        continue;
                    }
                    // turns run in the background so input stays live while the assistant answers
                    Ok(intent @ (Intent::SendTurn(_) | Intent::QuickReply(_))) => {
                        let turns = turns.clone();
                        let done_tx = done_tx.clone();
                        tokio::spawn(async move {
                            let ctx = CommandContext { turns: &turns };
                            let _ = done_tx.send(dispatch(&ctx, intent).await);
                        });
                    }
                    Ok(intent) => {
                        let ctx = CommandContext { turns: &turns };
                        if !report(dispatch(&ctx, intent).await) {
                            continue;
                        }
                    }
                }
                redraw(&turns, &opts).await?;
            }
            Some(done) = done_rx.recv() => {
                report(done);
                redraw(&turns, &opts).await?;
            }
            Ok(()) = status.changed() => {
                redraw(&turns, &opts).await?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

/// Prints the outcome; returns whether the frame should be redrawn.
fn report(result: anyhow::Result<Dispatched>) -> bool {
    match result {
        Ok(Dispatched::Details(card)) => {
            println!("\n{card}");
            return false;
        }
        Ok(Dispatched::Refused) => println!("(rien à faire)"),
        Ok(Dispatched::Exported(path)) => println!("Exporté: {}", path.display()),
        Ok(_) => {}
        Err(err) => {
            warn!(error = %err, "command failed");
            println!("Erreur: {err:#}");
        }
    }
    true
}

async fn redraw(turns: &TurnController, opts: &RenderOptions) -> anyhow::Result<()> {
    let frame = {
        let store = turns.store().lock().await;
        render(store.root(), turns.status(), opts)?
    };
    println!("\n{frame}");
    Ok(())
}
