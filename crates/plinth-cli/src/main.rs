//! Plinth CLI entry point.

mod config;
mod plugins;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::future::BoxFuture;
use rhizome_plinth_core::{Callbacks, ContextId, DispatchError, HostCallbacks, Submission};
use rhizome_plinth_runtime::PlinthRuntime;
use rhizome_plinth_runtime_luajit::loader;
use rhizome_plinth_transport_websocket_jsonrpc::{Server, ServerConfig};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "plinth")]
#[command(about = "Plinth plugin runtime CLI")]
struct Cli {
    /// Config file (defaults to ./plinth.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebSocket JSON-RPC server
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Plugin manifest to preload
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Render a plugin once and print the response
    Render {
        /// Script file, or a plugin id from the manifest
        plugin: String,

        /// JSON file holding the game state
        #[arg(long)]
        state: Option<PathBuf>,

        /// Block height
        #[arg(long, default_value = "0")]
        block: u64,

        /// Reference to submit after the first render
        #[arg(long)]
        click: Option<String>,

        /// JSON form values sent with --click
        #[arg(long, requires = "click")]
        values: Option<String>,
    },

    /// Load a plugin and report load errors
    Check {
        /// Script file, or a plugin id from the manifest
        plugin: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::discover(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve {
            host,
            port,
            manifest,
        } => {
            let server_config = ServerConfig {
                host: host.unwrap_or(config.server.host),
                port: port.unwrap_or(config.server.port),
            };

            let descriptors = match manifest.or(config.plugins.manifest) {
                Some(path) => {
                    let descriptors = plugins::preload(&path)?;
                    info!("Loaded {} plugin(s) from {}", descriptors.len(), path.display());
                    descriptors
                }
                None => Vec::new(),
            };

            info!("Starting Plinth server");
            let runtime = PlinthRuntime::start().context("Failed to start runtime worker")?;
            Server::new(runtime, server_config)
                .with_plugins(descriptors)
                .run()
                .await
                .context("Server stopped")?;
        }

        Commands::Render {
            plugin,
            state,
            block,
            click,
            values,
        } => {
            let descriptor = plugins::resolve(&plugin, config.plugins.manifest.as_deref())?;
            let state = match state {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read state file: {}", path.display()))?;
                    serde_json::from_str(&text)
                        .with_context(|| format!("State file is not JSON: {}", path.display()))?
                }
                None => Value::Object(Default::default()),
            };

            let runtime = PlinthRuntime::start().context("Failed to start runtime worker")?;
            runtime.set_state(state, block);
            let context = runtime.new_context(descriptor, console_host()).await?;

            let response = runtime.update(context).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);

            if let Some(reference) = click {
                let values = match values {
                    Some(values) => serde_json::from_str(&values).context("--values must be JSON")?,
                    None => Value::Object(Default::default()),
                };
                runtime
                    .submit(context, Submission::new(reference, values))
                    .await?;
                let response = runtime.update(context).await?;
                println!("{}", serde_json::to_string_pretty(&response)?);
            }
        }

        Commands::Check { plugin } => {
            let descriptor = plugins::resolve(&plugin, config.plugins.manifest.as_deref())?;
            let module = loader::load(&descriptor)?;
            println!(
                "{}: ok ({}, {})",
                module.plugin(),
                module.kind(),
                module.trust()
            );
        }
    }

    Ok(())
}

/// Collaborators that report every call through the log.
fn console_host() -> Arc<dyn HostCallbacks> {
    Arc::new(Callbacks::new(
        |context: ContextId, actions: Vec<Value>| -> BoxFuture<'static, Result<(), DispatchError>> {
            info!(context_id = %context, "dispatch {}", serde_json::Value::Array(actions));
            Box::pin(async { Ok(()) })
        },
        |context: ContextId, args: Vec<Value>| {
            info!(context_id = %context, "log {}", serde_json::Value::Array(args));
        },
        |context: ContextId, args: Vec<Value>| {
            info!(context_id = %context, "quest {}", serde_json::Value::Array(args));
        },
    ))
}
