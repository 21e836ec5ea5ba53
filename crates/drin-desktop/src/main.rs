//! DrinViewer desktop entry point.
//!
//! Loads the configuration, opens the pairing store, and runs the discovery
//! responder plus the event server until Ctrl-C.  The `paired` subcommand
//! manages the pairing store instead of serving.
//!
//! # Usage
//!
//! ```text
//! drin-desktop [OPTIONS] [COMMAND]
//!
//! Commands:
//!   paired list              Print every paired device id
//!   paired remove <ID>...    Unpair the given devices
//!
//! Options:
//!   --port <PORT>        UDP/TCP port [default: from desktop.toml, else 50001]
//!   --do-not-disturb     Ignore discovery requests from unpaired devices
//!   --config <FILE>      Use this settings file instead of the platform one
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load desktop.toml, open paired.toml
//!  └─ DesktopServer::start()
//!       ├─ EventServer        (Tokio accept loop, one task per connection)
//!       └─ DiscoveryResponder (UDP background thread)
//! ```

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use drin_desktop::application::manage_pairings::ManagePairingsUseCase;
use drin_desktop::application::serve_host::{resolve_host_name, DesktopServer, ServerSettings};
use drin_desktop::infrastructure::notifier::LogEventSink;
use drin_desktop::infrastructure::storage::config::{self, DesktopConfig};
use drin_desktop::infrastructure::storage::pairing_store::FilePairingStore;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// DrinViewer desktop responder.
///
/// Answers LAN discovery from paired phones and shows the notifications they
/// forward.
#[derive(Debug, Parser)]
#[command(name = "drin-desktop", version)]
struct Cli {
    /// UDP and TCP port to listen on.  Overrides `desktop.toml`.
    #[arg(long, env = "DRIN_PORT")]
    port: Option<u16>,

    /// Do not answer discovery requests from unpaired devices.
    #[arg(long)]
    do_not_disturb: bool,

    /// Path to `desktop.toml`.  `paired.toml` is kept next to it.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Runs the server when omitted.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage the devices paired with this desktop.
    Paired {
        #[command(subcommand)]
        action: PairedAction,
    },
}

#[derive(Debug, Subcommand)]
enum PairedAction {
    /// Print every paired device id.
    List,

    /// Unpair one or more devices.
    Remove {
        #[arg(required = true)]
        device_ids: Vec<String>,
    },
}

impl Cli {
    /// Applies command-line overrides on top of the file configuration.
    fn apply(&self, mut cfg: DesktopConfig) -> DesktopConfig {
        if let Some(port) = self.port {
            cfg.network.port = port;
        }
        if self.do_not_disturb {
            cfg.desktop.do_not_disturb = true;
        }
        cfg
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config::config_file_path()?,
    };
    let cfg = cli.apply(config::load_config_from(&config_path)?);

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.desktop.log_level)),
        )
        .init();

    let paired_path = config_path
        .parent()
        .map(|dir| dir.join(config::PAIRED_FILE_NAME))
        .context("config path has no parent directory")?;
    let store = Arc::new(
        FilePairingStore::open(&paired_path)
            .with_context(|| format!("failed to open {}", paired_path.display()))?,
    );

    if let Some(Command::Paired { action }) = cli.command {
        return manage_paired(ManagePairingsUseCase::new(store), action);
    }

    info!("DrinViewer desktop starting");

    let mut server = DesktopServer::new(
        ServerSettings {
            bind_addr: cfg.network.socket_addr(),
            host_name: resolve_host_name(cfg.desktop.host_name.as_deref()),
        },
        store,
        Arc::new(LogEventSink),
    );
    server.set_do_not_disturb(cfg.desktop.do_not_disturb);

    if let Err(e) = server.start().await {
        if e.is_bind_conflict() {
            error!("{e}");
            anyhow::bail!("DrinViewer is already running on this machine");
        }
        return Err(e.into());
    }

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl-C: {e}"),
        }
    });

    info!("DrinViewer desktop ready.  Press Ctrl-C to exit.");

    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    server.stop().await;
    Ok(())
}

/// Runs one `paired` subcommand against the pairing store.
fn manage_paired(manage: ManagePairingsUseCase, action: PairedAction) -> anyhow::Result<()> {
    match action {
        PairedAction::List => {
            let ids = manage.list()?;
            if ids.is_empty() {
                println!("no paired devices");
            }
            for id in ids {
                println!("{id}");
            }
        }
        PairedAction::Remove { device_ids } => {
            for id in device_ids {
                if manage.remove(&id)? {
                    println!("{id}: unpaired");
                } else {
                    println!("{id}: not paired");
                }
            }
        }
    }
    Ok(())
}
