//! DrinViewer mobile command-line entry point.
//!
//! Stands in for the phone app: discovers desktops, toggles pairing, and
//! forwards events, all against real desktops on the LAN.
//!
//! # Usage
//!
//! ```text
//! drin-mobile [OPTIONS] <COMMAND>
//!
//! Commands:
//!   discover                 List the desktops that answer
//!   toggle <ADDRESS>         Pair with (or unpair from) one desktop
//!   notify --title <T> --message <M> [--image <FILE>] [--action <A>]
//!                            Send an event to every paired desktop
//!
//! Options:
//!   --broadcast <ADDR>   Where discovery requests go [default: from mobile.toml]
//!   --port <PORT>        Desktop port [default: from mobile.toml, else 50001]
//!   --config <FILE>      Use this settings file instead of the platform one
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load mobile.toml (generates and saves the device id on first run)
//!  └─ DiscoverHostsUseCase  (every command discovers first)
//!  └─ NotifyHostsUseCase    (toggle / notify)
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use drin_core::{DrinEvent, EventAction, HostRegistry};
use drin_mobile::application::discover_hosts::DiscoverHostsUseCase;
use drin_mobile::application::notify_hosts::NotifyHostsUseCase;
use drin_mobile::infrastructure::network::pairing::PairingSession;
use drin_mobile::infrastructure::storage::config::{self, MobileConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// DrinViewer mobile client.
///
/// Finds DrinViewer desktops on the LAN, pairs with them, and forwards
/// notifications to the paired ones.
#[derive(Debug, Parser)]
#[command(name = "drin-mobile", version)]
struct Cli {
    /// Discovery target, usually the subnet broadcast address.
    #[arg(long, env = "DRIN_BROADCAST")]
    broadcast: Option<IpAddr>,

    /// Desktop UDP and TCP port.  Overrides `mobile.toml`.
    #[arg(long, env = "DRIN_PORT")]
    port: Option<u16>,

    /// Path to `mobile.toml`.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the desktops that answer a discovery round.
    Discover,

    /// Pair with the desktop at ADDRESS, or unpair if already paired.
    Toggle {
        address: IpAddr,
    },

    /// Send one event to every paired desktop.
    Notify {
        #[arg(long)]
        title: String,

        #[arg(long)]
        message: String,

        /// Image file attached to the event.
        #[arg(long, value_name = "FILE")]
        image: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = ActionArg::ShowPopup)]
        action: ActionArg,
    },
}

/// Command-line spelling of [`EventAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ActionArg {
    None,
    ShowPopup,
    RemovePopup,
    ShowPaired,
}

impl From<ActionArg> for EventAction {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::None => EventAction::None,
            ActionArg::ShowPopup => EventAction::ShowPopup,
            ActionArg::RemovePopup => EventAction::RemovePopup,
            ActionArg::ShowPaired => EventAction::ShowPaired,
        }
    }
}

impl Cli {
    /// Applies command-line overrides on top of the file configuration.
    fn apply(&self, mut cfg: MobileConfig) -> MobileConfig {
        if let Some(port) = self.port {
            cfg.network.port = port;
        }
        if let Some(broadcast) = self.broadcast {
            cfg.network.broadcast_address = broadcast;
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
    let cfg = cli.apply(
        config::load_or_init(&config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?,
    );

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.device.log_level)),
        )
        .init();

    let device_id = cfg
        .device
        .device_id
        .clone()
        .context("device id missing from configuration")?;
    info!(%device_id, "DrinViewer mobile starting");

    let registry = Arc::new(HostRegistry::new());
    let discovery = Arc::new(DiscoverHostsUseCase::new(
        Arc::clone(&registry),
        device_id.clone(),
        cfg.discovery_settings(),
        cfg.network.broadcast_address,
    ));
    discover(&discovery).await?;

    let notifier = NotifyHostsUseCase::new(
        registry,
        PairingSession::new(cfg.network.port, cfg.discovery.attempt_timeout()),
        device_id,
    );

    match cli.command {
        Command::Discover => {
            let hosts = discovery.hosts();
            if hosts.is_empty() {
                println!("no DrinViewer desktops found");
            }
            for host in hosts {
                let state = if host.paired { "paired" } else { "not paired" };
                println!("{host}  [{state}]");
            }
        }

        Command::Toggle { address } => {
            let paired = notifier.toggle_pairing(address).await?;
            println!(
                "{address}: {}",
                if paired { "paired" } else { "not paired" }
            );
        }

        Command::Notify {
            title,
            message,
            image,
            action,
        } => {
            let mut event = DrinEvent::new(title, message, action.into());
            if let Some(path) = image {
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("failed to read image {}", path.display()))?;
                event = event.with_image(bytes);
            }

            let reports = notifier.notify_paired_hosts(&event).await?;
            let delivered = reports.iter().filter(|r| r.result.is_ok()).count();
            if delivered < reports.len() {
                warn!("{} of {} deliveries failed", reports.len() - delivered, reports.len());
            }
            println!("event delivered to {delivered} of {} paired desktop(s)", reports.len());
        }
    }

    Ok(())
}

/// Runs one discovery round to completion off the async runtime.
async fn discover(discovery: &Arc<DiscoverHostsUseCase>) -> anyhow::Result<()> {
    let discovery = Arc::clone(discovery);
    tokio::task::spawn_blocking(move || {
        discovery.start_discovery()?;
        discovery.wait_until_done();
        Ok::<_, anyhow::Error>(())
    })
    .await
    .context("discovery task failed")?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_leave_config_untouched() {
        let cli = Cli::parse_from(["drin-mobile", "discover"]);
        let cfg = cli.apply(MobileConfig::default());
        assert_eq!(cfg, MobileConfig::default());
    }

    #[test]
    fn test_cli_overrides_port_and_broadcast() {
        let cli = Cli::parse_from([
            "drin-mobile",
            "--port",
            "6001",
            "--broadcast",
            "192.168.0.255",
            "discover",
        ]);

        let cfg = cli.apply(MobileConfig::default());

        assert_eq!(cfg.network.port, 6001);
        assert_eq!(cfg.network.broadcast_address.to_string(), "192.168.0.255");
    }

    #[test]
    fn test_toggle_parses_address() {
        let cli = Cli::parse_from(["drin-mobile", "toggle", "10.0.0.7"]);
        assert!(matches!(
            cli.command,
            Command::Toggle { address } if address.to_string() == "10.0.0.7"
        ));
    }

    #[test]
    fn test_notify_defaults_to_show_popup() {
        let cli = Cli::parse_from(["drin-mobile", "notify", "--title", "t", "--message", "m"]);
        match cli.command {
            Command::Notify { action, image, .. } => {
                assert_eq!(EventAction::from(action), EventAction::ShowPopup);
                assert_eq!(image, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_notify_accepts_kebab_case_action() {
        let cli = Cli::parse_from([
            "drin-mobile",
            "notify",
            "--title",
            "t",
            "--message",
            "m",
            "--action",
            "remove-popup",
        ]);
        assert!(matches!(
            cli.command,
            Command::Notify {
                action: ActionArg::RemovePopup,
                ..
            }
        ));
    }
}
