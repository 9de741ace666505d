//! usbnet - USB gadget network provisioning
//!
//! Runs one lifecycle step for a USB mode: bring the interface up or down,
//! write the DHCP server config (with NAT when the mode asks for it), or
//! re-apply settings for the active mode.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use usbnet::system::{Report, StepStatus, SystemHost};
use usbnet::upstream::default_aggregator;
use usbnet::{
    DhcpSetup, ModeConfig, NetworkConfig, NetworkLifecycle, StaticModeManager, UpdateOutcome,
};

#[derive(Parser, Debug)]
#[command(name = "usbnet", version, about = "USB gadget network provisioning")]
struct Cli {
    /// Path to the network config (default: ~/.config/usbnet/network.json)
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, value_name = "LEVEL", global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assign the address and default route
    Up(ModeArgs),
    /// Take the interface down and drop NAT
    Down(ModeArgs),
    /// Write the DHCP server config and set up NAT if requested
    Dhcp(ModeArgs),
    /// Reset the interface if a networking mode is active
    Update {
        #[command(flatten)]
        mode: ModeArgs,
        /// USB cable is connected
        #[arg(long)]
        connected: bool,
    },
    /// Show the resolved settings and forwarding state
    Status(ModeArgs),
    /// Print the network config, optionally changing and saving it
    Config(ConfigArgs),
}

/// The active mode, as the mode manager would describe it.
#[derive(Args, Debug, Clone)]
struct ModeArgs {
    /// Interface override for this mode
    #[arg(short, long)]
    interface: Option<String>,
    /// Forward USB traffic to the upstream connection
    #[arg(long)]
    nat: bool,
    /// The mode uses networking
    #[arg(long)]
    network: bool,
}

/// Overrides applied to the loaded config. An empty value clears the field.
#[derive(Args, Debug, Clone)]
struct ConfigArgs {
    /// Default USB interface
    #[arg(long)]
    interface: Option<String>,
    /// USB-side address, or "dhcp"
    #[arg(long)]
    ip: Option<String>,
    /// Default gateway
    #[arg(long)]
    gateway: Option<String>,
    /// Upstream interface for NAT, overriding the discovered one
    #[arg(long)]
    nat_interface: Option<String>,
    /// Write the result back to the config file
    #[arg(long)]
    save: bool,
}

impl ConfigArgs {
    fn apply(&self, config: &mut NetworkConfig) {
        let overrides = [
            (&self.interface, &mut config.interface),
            (&self.ip, &mut config.ip),
            (&self.gateway, &mut config.gateway),
            (&self.nat_interface, &mut config.nat_interface),
        ];
        for (value, field) in overrides {
            if let Some(value) = value {
                *field = Some(value.clone()).filter(|v| !v.trim().is_empty());
            }
        }
    }
}

impl From<ModeArgs> for ModeConfig {
    fn from(args: ModeArgs) -> Self {
        ModeConfig {
            network_interface: args.interface,
            nat: args.nat,
            network: args.network,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level)?;

    let mut config = match cli.config {
        Some(ref path) => NetworkConfig::load_from(path),
        None => NetworkConfig::load(),
    };

    if let Command::Config(ref args) = cli.command {
        args.apply(&mut config);
        if args.save {
            let path = cli
                .config
                .or_else(NetworkConfig::path)
                .context("no config directory available")?;
            config
                .save_to(&path)
                .with_context(|| format!("saving config to {}", path.display()))?;
            info!(path = %path.display(), "network config saved");
        }
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if !matches!(cli.command, Command::Status(_)) && !is_root() {
        bail!("this command must be run as root");
    }

    let (mode, connected) = match cli.command {
        Command::Update {
            ref mode,
            connected,
        } => (ModeConfig::from(mode.clone()), connected),
        Command::Up(ref mode)
        | Command::Down(ref mode)
        | Command::Dhcp(ref mode)
        | Command::Status(ref mode) => (ModeConfig::from(mode.clone()), true),
        Command::Config(_) => return Ok(()),
    };

    let aggregator = default_aggregator(&config);
    let modes = StaticModeManager::new(mode.clone(), connected);
    let lifecycle = NetworkLifecycle::new(SystemHost, config, modes, aggregator);

    match cli.command {
        Command::Up(_) => log_report("up", &lifecycle.up(&mode).await),
        Command::Down(_) => log_report("down", &lifecycle.down(&mode).await),
        Command::Dhcp(_) => match lifecycle.set_up_dhcp_server(&mode).await {
            DhcpSetup::UpstreamUnavailable(e) => {
                warn!(error = %e, "upstream unavailable, dhcp server not configured");
            }
            DhcpSetup::Configured {
                written,
                forwarding,
            } => {
                let written = written.context("writing dhcp server config")?;
                info!(
                    start = %written.range.start,
                    end = %written.range.end,
                    "dhcp server configured"
                );
                if let Some(forwarding) = forwarding {
                    log_report("forwarding", &forwarding.context("setting up forwarding")?);
                }
            }
        },
        Command::Update { .. } => match lifecycle.update().await {
            UpdateOutcome::NotConnected => info!("not connected, nothing to update"),
            UpdateOutcome::NetworkNotUsed => info!("active mode has no networking"),
            UpdateOutcome::Reset(report) => log_report("update", &report),
        },
        Command::Status(_) => {
            let forwarding = lifecycle
                .firewall()
                .is_enabled()
                .await
                .context("reading ip forwarding state")?;
            println!("interface:     {}", lifecycle.interface_for(&mode));
            println!("ip:            {}", lifecycle.config().ip().unwrap_or("(fallback)"));
            println!("gateway:       {}", lifecycle.config().gateway().unwrap_or("-"));
            println!("dhcpd config:  {}", lifecycle.config().dhcpd_conf.display());
            println!("ip forwarding: {}", if forwarding { "on" } else { "off" });
        }
        Command::Config(_) => {}
    }

    Ok(())
}

fn setup_logging(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("invalid log filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

fn log_report(operation: &str, report: &Report) {
    for step in report.steps() {
        match step.status {
            StepStatus::Ok => info!(operation, step = %step.action, "ok"),
            StepStatus::Failed(ref message) => {
                error!(operation, step = %step.action, error = %message, "failed")
            }
        }
    }
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}
