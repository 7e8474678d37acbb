//! Warden CLI - device-compliance enforcement agent.
//!
//! Runs the reconciliation loop, inspects persisted lock state, and
//! takes one-shot tamper snapshots for diagnostics.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use warden_core::store::ComplianceStateStore;
use warden_core::tamper::TamperDetector;
use warden_core::{ComplianceAgent, DeviceIdentity, WardenConfig};
use warden_platform::{create_platform_control, create_platform_probes, detect_control_capabilities};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Warden - device-compliance enforcement agent.
///
/// Warden keeps a managed device's lock state synchronized with its
/// remote authority: it aggregates local tamper signals, reports
/// heartbeats, applies lock/unlock directives, and escalates repeated
/// violations, surviving offline periods through a durable command
/// queue.
#[derive(Parser)]
#[command(name = "warden")]
#[command(version = VERSION)]
#[command(about = "Device-compliance enforcement agent")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent loop (heartbeat + tamper re-check)
    Run {
        /// Authority endpoint base URL
        #[arg(long, default_value = "https://devices.sponsa.app")]
        endpoint: String,

        /// Device-agent API key
        #[arg(long, env = "WARDEN_API_KEY", default_value = "")]
        api_key: String,

        /// Stable device identifier
        #[arg(long)]
        device_id: String,

        /// Durable state directory
        #[arg(long, default_value = "/var/lib/warden")]
        state_dir: PathBuf,

        /// Heartbeat interval in seconds
        #[arg(long, default_value = "180")]
        heartbeat: u64,

        /// Tamper re-check interval in seconds
        #[arg(long, default_value = "30")]
        recheck: u64,
    },

    /// Print the persisted lock state (boot tier)
    Status {
        /// Stable device identifier
        #[arg(long)]
        device_id: String,

        /// Durable state directory
        #[arg(long, default_value = "/var/lib/warden")]
        state_dir: PathBuf,
    },

    /// Take a one-shot tamper snapshot
    Tamper,

    /// Show platform control capabilities
    Info,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Some(Commands::Run {
            endpoint,
            api_key,
            device_id,
            state_dir,
            heartbeat,
            recheck,
        }) => {
            let config = WardenConfig {
                authority_endpoint: endpoint,
                api_key,
                device_id: device_id.clone(),
                state_dir,
                heartbeat_interval: Duration::from_secs(heartbeat),
                tamper_interval: Duration::from_secs(recheck),
                ..WardenConfig::default()
            };

            let identity = DeviceIdentity {
                device_id,
                ..DeviceIdentity::default()
            };

            let control = create_platform_control("warden")?;
            let probes = create_platform_probes();

            let agent = ComplianceAgent::start(config, identity, control, probes).await?;
            println!("warden {VERSION} running; Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            agent.stop().await?;
        },

        Some(Commands::Status {
            device_id,
            state_dir,
        }) => match ComplianceStateStore::read_boot_record(&state_dir, &device_id) {
            Some(record) => {
                if cli.format == "json" {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                } else {
                    println!("state:     {:?}", record.state);
                    println!("lock type: {}", record.lock_type.as_str());
                    println!("reason:    {}", record.reason);
                    println!("source:    {:?}", record.source);
                    println!("timestamp: {}", record.timestamp);
                    println!(
                        "resolved:  {}",
                        record
                            .resolved_at
                            .map(|t| t.to_string())
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
            },
            None => println!("no persisted lock state"),
        },

        Some(Commands::Tamper) => {
            let detector = TamperDetector::new(create_platform_probes());
            let status = detector.evaluate();

            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("severity:            {:?}", status.severity);
                println!("rooted:              {}", status.rooted);
                println!("usb debugging:       {}", status.usb_debugging);
                println!("developer mode:      {}", status.developer_mode);
                println!("bootloader unlocked: {}", status.bootloader_unlocked);
                println!("custom rom:          {}", status.custom_rom);
                if !status.indicators.is_empty() {
                    println!("indicators:");
                    for indicator in &status.indicators {
                        println!("  - {indicator}");
                    }
                }
            }
        },

        Some(Commands::Info) | None => {
            let caps = detect_control_capabilities();
            println!("warden {VERSION}");
            println!("device owner:         {}", caps.has_device_owner);
            println!("lock task:            {}", caps.supports_lock_task);
            println!("package suspension:   {}", caps.supports_package_suspension);
            println!("user restrictions:    {}", caps.supports_user_restrictions);
            println!("signal sources:       {}", caps.has_signal_sources);
            println!(
                "hard enforcement:     {}",
                caps.supports_hard_enforcement()
            );
        },
    }

    Ok(())
}
