//! gcom: ground station links for the companion computer and the autopilot.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use gcom_runner::{logging, GcomConfig, GroundStation, Overrides};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "gcom", version, about = "Ground station companion and autopilot links")]
struct Args {
    /// YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to accept the companion computer on.
    #[arg(long)]
    companion_port: Option<u16>,

    /// Autopilot bridge host.
    #[arg(long)]
    autopilot_address: Option<String>,

    /// Autopilot bridge port.
    #[arg(long)]
    autopilot_port: Option<u16>,

    /// Tracing filter. RUST_LOG takes precedence.
    #[arg(long)]
    log_filter: Option<String>,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match GcomConfig::load_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("gcom: {}", e);
            return ExitCode::FAILURE;
        }
    };
    config.apply(Overrides {
        companion_port: args.companion_port,
        autopilot_address: args.autopilot_address,
        autopilot_port: args.autopilot_port,
        log_filter: args.log_filter,
    });
    if let Err(e) = config.validate() {
        eprintln!("gcom: {}", e);
        return ExitCode::FAILURE;
    }

    if args.print_config {
        return match config.to_yaml() {
            Ok(yaml) => {
                print!("{}", yaml);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("gcom: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    logging::init(&config.log_filter);
    gcom_metrics::describe_metrics();

    let station = match GroundStation::start(&config).await {
        Ok(station) => station,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("gcom running, press Ctrl+C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("cannot listen for Ctrl+C: {}", e);
    }
    info!("shutdown requested");

    let stats = station.stats();
    station.shutdown().await;
    info!(
        "received {} tagged and {} untagged images, {} missing; {} uploads ok, {} failed",
        stats.images_tagged, stats.images_untagged, stats.missing_images, stats.uploads_succeeded, stats.uploads_failed
    );
    ExitCode::SUCCESS
}
