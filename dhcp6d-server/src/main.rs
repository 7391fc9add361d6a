use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dhcp6d_core::Error;
use dhcp6d_server::{Master, ServerConfig};

#[derive(Parser)]
#[command(name = "ipv6-dhcpd")]
#[command(version, about = "A DHCPv6 server", long_about = None)]
struct Cli {
    /// The configuration file
    config: PathBuf,

    /// Increase verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Override the PID file location
    #[arg(short = 'p', long = "pidfile")]
    pidfile: Option<PathBuf>,

    /// Print the parsed configuration and exit
    #[arg(short = 'C', long = "show-config")]
    show_config: bool,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();
}

fn exit_code_for(error: &Error) -> ExitCode {
    match error {
        Error::Config(_) | Error::InvalidParameter { .. } => ExitCode::from(1),
        Error::Privilege(_) => ExitCode::from(3),
        _ => ExitCode::from(2),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match ServerConfig::load(&cli.config) {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "cannot load configuration");
            return exit_code_for(&error);
        }
    };
    if let Some(pidfile) = cli.pidfile {
        config.pid_file = pidfile;
    }

    if cli.show_config {
        print!("{}", config.describe());
        return ExitCode::SUCCESS;
    }

    info!(config = %cli.config.display(), "starting DHCPv6 server");
    match Master::new(cli.config, config).run().await {
        Ok(()) => {
            info!("server stopped");
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(%error, "server failed");
            exit_code_for(&error)
        }
    }
}
