use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod host;
mod runner;

#[derive(Parser)]
#[command(name = "wakeguard-cli", version, about = "Wakeguard CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Alarm management
    Alarm {
        #[command(subcommand)]
        action: commands::alarm::AlarmAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Reconcile the previous run and fire due alarms
    Launch(commands::launch::LaunchArgs),
    /// Ring an alarm now
    Ring(commands::ring::RingArgs),
    /// Ringing sessions and consequence queues
    Session {
        #[command(subcommand)]
        action: commands::session::SessionAction,
    },
}

fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("wakeguard_core=info,wakeguard_cli=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Alarm { action } => commands::alarm::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::Launch(args) => commands::launch::run(args),
        Commands::Ring(args) => commands::ring::run(args),
        Commands::Session { action } => commands::session::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
