use std::time::Duration;

use chrono::Utc;
use clap::Args;

use crate::host::{self, emit};
use crate::runner::{self, LoopEnd};

#[derive(Args)]
pub struct RingArgs {
    /// Alarm id
    pub id: String,
    /// How long to ring before resolving
    #[arg(long, default_value = "10")]
    pub secs: u64,
    /// Dismiss once the time is up
    #[arg(long, conflicts_with = "evade")]
    pub dismiss: bool,
    /// Evade once the time is up, with the given reason
    #[arg(long)]
    pub evade: Option<String>,
    /// Record consequences as skipped instead of firing them
    #[arg(long)]
    pub dry_run: bool,
    #[arg(long, default_value = "250")]
    pub tick_ms: u64,
}

/// Ring an alarm now. Without `--dismiss` or `--evade` the session is left
/// behind, as if the app had been killed.
pub fn run(args: RingArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut host = host::open(args.dry_run)?;
    let now = Utc::now();
    emit(&host.engine.launch(now)?)?;
    emit(&host.engine.ring_now(&args.id, now)?)?;

    let rt = tokio::runtime::Runtime::new()?;
    let end = rt.block_on(runner::ring_for(
        &mut host.engine,
        Duration::from_secs(args.secs),
        args.tick_ms,
    ))?;
    if end == LoopEnd::Interrupted {
        return Ok(());
    }

    if args.dismiss {
        emit(&host.engine.dismiss(&args.id, Utc::now())?)?;
    } else if let Some(reason) = args.evade {
        emit(&host.engine.evade(&args.id, &reason, Utc::now())?)?;
        rt.block_on(runner::run_until_idle(&mut host.engine, args.tick_ms))?;
    } else {
        eprintln!("alarm {} left ringing; the next launch will treat it as interrupted", args.id);
    }
    Ok(())
}
