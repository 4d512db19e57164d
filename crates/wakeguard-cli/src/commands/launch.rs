use chrono::Utc;
use clap::Args;

use crate::host::{self, emit};
use crate::runner;

#[derive(Args)]
pub struct LaunchArgs {
    /// Record consequences as skipped instead of firing them
    #[arg(long)]
    pub dry_run: bool,
    /// Return after reconciliation without running consequences to the end
    #[arg(long)]
    pub no_wait: bool,
    #[arg(long, default_value = "250")]
    pub tick_ms: u64,
}

/// Reconcile the previous run, fire due notifications, and run any
/// consequences to completion.
pub fn run(args: LaunchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut host = host::open(args.dry_run)?;
    let now = Utc::now();
    emit(&host.engine.launch(now)?)?;

    for payload in host.notifications.take_due(now)? {
        emit(&host.engine.trigger(&payload, now)?)?;
        eprintln!(
            "alarm {} is ringing; run `wakeguard-cli ring {}` to attend to it",
            payload.alarm_id, payload.alarm_id
        );
    }

    if args.no_wait || !host.engine.executor().is_busy() {
        return Ok(());
    }
    // Only consequences are driven here; a ringing alarm is left to `ring`.
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(runner::run_consequences(&mut host.engine, args.tick_ms))?;
    Ok(())
}
