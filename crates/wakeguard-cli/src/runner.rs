//! Tick loop driving the engine while something rings or executes.

use std::error::Error;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use wakeguard_core::AlarmEngine;

use crate::host::emit;

/// How a tick loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEnd {
    Elapsed,
    Idle,
    /// Ctrl-C. Whatever was ringing is left for the next launch to find.
    Interrupted,
}

/// Tick every `tick_ms` until `duration` has passed.
pub async fn ring_for<Tz: TimeZone>(
    engine: &mut AlarmEngine<Tz>,
    duration: Duration,
    tick_ms: u64,
) -> Result<LoopEnd, Box<dyn Error>> {
    let deadline = tokio::time::Instant::now() + duration;
    let mut interval = tokio::time::interval(Duration::from_millis(tick_ms.max(1)));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let tick = engine.tick(Utc::now());
                emit(&tick.events)?;
                for (alarm_id, level) in &tick.levels {
                    tracing::info!(%alarm_id, level = *level, "ringing");
                }
                if tokio::time::Instant::now() >= deadline {
                    return Ok(LoopEnd::Elapsed);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupted");
                return Ok(LoopEnd::Interrupted);
            }
        }
    }
}

/// Tick until no alarm rings and no consequence runs.
pub async fn run_until_idle<Tz: TimeZone>(
    engine: &mut AlarmEngine<Tz>,
    tick_ms: u64,
) -> Result<LoopEnd, Box<dyn Error>> {
    tick_while(engine, tick_ms, |engine| engine.is_active()).await
}

/// Tick until the consequence executor is idle. A ringing alarm does not
/// keep this loop alive.
pub async fn run_consequences<Tz: TimeZone>(
    engine: &mut AlarmEngine<Tz>,
    tick_ms: u64,
) -> Result<LoopEnd, Box<dyn Error>> {
    tick_while(engine, tick_ms, |engine| engine.executor().is_busy()).await
}

async fn tick_while<Tz: TimeZone>(
    engine: &mut AlarmEngine<Tz>,
    tick_ms: u64,
    busy: impl Fn(&AlarmEngine<Tz>) -> bool,
) -> Result<LoopEnd, Box<dyn Error>> {
    let mut interval = tokio::time::interval(Duration::from_millis(tick_ms.max(1)));
    while busy(&*engine) {
        tokio::select! {
            _ = interval.tick() => {
                let tick = engine.tick(Utc::now());
                emit(&tick.events)?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupted, consequences resume on next launch");
                return Ok(LoopEnd::Interrupted);
            }
        }
    }
    Ok(LoopEnd::Idle)
}
