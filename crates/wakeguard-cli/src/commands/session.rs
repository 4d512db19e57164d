use chrono::Utc;
use clap::Subcommand;
use wakeguard_core::storage::schedule_store::Stored;

use crate::host::{self, emit};
use crate::runner;

#[derive(Subcommand)]
pub enum SessionAction {
    /// Print persisted sessions and consequence queues as JSON
    Status,
    /// Dismiss a ringing alarm
    Dismiss { id: String },
    /// Evade a ringing alarm and run its consequences
    Evade {
        id: String,
        #[arg(long, default_value = "snooze")]
        reason: String,
        #[arg(long)]
        dry_run: bool,
    },
}

pub fn run(action: SessionAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        SessionAction::Status => {
            let host = host::open(false)?;
            let store = host.engine.store();
            let sessions: Vec<serde_json::Value> = store
                .sessions()?
                .into_iter()
                .map(stored_json)
                .collect::<Result<_, _>>()?;
            let queues: Vec<serde_json::Value> = store
                .queues()?
                .into_iter()
                .map(stored_json)
                .collect::<Result<_, _>>()?;
            let out = serde_json::json!({ "sessions": sessions, "queues": queues });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        SessionAction::Dismiss { id } => {
            let mut host = host::open(false)?;
            emit(&host.engine.launch(Utc::now())?)?;
            emit(&host.engine.dismiss(&id, Utc::now())?)?;
        }
        SessionAction::Evade { id, reason, dry_run } => {
            let mut host = host::open(dry_run)?;
            emit(&host.engine.launch(Utc::now())?)?;
            emit(&host.engine.evade(&id, &reason, Utc::now())?)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(runner::run_until_idle(&mut host.engine, 250))?;
        }
    }
    Ok(())
}

fn stored_json<T: serde::Serialize>(record: Stored<T>) -> Result<serde_json::Value, serde_json::Error> {
    match record {
        Stored::Valid(value) => serde_json::to_value(value),
        Stored::Corrupt { key, message } => Ok(serde_json::json!({ "key": key, "corrupt": message })),
    }
}
