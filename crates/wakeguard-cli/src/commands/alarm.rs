use clap::Subcommand;
use chrono::Utc;
use wakeguard_core::{AlarmDefinition, ConsequenceKind, Penalty, WeekdaySet};

use crate::host;

#[derive(Subcommand)]
pub enum AlarmAction {
    /// Create an alarm and register its next occurrence
    Add {
        /// Time of day, HH:MM
        #[arg(long)]
        time: String,
        /// Active weekdays, 0 = Sunday (e.g. "1,3,5"). Omit for a one-shot alarm
        #[arg(long, value_delimiter = ',')]
        days: Vec<u8>,
        #[arg(long, default_value = "")]
        label: String,
        /// Consequences fired in order on evasion (message, call, media, mail)
        #[arg(long, value_delimiter = ',')]
        consequences: Vec<String>,
        /// Penalty amount in minor currency units
        #[arg(long)]
        penalty: Option<u64>,
        #[arg(long, default_value = "USD")]
        currency: String,
        /// Ring at full level instead of ramping up
        #[arg(long)]
        no_ramp: bool,
        /// Schedule a follow-up check after dismissal
        #[arg(long)]
        recheck: bool,
        #[arg(long)]
        media_uri: Option<String>,
        /// Store the alarm switched off
        #[arg(long)]
        disabled: bool,
    },
    /// List alarms
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an alarm and cancel its registrations
    Remove { id: String },
    /// Switch an alarm on and register it
    Enable { id: String },
    /// Switch an alarm off and cancel it
    Disable { id: String },
    /// Print the next trigger instant
    Next { id: String },
}

pub fn run(action: AlarmAction) -> Result<(), Box<dyn std::error::Error>> {
    let mut host = host::open(false)?;
    let now = Utc::now();
    match action {
        AlarmAction::Add {
            time,
            days,
            label,
            consequences,
            penalty,
            currency,
            no_ramp,
            recheck,
            media_uri,
            disabled,
        } => {
            let (hour, minute) = parse_time(&time)?;
            let kinds = consequences
                .iter()
                .map(|c| ConsequenceKind::parse(c.trim()).ok_or_else(|| format!("unknown consequence: {c}")))
                .collect::<Result<Vec<_>, _>>()?;

            let mut def = AlarmDefinition::new(
                uuid::Uuid::new_v4().to_string(),
                hour,
                minute,
                WeekdaySet::from_days(&days)?,
            )?
            .with_label(label)
            .with_consequences(kinds);
            def.penalty = penalty.map(|amount_minor| Penalty {
                amount_minor,
                currency,
            });
            def.ramp_enabled = !no_ramp;
            def.delayed_recheck_enabled = recheck;
            def.media_uri = media_uri;
            def.enabled = !disabled;

            let handle = host.engine.save_alarm(&def, now)?;
            let out = serde_json::json!({
                "alarm": def,
                "next_trigger": handle.map(|h| h.fire_at),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        AlarmAction::List { json } => {
            let alarms = host.engine.store().alarms()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&alarms)?);
            } else if alarms.is_empty() {
                println!("no alarms");
            } else {
                for def in &alarms {
                    let days: Vec<String> = def.weekdays.days().iter().map(u8::to_string).collect();
                    println!(
                        "{}  {:02}:{:02}  [{}]  {}  {}",
                        def.id,
                        def.hour,
                        def.minute,
                        if days.is_empty() { "once".to_string() } else { days.join(",") },
                        if def.enabled { "on " } else { "off" },
                        def.display_label()
                    );
                }
            }
        }
        AlarmAction::Remove { id } => {
            if !host.engine.remove_alarm(&id)? {
                return Err(format!("unknown alarm: {id}").into());
            }
            println!("removed {id}");
        }
        AlarmAction::Enable { id } => set_enabled(&mut host, &id, true)?,
        AlarmAction::Disable { id } => set_enabled(&mut host, &id, false)?,
        AlarmAction::Next { id } => {
            let def = load(&host, &id)?;
            match host.engine.scheduler().next_trigger(&def, now) {
                Some(at) => println!("{}", at.to_rfc3339()),
                None => println!("none"),
            }
        }
    }
    Ok(())
}

fn load(host: &host::Host, id: &str) -> Result<AlarmDefinition, Box<dyn std::error::Error>> {
    host.engine
        .store()
        .alarm(id)?
        .ok_or_else(|| format!("unknown alarm: {id}").into())
}

fn set_enabled(host: &mut host::Host, id: &str, enabled: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut def = load(host, id)?;
    def.enabled = enabled;
    match host.engine.save_alarm(&def, Utc::now())? {
        Some(handle) => println!("{id} enabled, next {}", handle.fire_at.to_rfc3339()),
        None => println!("{id} disabled"),
    }
    Ok(())
}

/// Parse "HH:MM".
fn parse_time(value: &str) -> Result<(u32, u32), String> {
    let (h, m) = value
        .split_once(':')
        .ok_or_else(|| format!("invalid time '{value}', expected HH:MM"))?;
    let hour = h.trim().parse().map_err(|_| format!("invalid hour in '{value}'"))?;
    let minute = m.trim().parse().map_err(|_| format!("invalid minute in '{value}'"))?;
    Ok((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_time_of_day() {
        assert_eq!(parse_time("07:05"), Ok((7, 5)));
        assert!(parse_time("0705").is_err());
        assert!(parse_time("aa:05").is_err());
    }
}
