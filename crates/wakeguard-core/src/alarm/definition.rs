//! Alarm definitions as configured by the user.

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// One escalating action fired when an alarm is evaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsequenceKind {
    /// Text message to an accountability contact
    Message,
    /// Phone call intent
    Call,
    /// Media playback that must run to completion
    MediaPlayback,
    /// Mail intent
    Mail,
}

impl ConsequenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsequenceKind::Message => "message",
            ConsequenceKind::Call => "call",
            ConsequenceKind::MediaPlayback => "media_playback",
            ConsequenceKind::Mail => "mail",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "message" => Some(ConsequenceKind::Message),
            "call" => Some(ConsequenceKind::Call),
            "media_playback" | "media" => Some(ConsequenceKind::MediaPlayback),
            "mail" => Some(ConsequenceKind::Mail),
            _ => None,
        }
    }
}

/// Monetary penalty attached to an alarm (in minor currency units).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Penalty {
    pub amount_minor: u64,
    pub currency: String,
}

/// A set of weekdays, bit `n` set for weekday `n` (0 = Sunday .. 6 = Saturday).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const EMPTY: WeekdaySet = WeekdaySet(0);

    /// Build from weekday numbers, rejecting anything above 6.
    pub fn from_days(days: &[u8]) -> Result<Self, ValidationError> {
        let mut bits = 0u8;
        for &day in days {
            if day > 6 {
                return Err(ValidationError::InvalidWeekday(day));
            }
            bits |= 1 << day;
        }
        Ok(Self(bits))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains_day(self, day: u8) -> bool {
        day <= 6 && self.0 & (1 << day) != 0
    }

    pub fn contains(self, weekday: Weekday) -> bool {
        self.contains_day(weekday.num_days_from_sunday() as u8)
    }

    pub fn days(self) -> Vec<u8> {
        (0..=6).filter(|d| self.contains_day(*d)).collect()
    }
}

impl TryFrom<Vec<u8>> for WeekdaySet {
    type Error = ValidationError;

    fn try_from(days: Vec<u8>) -> Result<Self, Self::Error> {
        Self::from_days(&days)
    }
}

impl From<WeekdaySet> for Vec<u8> {
    fn from(set: WeekdaySet) -> Self {
        set.days()
    }
}

/// A user-owned alarm. Read-only to the engine apart from the one-shot
/// auto-disable performed after a non-recurring alarm fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmDefinition {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub hour: u32,
    pub minute: u32,
    /// Empty means "no recurrence": fire once, then disable.
    #[serde(default)]
    pub weekdays: WeekdaySet,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fired in this order when the alarm is evaded.
    #[serde(default)]
    pub consequences: Vec<ConsequenceKind>,
    #[serde(default)]
    pub penalty: Option<Penalty>,
    #[serde(default = "default_true")]
    pub ramp_enabled: bool,
    #[serde(default)]
    pub delayed_recheck_enabled: bool,
    /// Media played by the `MediaPlayback` consequence.
    #[serde(default)]
    pub media_uri: Option<String>,
}

fn default_true() -> bool {
    true
}

impl AlarmDefinition {
    /// Create an enabled alarm with no consequences.
    pub fn new(
        id: impl Into<String>,
        hour: u32,
        minute: u32,
        weekdays: WeekdaySet,
    ) -> Result<Self, ValidationError> {
        let def = Self {
            id: id.into(),
            label: String::new(),
            hour,
            minute,
            weekdays,
            enabled: true,
            consequences: Vec::new(),
            penalty: None,
            ramp_enabled: true,
            delayed_recheck_enabled: false,
            media_uri: None,
        };
        def.validate()?;
        Ok(def)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_consequences(mut self, consequences: Vec<ConsequenceKind>) -> Self {
        self.consequences = consequences;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.hour > 23 || self.minute > 59 {
            return Err(ValidationError::InvalidTimeOfDay {
                hour: self.hour,
                minute: self.minute,
            });
        }
        if self.id.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "id".into(),
                message: "alarm id must not be empty".into(),
            });
        }
        Ok(())
    }

    pub fn time_of_day(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }

    pub fn is_recurring(&self) -> bool {
        !self.weekdays.is_empty()
    }

    /// Label shown to the user, falling back to the time of day.
    pub fn display_label(&self) -> String {
        if self.label.is_empty() {
            format!("Alarm {:02}:{:02}", self.hour, self.minute)
        } else {
            self.label.clone()
        }
    }
}
