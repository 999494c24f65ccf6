//! Per-subscriber quiet windows ("do not disturb").
//!
//! A window is a pair of local wall-clock minutes-of-day. Both bounds are
//! inclusive, and a start later than the end wraps past midnight:
//! `23:00–07:00` covers 23:00 through 07:00 the next morning.

use chrono::{DateTime, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuietError {
    #[error("invalid time '{0}', expected HH:MM")]
    InvalidTime(String),
}

/// A quiet window in local minutes-of-day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietWindow {
    pub start_minute: u16,
    pub end_minute: u16,
    pub enabled: bool,
}

/// Parse `HH:MM` (24h) into minutes since midnight.
pub fn parse_hhmm(text: &str) -> Result<u16, QuietError> {
    let invalid = || QuietError::InvalidTime(text.to_string());
    let (h, m) = text.trim().split_once(':').ok_or_else(invalid)?;
    let h: u16 = h.parse().map_err(|_| invalid())?;
    let m: u16 = m.parse().map_err(|_| invalid())?;
    if h > 23 || m > 59 {
        return Err(invalid());
    }
    Ok(h * 60 + m)
}

/// Format minutes since midnight as `HH:MM`.
pub fn format_hhmm(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

impl QuietWindow {
    /// Build an enabled window from two `HH:MM` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, QuietError> {
        Ok(Self {
            start_minute: parse_hhmm(start)?,
            end_minute: parse_hhmm(end)?,
            enabled: true,
        })
    }

    /// Whether `minute` falls inside the window, ignoring `enabled`.
    pub fn contains(&self, minute: u16) -> bool {
        if self.start_minute <= self.end_minute {
            self.start_minute <= minute && minute <= self.end_minute
        } else {
            minute >= self.start_minute || minute <= self.end_minute
        }
    }

    /// Whether automatic delivery is suppressed at `local`.
    pub fn is_active_at(&self, local: DateTime<FixedOffset>) -> bool {
        self.enabled && self.contains((local.hour() * 60 + local.minute()) as u16)
    }

    pub fn describe(&self) -> String {
        format!(
            "{} ~ {}",
            format_hhmm(self.start_minute),
            format_hhmm(self.end_minute)
        )
    }
}
