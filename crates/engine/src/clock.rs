//! Timestamp source for execution records.

use chrono::{DateTime, Duration, TimeZone, Utc};

/// 2000-01-01T00:00:00Z.
const ORDINAL_EPOCH_SECS: i64 = 946_684_800;

/// Wall-clock time, or an ordinal clock that starts at a fixed epoch and
/// advances one second per reading so traces are reproducible.
#[derive(Debug, Clone)]
pub enum Clock {
    Wall,
    Ordinal { next: DateTime<Utc> },
}

impl Clock {
    pub fn wall() -> Self {
        Self::Wall
    }

    pub fn ordinal() -> Self {
        Self::Ordinal {
            next: Utc
                .timestamp_opt(ORDINAL_EPOCH_SECS, 0)
                .single()
                .unwrap_or_default(),
        }
    }

    pub fn now(&mut self) -> DateTime<Utc> {
        match self {
            Self::Wall => Utc::now(),
            Self::Ordinal { next } => {
                let now = *next;
                *next = now + Duration::seconds(1);
                now
            }
        }
    }
}
