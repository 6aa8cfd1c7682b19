use time::{Duration, OffsetDateTime};

pub mod repo;
pub mod report;

pub use repo::{LoginLog, LoginMethod, NewLoginLog, Page};
pub use report::{SuspiciousActivity, SystemLoginStats, UserLoginStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowUnit {
    Minutes,
    Hours,
    Days,
}

/// Trailing time window for failure counts and abuse reports.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub amount: i64,
    pub unit: WindowUnit,
}

impl Window {
    pub fn minutes(amount: i64) -> Self {
        Self { amount, unit: WindowUnit::Minutes }
    }

    pub fn hours(amount: i64) -> Self {
        Self { amount, unit: WindowUnit::Hours }
    }

    pub fn days(amount: i64) -> Self {
        Self { amount, unit: WindowUnit::Days }
    }

    pub fn start(&self, now: OffsetDateTime) -> OffsetDateTime {
        let span = match self.unit {
            WindowUnit::Minutes => Duration::minutes(self.amount),
            WindowUnit::Hours => Duration::hours(self.amount),
            WindowUnit::Days => Duration::days(self.amount),
        };
        now - span
    }
}
