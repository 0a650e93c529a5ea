use chrono::{DateTime, FixedOffset, Offset, Utc};

/// Supplies the session key for uploads that do not name one.
pub trait SessionClock: Send + Sync {
    fn session_key(&self) -> String;
}

/// One session per calendar day (`%Y-%m-%d`) at a fixed UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct DailyBucket {
    offset: FixedOffset,
}

/// Default offset: UTC+05:30.
const DEFAULT_OFFSET_MINUTES: i32 = 330;

impl DailyBucket {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// `None` when the offset is out of range (more than a day either way).
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(Self::new)
    }

    /// Session key for the given instant.
    pub fn key_at(&self, instant: DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.offset)
            .format("%Y-%m-%d")
            .to_string()
    }
}

impl Default for DailyBucket {
    fn default() -> Self {
        Self::from_offset_minutes(DEFAULT_OFFSET_MINUTES)
            .unwrap_or_else(|| Self::new(Utc.fix()))
    }
}

impl SessionClock for DailyBucket {
    fn session_key(&self) -> String {
        self.key_at(Utc::now())
    }
}

/// Always the same session key.
#[derive(Debug, Clone)]
pub struct FixedSession(pub String);

impl SessionClock for FixedSession {
    fn session_key(&self) -> String {
        self.0.clone()
    }
}
