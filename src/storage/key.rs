use bytes::Bytes;
use std::hash::{Hash, Hasher};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Key identity plus an optional absolute expiration instant.
///
/// Two keys are equal iff their bytes match; the expiration is metadata and
/// takes no part in equality or hashing.
#[derive(Debug, Clone)]
pub struct DatabaseKey {
    name: Bytes,
    expires_at: Option<SystemTime>,
}

impl DatabaseKey {
    /// A key that never expires.
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            expires_at: None,
        }
    }

    pub fn with_expiration(name: impl Into<Bytes>, expires_at: Option<SystemTime>) -> Self {
        Self {
            name: name.into(),
            expires_at,
        }
    }

    /// A key that expires `ttl` from now, `None` when that instant is not
    /// representable.
    pub fn expiring_in(name: impl Into<Bytes>, ttl: Duration) -> Option<Self> {
        let at = SystemTime::now().checked_add(ttl)?;
        Some(Self::with_expiration(name, Some(at)))
    }

    pub fn name(&self) -> &Bytes {
        &self.name
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    /// Expired iff an instant is set and it is not after `now`.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        is_expired(self.expires_at, now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// Remaining time to live, `None` when the key persists.
    pub fn ttl(&self) -> Option<Duration> {
        self.expires_at.map(|at| {
            at.duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO)
        })
    }
}

impl PartialEq for DatabaseKey {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for DatabaseKey {}

impl Hash for DatabaseKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl From<&str> for DatabaseKey {
    fn from(name: &str) -> Self {
        Self::new(Bytes::copy_from_slice(name.as_bytes()))
    }
}

impl From<Bytes> for DatabaseKey {
    fn from(name: Bytes) -> Self {
        Self::new(name)
    }
}

/// Inclusive expiration check shared by keys and stored entries.
pub(crate) fn is_expired(expires_at: Option<SystemTime>, now: SystemTime) -> bool {
    matches!(expires_at, Some(at) if at <= now)
}

/// Milliseconds since the unix epoch, as persisted in snapshots.
pub fn to_unix_millis(at: SystemTime) -> i64 {
    match at.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}

pub fn from_unix_millis(millis: i64) -> SystemTime {
    if millis >= 0 {
        UNIX_EPOCH + Duration::from_millis(millis as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis(millis.unsigned_abs())
    }
}
