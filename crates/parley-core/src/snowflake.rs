//! Snowflake identifiers: monotonic 64-bit IDs whose high bits encode a
//! millisecond timestamp, so ordering by value equals ordering by creation
//! time. Every message, channel, author and server ID in this crate is a
//! snowflake.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discord's epoch, in Unix milliseconds (2015-01-01T00:00:00Z). Snowflakes
/// encode a millisecond offset from this epoch in their high 42 bits.
pub const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

/// A monotonic 64-bit identifier. `0` is reserved to mean "unset".
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Snowflake(pub u64);

impl Snowflake {
    pub const UNSET: Snowflake = Snowflake(0);

    pub fn new(value: u64) -> Self {
        Snowflake(value)
    }

    pub fn is_unset(self) -> bool {
        self.0 == 0
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// Millisecond Unix timestamp encoded in the high bits of the snowflake.
    pub fn to_unix_millis(self) -> u64 {
        (self.0 >> 22) + DISCORD_EPOCH_MS
    }

    /// Human-readable `YYYY-MM-DD HH:MM:SS` rendering of the encoded
    /// timestamp, in UTC.
    pub fn friendly(self) -> String {
        let millis = self.to_unix_millis() as i64;
        match Utc.timestamp_millis_opt(millis) {
            chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            _ => "0000-00-00 00:00:00".to_string(),
        }
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Snowflake {
    fn from(value: u64) -> Self {
        Snowflake(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_is_zero() {
        assert!(Snowflake::UNSET.is_unset());
        assert!(!Snowflake(1).is_unset());
    }

    #[test]
    fn ordering_matches_value() {
        assert!(Snowflake(100) < Snowflake(101));
        let mut ids = vec![Snowflake(5), Snowflake(1), Snowflake(3)];
        ids.sort();
        assert_eq!(ids, vec![Snowflake(1), Snowflake(3), Snowflake(5)]);
    }

    #[test]
    fn timestamp_roundtrips_discord_epoch() {
        // A snowflake whose top bits are exactly zero sits at the epoch.
        let epoch_flake = Snowflake(0);
        assert_eq!(epoch_flake.to_unix_millis(), DISCORD_EPOCH_MS);
    }
}
