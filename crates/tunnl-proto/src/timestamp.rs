//! Split-epoch timestamps
//!
//! Session start times cross the wire as `{ "seconds": …, "nanos": … }`
//! so dashboard clients can compute sub-second ages without parsing
//! date strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Seconds since the Unix epoch plus the sub-second remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        Utc::now().into()
    }

    /// Convert back to a chrono datetime (None if out of range)
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds, self.nanos)
    }

    /// Milliseconds since the Unix epoch (the dashboard's age basis)
    pub fn as_millis(&self) -> i64 {
        self.seconds * 1000 + i64::from(self.nanos) / 1_000_000
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self {
            seconds: dt.timestamp(),
            nanos: dt.timestamp_subsec_nanos(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let ts = Timestamp::new(1712345678, 123456789);
        let json = serde_json::to_value(&ts).unwrap();
        assert_eq!(json["seconds"], 1712345678);
        assert_eq!(json["nanos"], 123456789);
    }

    #[test]
    fn test_roundtrip_datetime() {
        let now = Utc::now();
        let ts: Timestamp = now.into();
        assert_eq!(ts.to_datetime(), Some(now));
    }

    #[test]
    fn test_as_millis() {
        let ts = Timestamp::new(10, 500_000_000);
        assert_eq!(ts.as_millis(), 10_500);
    }
}
