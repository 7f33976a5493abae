//! Serialization helpers for common types.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Serde serialization module for Duration as seconds.
pub mod duration_serde {
    use super::*;

    /// Serializes Duration as seconds (u64).
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    /// Deserializes Duration from seconds (u64).
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde serialization module for `DateTime<Utc>` as Unix seconds (a float,
/// per §6: "Timestamps carried in payloads are Unix seconds (float)").
pub mod unix_timestamp {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

    /// Serializes a UTC timestamp as Unix seconds.
    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let secs = dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9;
        secs.serialize(serializer)
    }

    /// Deserializes a UTC timestamp from Unix seconds.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        let whole = secs.trunc() as i64;
        let nanos = (secs.fract() * 1e9).round() as u32;
        Utc.timestamp_opt(whole, nanos)
            .single()
            .ok_or_else(|| D::Error::custom(format!("invalid unix timestamp: {secs}")))
    }
}
