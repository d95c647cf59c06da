//! (De)serializes a [`Duration`] as a number of seconds, fractions allowed.

use serde::{Deserialize, Deserializer, Serializer, de::Error};
use std::time::Duration;

/// Serializes `duration` as seconds.
pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Deserializes seconds into a [`Duration`].
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
}
