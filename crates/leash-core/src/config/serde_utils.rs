//! Serde helpers for configuration fields

/// Seconds where `0` means "disabled"
///
/// Deserializes `0` to `None`, serializes `None` back to `0`, so a config
/// file can switch off idle expiry or the execution timeout:
///
/// ```toml
/// idle_timeout = 0
/// ```
pub mod optional_duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.map(|d| d.as_secs()).unwrap_or(0))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok((secs > 0).then(|| Duration::from_secs(secs)))
    }
}
