//! Serde helpers for the `[timings]` table

/// Timing values as integer milliseconds
///
/// Written back as a plain millisecond count. When reading, a bare integer
/// is milliseconds, and a string may carry an `ms` or `s` suffix, so
/// `relay_settle = 500`, `relay_settle = "500ms"` and `tick_interval = "1s"`
/// are all accepted.
pub mod duration_millis {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(millis) => Ok(Duration::from_millis(millis)),
            Raw::Text(text) => parse(&text).ok_or_else(|| {
                D::Error::custom(format!(
                    "invalid duration {:?}, expected milliseconds like 500 or \"500ms\" or \"2s\"",
                    text
                ))
            }),
        }
    }

    fn parse(text: &str) -> Option<Duration> {
        let text = text.trim();
        if let Some(millis) = text.strip_suffix("ms") {
            return millis.trim().parse().ok().map(Duration::from_millis);
        }
        if let Some(secs) = text.strip_suffix('s') {
            return secs.trim().parse().ok().map(Duration::from_secs);
        }
        text.parse().ok().map(Duration::from_millis)
    }
}
