//! Security and transport settings shared by a channel and its binding elements.
//!
//! Settings are constructed once, usually from the hosting application's own configuration
//! format through serde, and handed to the channel builders. All durations serialize as whole
//! seconds.
use std::time::Duration as StdDuration;

use chrono::Duration;

/// Tunables for message protection and transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Messages created longer ago than this are rejected as expired.
    #[serde(with = "seconds_serde")]
    pub maximum_message_age: Duration,

    /// How far in the future a creation timestamp may lie before it is a protocol violation.
    #[serde(with = "seconds_serde")]
    pub maximum_clock_skew: Duration,

    /// Entropy of generated nonces, in bytes.
    pub nonce_bytes: usize,

    /// Accept messages whose nonce is present but empty.
    pub allow_empty_nonces: bool,

    /// Lifetime of associations handed to relying parties.
    #[serde(with = "seconds_serde")]
    pub shared_association_lifetime: Duration,

    /// Lifetime of associations a provider keeps to itself for stateless verification.
    #[serde(with = "seconds_serde")]
    pub private_association_lifetime: Duration,

    /// Upper bound for a single direct exchange with a peer.
    #[serde(with = "std_seconds_serde")]
    pub direct_request_timeout: StdDuration,

    /// Indirect messages whose redirect URL would be longer are sent as a form post instead.
    pub maximum_indirect_url_length: usize,
}

impl SecuritySettings {
    /// Only the age part of the settings changed, as used by tests and tight deployments.
    pub fn with_maximum_message_age(self, maximum_message_age: Duration) -> Self {
        SecuritySettings {
            maximum_message_age,
            ..self
        }
    }

    /// Oldest creation time still acceptable when checked at `now`.
    pub fn oldest_acceptable(&self, now: chrono::DateTime<chrono::Utc>) -> chrono::DateTime<chrono::Utc> {
        now - self.maximum_message_age
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        SecuritySettings {
            maximum_message_age: Duration::minutes(13),
            maximum_clock_skew: Duration::seconds(60),
            nonce_bytes: 16,
            allow_empty_nonces: false,
            shared_association_lifetime: Duration::days(14),
            private_association_lifetime: Duration::days(14),
            direct_request_timeout: StdDuration::from_secs(30),
            maximum_indirect_url_length: 2048,
        }
    }
}

mod seconds_serde {
    use chrono::Duration;
    use serde::de::{Deserialize, Deserializer, Error};
    use serde::ser::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.num_seconds())
    }

    /// Durations are whole, non-negative seconds within chrono's millisecond range.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = i64::deserialize(deserializer)?;
        if !(0..=i64::MAX / 1000).contains(&seconds) {
            return Err(D::Error::custom(format!("duration of {} seconds out of range", seconds)));
        }
        Ok(Duration::seconds(seconds))
    }
}

mod std_seconds_serde {
    use std::time::Duration;
    use serde::de::{Deserialize, Deserializer};
    use serde::ser::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = SecuritySettings::default();
        assert_eq!(settings.maximum_message_age, Duration::minutes(13));
        assert_eq!(settings.maximum_clock_skew, Duration::seconds(60));
        assert_eq!(settings.shared_association_lifetime, Duration::days(14));
        assert!(settings.nonce_bytes >= 16);
        assert!(!settings.allow_empty_nonces);
    }

    #[test]
    fn durations_out_of_range() {
        for json in &[
            r#"{ "maximum_message_age": 9223372036854775807 }"#,
            r#"{ "maximum_clock_skew": -1 }"#,
            r#"{ "shared_association_lifetime": -9223372036854775808 }"#,
        ] {
            assert!(serde_json::from_str::<SecuritySettings>(json).is_err(), "{} was accepted", json);
        }
    }

    #[test]
    fn partial_configuration() {
        let settings: SecuritySettings = serde_json::from_str(
            r#"{ "maximum_message_age": 300, "direct_request_timeout": 5 }"#,
        )
        .unwrap();
        assert_eq!(settings.maximum_message_age, Duration::minutes(5));
        assert_eq!(settings.direct_request_timeout, StdDuration::from_secs(5));
        assert_eq!(settings.maximum_indirect_url_length, 2048);

        let json = serde_json::to_string(&settings).unwrap();
        let back: SecuritySettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }
}
