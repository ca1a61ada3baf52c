use chrono::{Duration, Utc};

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::messaging::{Message, Protections};
use crate::settings::SecuritySettings;
use super::BindingElement;

/// Stamps outgoing messages with their creation time and rejects stale incoming ones.
#[derive(Clone, Debug)]
pub struct ExpirationProtection {
    maximum_age: Duration,
    maximum_skew: Duration,
}

impl ExpirationProtection {
    /// Use the age and clock skew bounds of the settings.
    pub fn new(settings: &SecuritySettings) -> Self {
        ExpirationProtection {
            maximum_age: settings.maximum_message_age,
            maximum_skew: settings.maximum_clock_skew,
        }
    }
}

impl BindingElement for ExpirationProtection {
    fn protection(&self) -> Protections {
        Protections::EXPIRATION
    }

    fn process_outgoing(&self, message: &mut Message, _: &Deadline) -> Result<Option<Protections>> {
        if message.description().timestamp.is_none() {
            return Ok(None);
        }

        message.set_creation_date(Utc::now())?;
        Ok(Some(Protections::EXPIRATION))
    }

    fn process_incoming(&self, message: &mut Message, _: &Deadline) -> Result<Option<Protections>> {
        if message.description().timestamp.is_none() {
            return Ok(None);
        }

        let created = message
            .creation_date()
            .ok_or_else(|| Error::violation(format!("{:?} lacks its creation time", message.kind())))?;
        let now = Utc::now();

        // Both instants are in chrono's range, their difference always fits a Duration.
        let age = now.signed_duration_since(created);
        if age > self.maximum_age {
            tracing::warn!(kind = ?message.kind(), %created, "rejected expired message");
            return Err(Error::ExpiredMessage {
                kind: message.kind(),
                expired_at: created.checked_add_signed(self.maximum_age).unwrap_or(created),
            });
        }

        if -age > self.maximum_skew {
            tracing::warn!(kind = ?message.kind(), %created, "message claims to be from the future");
            return Err(Error::violation(format!(
                "message created at {} lies beyond the allowed clock skew",
                created
            )));
        }

        Ok(Some(Protections::EXPIRATION))
    }
}
