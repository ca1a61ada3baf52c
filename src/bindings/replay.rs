use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::{thread_rng, RngCore};

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::messaging::encoding::extend_url;
use crate::messaging::{format_dated_nonce, parse_dated_nonce};
use crate::messaging::{Message, MessageKind, Protections, ProtocolVersion, Value};
use crate::openid::relying_party::RETURN_TO_NONCE;
use crate::settings::SecuritySettings;
use crate::stores::NonceStore;
use super::BindingElement;

/// Nonce store context of nonces carried in `return_to`.
const RETURN_TO_CONTEXT: &str = "openid.return_to";

/// Attaches a random nonce to outgoing messages and consumes the nonce of incoming ones.
///
/// OpenID 1.1 assertions carry no nonce of their own. A relying party enables
/// `with_return_to_nonces`, which puts a dated nonce into the `return_to` url of its 1.1 checkid
/// requests. The provider signs `return_to`, so the nonce comes back protected and is consumed
/// like any other.
pub struct ReplayProtection {
    store: Arc<dyn NonceStore>,
    nonce_bytes: usize,
    allow_empty: bool,
    return_to_nonces: bool,
    maximum_age: Duration,
    maximum_skew: Duration,
}

impl ReplayProtection {
    /// Consume nonces in the given store.
    pub fn new(store: Arc<dyn NonceStore>, settings: &SecuritySettings) -> Self {
        ReplayProtection {
            store,
            nonce_bytes: settings.nonce_bytes,
            allow_empty: settings.allow_empty_nonces,
            return_to_nonces: false,
            maximum_age: settings.maximum_message_age,
            maximum_skew: settings.maximum_clock_skew,
        }
    }

    /// Also protect OpenID 1.1 assertions, with a nonce in the `return_to` url.
    pub fn with_return_to_nonces(mut self) -> Self {
        self.return_to_nonces = true;
        self
    }

    fn carries_return_to_nonce(&self, message: &Message, kind: MessageKind) -> bool {
        self.return_to_nonces && message.kind() == kind && message.version() == ProtocolVersion::OpenId11
    }

    fn attach_return_to_nonce(&self, message: &mut Message) -> Result<()> {
        let return_to = message
            .url("openid.return_to")
            .ok_or_else(|| Error::violation("a checkid request without return_to can not carry a nonce"))?;
        let nonce = format_dated_nonce(Utc::now(), &self.generate());
        let return_to = extend_url(return_to, vec![(RETURN_TO_NONCE, nonce.as_str())]);
        message.set("openid.return_to", return_to)
    }

    fn consume_return_to_nonce(&self, message: &Message, deadline: &Deadline) -> Result<()> {
        let return_to = message
            .url("openid.return_to")
            .ok_or_else(|| Error::violation("missing openid.return_to"))?;
        let raw = return_to
            .query_pairs()
            .find(|(key, _)| key == RETURN_TO_NONCE)
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| Error::violation("unsolicited OpenID 1.1 assertions are not accepted"))?;
        let (created, nonce) =
            parse_dated_nonce(&raw).ok_or_else(|| Error::format(RETURN_TO_NONCE, "not a dated nonce"))?;
        if nonce.is_empty() {
            return Err(Error::violation("zero-length nonces are not allowed"));
        }

        let age = Utc::now().signed_duration_since(created);
        if age > self.maximum_age {
            tracing::warn!(kind = ?message.kind(), %created, "rejected expired return_to nonce");
            return Err(Error::ExpiredMessage {
                kind: message.kind(),
                expired_at: created.checked_add_signed(self.maximum_age).unwrap_or(created),
            });
        }
        if -age > self.maximum_skew {
            return Err(Error::violation(format!(
                "return_to nonce created at {} lies beyond the allowed clock skew",
                created
            )));
        }

        if !self.store.try_consume(RETURN_TO_CONTEXT, nonce, created, deadline)? {
            tracing::error!(kind = ?message.kind(), "replayed OpenID 1.1 assertion detected");
            return Err(Error::ReplayedMessage { kind: message.kind() });
        }
        Ok(())
    }

    fn generate(&self) -> String {
        let mut bytes = vec![0; self.nonce_bytes];
        thread_rng().fill_bytes(&mut bytes);
        base64::encode_config(&bytes, base64::URL_SAFE_NO_PAD)
    }
}

/// The namespace a message's nonce lives in.
fn context(message: &Message) -> &str {
    match message.description().replay_context.and_then(|part| message.get(part)) {
        Some(Value::Text(text)) => text,
        Some(Value::Url(url)) => url.as_str(),
        _ => "",
    }
}

impl BindingElement for ReplayProtection {
    fn protection(&self) -> Protections {
        Protections::REPLAY
    }

    fn process_outgoing(&self, message: &mut Message, _: &Deadline) -> Result<Option<Protections>> {
        if self.carries_return_to_nonce(message, MessageKind::CheckIdRequest) {
            self.attach_return_to_nonce(message)?;
            return Ok(Some(Protections::REPLAY));
        }

        if message.description().nonce.is_none() {
            return Ok(None);
        }

        message.set_nonce(self.generate())?;
        Ok(Some(Protections::REPLAY))
    }

    fn process_incoming(&self, message: &mut Message, deadline: &Deadline) -> Result<Option<Protections>> {
        if self.carries_return_to_nonce(message, MessageKind::PositiveAssertion) {
            self.consume_return_to_nonce(message, deadline)?;
            return Ok(Some(Protections::REPLAY));
        }

        if message.description().nonce.is_none() {
            return Ok(None);
        }

        let nonce = message
            .nonce()
            .ok_or_else(|| Error::violation(format!("{:?} lacks its nonce", message.kind())))?;
        if nonce.is_empty() && !self.allow_empty {
            return Err(Error::violation("zero-length nonces are not allowed"));
        }

        let timestamp = message
            .creation_date()
            .ok_or_else(|| Error::violation(format!("{:?} lacks its creation time", message.kind())))?;

        let context = context(message);
        if !self.store.try_consume(context, nonce, timestamp, deadline)? {
            tracing::error!(kind = ?message.kind(), context, "replayed message detected");
            return Err(Error::ReplayedMessage { kind: message.kind() });
        }

        Ok(Some(Protections::REPLAY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryNonceStore;

    fn element(settings: &SecuritySettings) -> ReplayProtection {
        let store = Arc::new(MemoryNonceStore::new(Duration::minutes(15)));
        ReplayProtection::new(store, settings)
    }

    fn request(consumer: &str) -> Message {
        let mut message =
            Message::new(MessageKind::AccessProtectedResourceRequest, ProtocolVersion::OAuth10a).unwrap();
        message.set("oauth_consumer_key", consumer).unwrap();
        message.set_creation_date(Utc::now()).unwrap();
        message
    }

    #[test]
    fn nonces_are_unique_and_long() {
        let element = element(&SecuritySettings::default());
        let mut first = request("ck");
        let mut second = request("ck");
        element.process_outgoing(&mut first, &Deadline::none()).unwrap();
        element.process_outgoing(&mut second, &Deadline::none()).unwrap();

        let nonce = first.nonce().unwrap();
        assert!(nonce.len() >= 16);
        assert_ne!(first.nonce(), second.nonce());
    }

    #[test]
    fn second_delivery_is_replay() {
        let element = element(&SecuritySettings::default());
        let mut message = request("ck");
        element.process_outgoing(&mut message, &Deadline::none()).unwrap();

        let mut copy = message.clone();
        assert_eq!(
            element.process_incoming(&mut message, &Deadline::none()).unwrap(),
            Some(Protections::REPLAY)
        );
        assert_eq!(
            element.process_incoming(&mut copy, &Deadline::none()),
            Err(Error::ReplayedMessage {
                kind: MessageKind::AccessProtectedResourceRequest
            })
        );
    }

    #[test]
    fn context_separates_consumers() {
        let element = element(&SecuritySettings::default());
        let mut a = request("consumer-a");
        a.set_nonce("same".into()).unwrap();
        let mut b = a.clone();
        b.set("oauth_consumer_key", "consumer-b").unwrap();

        assert!(element.process_incoming(&mut a, &Deadline::none()).is_ok());
        assert!(element.process_incoming(&mut b, &Deadline::none()).is_ok());
    }

    fn checkid() -> Message {
        Message::new(MessageKind::CheckIdRequest, ProtocolVersion::OpenId11)
            .unwrap()
            .with("openid.mode", "checkid_setup")
            .unwrap()
            .with("openid.return_to", "https://rp.example/return?session=7".parse::<url::Url>().unwrap())
            .unwrap()
    }

    fn legacy_assertion(return_to: &url::Url) -> Message {
        Message::new(MessageKind::PositiveAssertion, ProtocolVersion::OpenId11)
            .unwrap()
            .with("openid.return_to", return_to.clone())
            .unwrap()
    }

    #[test]
    fn legacy_assertion_nonce_in_return_to() {
        let element = element(&SecuritySettings::default()).with_return_to_nonces();
        let mut request = checkid();
        assert_eq!(
            element.process_outgoing(&mut request, &Deadline::none()).unwrap(),
            Some(Protections::REPLAY)
        );
        let return_to = request.url("openid.return_to").unwrap().clone();
        assert!(return_to.query_pairs().any(|(key, _)| key == "session"));
        assert!(return_to.query_pairs().any(|(key, _)| key == RETURN_TO_NONCE));

        let mut first = legacy_assertion(&return_to);
        let mut second = first.clone();
        assert_eq!(
            element.process_incoming(&mut first, &Deadline::none()).unwrap(),
            Some(Protections::REPLAY)
        );
        assert_eq!(
            element.process_incoming(&mut second, &Deadline::none()),
            Err(Error::ReplayedMessage {
                kind: MessageKind::PositiveAssertion
            })
        );
    }

    #[test]
    fn legacy_assertion_without_nonce() {
        let plain = element(&SecuritySettings::default());
        let protecting = element(&SecuritySettings::default()).with_return_to_nonces();
        let mut unsolicited = legacy_assertion(&"https://rp.example/return".parse().unwrap());
        assert!(matches!(
            protecting.process_incoming(&mut unsolicited, &Deadline::none()),
            Err(Error::ProtocolViolation(_))
        ));

        // Without the option 1.1 assertions are left alone.
        assert_eq!(plain.process_incoming(&mut unsolicited, &Deadline::none()).unwrap(), None);
    }

    #[test]
    fn legacy_assertion_nonce_expires() {
        let element = element(&SecuritySettings::default()).with_return_to_nonces();
        let stale = format_dated_nonce(Utc::now() - Duration::hours(1), "abc");
        let return_to = extend_url(
            &"https://rp.example/return".parse().unwrap(),
            vec![(RETURN_TO_NONCE, stale.as_str())],
        );
        assert!(matches!(
            element.process_incoming(&mut legacy_assertion(&return_to), &Deadline::none()),
            Err(Error::ExpiredMessage { .. })
        ));
    }

    #[test]
    fn empty_nonce_policy() {
        let mut message = request("ck");
        message.set_nonce(String::new()).unwrap();
        assert!(matches!(
            element(&SecuritySettings::default()).process_incoming(&mut message.clone(), &Deadline::none()),
            Err(Error::ProtocolViolation(_))
        ));

        let permissive = SecuritySettings {
            allow_empty_nonces: true,
            ..SecuritySettings::default()
        };
        assert!(element(&permissive)
            .process_incoming(&mut message, &Deadline::none())
            .is_ok());
    }
}
