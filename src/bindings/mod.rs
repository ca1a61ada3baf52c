//! Binding elements and the ordered pipeline running them.
//!
//! A binding element looks at every message passing through a channel, in both directions, and
//! either applies one protection to it or declines. Elements that provide no protection are
//! transforms (for example checking token classification) and always run on the outside of the
//! protections.
//!
//! The pipeline fixes the order of elements at construction:
//!
//! * outgoing: transforms, then replay, expiration and finally tamper protection, so that the
//!   signature covers the nonce and timestamp that were just attached.
//! * incoming: the exact reverse. The signature is verified before the timestamp is trusted and
//!   before a nonce is consumed, so a forged message can never burn a legitimate nonce.
//!
//! After all elements ran, the protections a message type requires must all have been applied,
//! otherwise the message is refused.
use std::cmp::Reverse;

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::messaging::{Message, Protections};

pub mod expiration;
pub mod replay;
pub mod signing;

pub use self::expiration::ExpirationProtection;
pub use self::replay::ReplayProtection;
pub use self::signing::{OAuthSigning, OpenIdRole, OpenIdSigning, SignatureMethod};

/// One step of message preparation and validation.
pub trait BindingElement: Send + Sync {
    /// The protection this element provides, `Protections::NONE` for transforms.
    fn protection(&self) -> Protections;

    /// Prepare an outgoing message.
    ///
    /// Returns the protection applied, or `None` if the element does not apply to this message.
    fn process_outgoing(&self, message: &mut Message, deadline: &Deadline) -> Result<Option<Protections>>;

    /// Validate an incoming message.
    ///
    /// Returns the protection verified, or `None` if the element does not apply to this message.
    fn process_incoming(&self, message: &mut Message, deadline: &Deadline) -> Result<Option<Protections>>;
}

/// Validated and ordered binding elements.
pub struct Pipeline {
    elements: Vec<Box<dyn BindingElement>>,
    protection: Protections,
}

impl Pipeline {
    /// Order the elements and check that their protections are consistent.
    ///
    /// Fails with a configuration error when two elements offer the same protection, or when an
    /// element's protection lacks the one it depends on: replay protection needs expiration,
    /// expiration needs tamper protection.
    pub fn new(elements: Vec<Box<dyn BindingElement>>) -> Result<Self> {
        let mut protection = Protections::NONE;
        for element in elements.iter() {
            let offered = element.protection();
            if protection.intersects(offered) {
                return Err(Error::Configuration(format!(
                    "more than one binding element offers {} protection",
                    protection & offered
                )));
            }
            protection |= offered;
        }

        if protection.contains(Protections::REPLAY) && !protection.contains(Protections::EXPIRATION) {
            return Err(Error::Configuration(
                "replay protection requires expiration protection".into(),
            ));
        }

        if protection.contains(Protections::EXPIRATION) && !protection.contains(Protections::TAMPER) {
            return Err(Error::Configuration(
                "expiration protection requires tamper protection".into(),
            ));
        }

        let (mut protecting, mut ordered): (Vec<_>, Vec<_>) = elements
            .into_iter()
            .partition(|element| !element.protection().is_empty());
        protecting.sort_by_key(|element| Reverse(element.protection().bits()));
        ordered.append(&mut protecting);

        Ok(Pipeline {
            elements: ordered,
            protection,
        })
    }

    /// A pipeline without any element.
    pub fn empty() -> Self {
        Pipeline {
            elements: Vec::new(),
            protection: Protections::NONE,
        }
    }

    /// Union of all offered protections.
    pub fn protection(&self) -> Protections {
        self.protection
    }

    /// Protections of the elements in outgoing order.
    pub fn outgoing_order(&self) -> Vec<Protections> {
        self.elements.iter().map(|element| element.protection()).collect()
    }

    /// Run all elements in order over an outgoing message.
    pub fn process_outgoing(&self, message: &mut Message, deadline: &Deadline) -> Result<Protections> {
        let mut applied = Protections::NONE;
        for element in self.elements.iter() {
            if let Some(protection) = element.process_outgoing(message, deadline)? {
                applied |= protection;
            }
        }

        ensure_protected(message, applied)
    }

    /// Run all elements in reverse order over an incoming message.
    pub fn process_incoming(&self, message: &mut Message, deadline: &Deadline) -> Result<Protections> {
        let mut applied = Protections::NONE;
        for element in self.elements.iter().rev() {
            if let Some(protection) = element.process_incoming(message, deadline)? {
                applied |= protection;
            }
        }

        ensure_protected(message, applied)
    }
}

fn ensure_protected(message: &Message, applied: Protections) -> Result<Protections> {
    let required = message.description().required_protection();
    if applied.contains(required) {
        return Ok(applied);
    }

    tracing::warn!(
        kind = ?message.kind(),
        %required,
        %applied,
        "message lacks required protection"
    );
    Err(Error::violation(format!(
        "{:?} requires {} protection but only {} was applied",
        message.kind(),
        required,
        applied
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::messaging::{MessageKind, ProtocolVersion};

    /// Records the order in which elements ran.
    struct Recorder {
        protection: Protections,
        log: Arc<Mutex<Vec<(&'static str, Protections)>>>,
        applies: bool,
    }

    impl BindingElement for Recorder {
        fn protection(&self) -> Protections {
            self.protection
        }

        fn process_outgoing(&self, _: &mut Message, _: &Deadline) -> Result<Option<Protections>> {
            self.log.lock().push(("out", self.protection));
            Ok(if self.applies { Some(self.protection) } else { None })
        }

        fn process_incoming(&self, _: &mut Message, _: &Deadline) -> Result<Option<Protections>> {
            self.log.lock().push(("in", self.protection));
            Ok(if self.applies { Some(self.protection) } else { None })
        }
    }

    type Log = Arc<Mutex<Vec<(&'static str, Protections)>>>;

    fn recorder(protection: Protections, log: &Log) -> Box<dyn BindingElement> {
        Box::new(Recorder {
            protection,
            log: log.clone(),
            applies: true,
        })
    }

    fn signed_message() -> Message {
        Message::new(MessageKind::AccessProtectedResourceRequest, ProtocolVersion::OAuth10a).unwrap()
    }

    #[test]
    fn ordering() {
        let log = Log::default();
        let pipeline = Pipeline::new(vec![
            recorder(Protections::TAMPER, &log),
            recorder(Protections::NONE, &log),
            recorder(Protections::REPLAY, &log),
            recorder(Protections::EXPIRATION, &log),
        ])
        .unwrap();

        assert_eq!(
            pipeline.outgoing_order(),
            vec![
                Protections::NONE,
                Protections::REPLAY,
                Protections::EXPIRATION,
                Protections::TAMPER,
            ]
        );

        let mut message = signed_message();
        pipeline.process_outgoing(&mut message, &Deadline::none()).unwrap();
        pipeline.process_incoming(&mut message, &Deadline::none()).unwrap();

        let order: Vec<_> = log.lock().iter().map(|(_, p)| *p).collect();
        assert_eq!(
            order,
            vec![
                Protections::NONE,
                Protections::REPLAY,
                Protections::EXPIRATION,
                Protections::TAMPER,
                Protections::TAMPER,
                Protections::EXPIRATION,
                Protections::REPLAY,
                Protections::NONE,
            ]
        );
    }

    #[test]
    fn duplicate_protection() {
        let log = Log::default();
        let result = Pipeline::new(vec![recorder(Protections::TAMPER, &log), recorder(Protections::TAMPER, &log)]);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn missing_dependency() {
        let log = Log::default();
        let replay_only = Pipeline::new(vec![recorder(Protections::REPLAY, &log)]);
        assert!(matches!(replay_only, Err(Error::Configuration(_))));

        let no_tamper = Pipeline::new(vec![recorder(Protections::EXPIRATION, &log)]);
        assert!(matches!(no_tamper, Err(Error::Configuration(_))));

        assert!(Pipeline::new(vec![recorder(Protections::TAMPER, &log)]).is_ok());
    }

    #[test]
    fn unapplied_protection_is_violation() {
        let log = Log::default();
        let declining: Box<dyn BindingElement> = Box::new(Recorder {
            protection: Protections::TAMPER,
            log: log.clone(),
            applies: false,
        });
        let pipeline = Pipeline::new(vec![declining]).unwrap();

        let mut message = signed_message();
        assert!(matches!(
            pipeline.process_incoming(&mut message, &Deadline::none()),
            Err(Error::ProtocolViolation(_))
        ));

        let mut plain = Message::new(MessageKind::CheckIdRequest, ProtocolVersion::OpenId20).unwrap();
        assert_eq!(
            pipeline.process_outgoing(&mut plain, &Deadline::none()).unwrap(),
            Protections::NONE
        );
    }
}
