//! Typed protocol messages.
//!
//! A [`Message`] is a versioned bag of named parts. Which parts exist, which are required and how
//! each is put on the wire is not discovered from the value itself but looked up in a static
//! [`MessageDescription`], one per concrete message type and protocol version. Conversion between
//! a message and its raw string fields happens through [`Message::to_fields`] and
//! [`Message::from_fields`], which are symmetric for all valid messages.
//!
//! Parts decoded from raw fields remember the exact string they were received as. Encoding
//! reproduces that string until the part is changed, so signatures are always checked over the
//! message as it was sent and not over a normalized rendition of it.
//!
//! Parts that are not declared by the description are kept as *extra data*. They survive the
//! conversion unchanged and take part in OAuth 1 signatures, which allows the application to put
//! its own parameters next to the protocol's.
//!
//! [`Message`]: struct.Message.html
//! [`MessageDescription`]: struct.MessageDescription.html
//! [`Message::to_fields`]: struct.Message.html#method.to_fields
//! [`Message::from_fields`]: struct.Message.html#method.from_fields
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use chrono::{DateTime, Timelike, Utc};
use url::Url;

use crate::error::{Error, Result};

mod description;
pub mod encoding;
pub mod factory;
mod fields;

pub use self::description::{Encoding, MessageDescription, MessagePart};
pub(crate) use self::description::{format_dated_nonce, parse_dated_nonce};
pub use self::fields::NormalizedParameter;

/// Namespace value of OpenID 2.0 messages.
pub const OPENID2_NAMESPACE: &str = "http://specs.openid.net/auth/2.0";

/// The protocol family of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// OAuth 1.0 and the 1.0a revision.
    OAuth1,
    /// OAuth 2.0.
    OAuth2,
    /// OpenID Authentication 1.1 and 2.0.
    OpenId,
}

/// A protocol together with its revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProtocolVersion {
    /// OAuth Core 1.0.
    OAuth10,
    /// OAuth Core 1.0 Revision A.
    OAuth10a,
    /// OAuth 2.0.
    OAuth20,
    /// OpenID Authentication 1.1.
    OpenId11,
    /// OpenID Authentication 2.0.
    OpenId20,
}

impl ProtocolVersion {
    /// All supported versions.
    pub const ALL: [ProtocolVersion; 5] = [
        ProtocolVersion::OAuth10,
        ProtocolVersion::OAuth10a,
        ProtocolVersion::OAuth20,
        ProtocolVersion::OpenId11,
        ProtocolVersion::OpenId20,
    ];

    /// The protocol family of this version.
    pub fn protocol(self) -> Protocol {
        match self {
            ProtocolVersion::OAuth10 | ProtocolVersion::OAuth10a => Protocol::OAuth1,
            ProtocolVersion::OAuth20 => Protocol::OAuth2,
            ProtocolVersion::OpenId11 | ProtocolVersion::OpenId20 => Protocol::OpenId,
        }
    }
}

/// How a message travels between the parties.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Through the user agent, as a redirect or an auto-submitting form.
    Indirect,
    /// Server to server over HTTP.
    Direct,
}

/// HTTP method a request was or will be made with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `POST`
    Post,
}

impl HttpMethod {
    /// Upper case method name.
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl Default for HttpMethod {
    fn default() -> Self {
        HttpMethod::Get
    }
}

/// Set of protections a binding element provides or a message requires.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Protections(u8);

impl Protections {
    /// No protection.
    pub const NONE: Protections = Protections(0);
    /// The message parts can not be modified undetected.
    pub const TAMPER: Protections = Protections(1);
    /// The message is rejected after a maximum age.
    pub const EXPIRATION: Protections = Protections(2);
    /// The message is accepted at most once.
    pub const REPLAY: Protections = Protections(4);
    /// All protections.
    pub const ALL: Protections = Protections(7);

    /// Every flag of `other` is also set in `self`.
    pub fn contains(self, other: Protections) -> bool {
        self.0 & other.0 == other.0
    }

    /// Some flag is set in both.
    pub fn intersects(self, other: Protections) -> bool {
        self.0 & other.0 != 0
    }

    /// No flag set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Flags of `self` that are not in `other`.
    pub fn difference(self, other: Protections) -> Protections {
        Protections(self.0 & !other.0)
    }

    /// The raw bits, higher protections compare larger.
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for Protections {
    type Output = Protections;

    fn bitor(self, rhs: Protections) -> Protections {
        Protections(self.0 | rhs.0)
    }
}

impl BitOrAssign for Protections {
    fn bitor_assign(&mut self, rhs: Protections) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Protections {
    type Output = Protections;

    fn bitand(self, rhs: Protections) -> Protections {
        Protections(self.0 & rhs.0)
    }
}

impl fmt::Debug for Protections {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Protections {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }

        let names = [
            (Protections::TAMPER, "tamper"),
            (Protections::EXPIRATION, "expiration"),
            (Protections::REPLAY, "replay"),
        ];
        let set: Vec<_> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&set.join("|"))
    }
}

/// Every concrete message type known to the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    /// OAuth 1: consumer asks for a request token.
    UnauthorizedTokenRequest,
    /// OAuth 1: service provider hands out a request token.
    UnauthorizedTokenResponse,
    /// OAuth 1: user agent is sent to the service provider to authorize a request token.
    UserAuthorizationRequest,
    /// OAuth 1: user agent returns to the consumer with the authorized token.
    UserAuthorizationResponse,
    /// OAuth 1: consumer exchanges the authorized request token.
    AuthorizedTokenRequest,
    /// OAuth 1: service provider hands out the access token.
    AuthorizedTokenResponse,
    /// OAuth 1: signed request for a protected resource.
    AccessProtectedResourceRequest,

    /// OAuth 2: client sends the user agent to the authorization endpoint.
    EndUserAuthorizationRequest,
    /// OAuth 2: authorization code handed back to the client.
    EndUserAuthorizationSuccessResponse,
    /// OAuth 2: authorization denied or failed.
    EndUserAuthorizationFailedResponse,
    /// OAuth 2: client redeems an authorization code.
    AccessTokenAuthorizationCodeRequest,
    /// OAuth 2: access token issued.
    AccessTokenSuccessResponse,
    /// OAuth 2: token request refused.
    AccessTokenFailedResponse,

    /// OpenID: relying party asks for a shared association.
    AssociateRequest,
    /// OpenID: provider established an association.
    AssociateSuccessResponse,
    /// OpenID: provider refused a direct request.
    DirectErrorResponse,
    /// OpenID: relying party asks for an authentication assertion.
    CheckIdRequest,
    /// OpenID: provider asserts the identity.
    PositiveAssertion,
    /// OpenID: authentication was cancelled or needs interaction.
    NegativeAssertion,
    /// OpenID: relying party asks the provider to verify an assertion.
    CheckAuthenticationRequest,
    /// OpenID: provider's verdict on an assertion.
    CheckAuthenticationResponse,
}

impl MessageKind {
    /// All message kinds.
    pub const ALL: [MessageKind; 21] = [
        MessageKind::UnauthorizedTokenRequest,
        MessageKind::UnauthorizedTokenResponse,
        MessageKind::UserAuthorizationRequest,
        MessageKind::UserAuthorizationResponse,
        MessageKind::AuthorizedTokenRequest,
        MessageKind::AuthorizedTokenResponse,
        MessageKind::AccessProtectedResourceRequest,
        MessageKind::EndUserAuthorizationRequest,
        MessageKind::EndUserAuthorizationSuccessResponse,
        MessageKind::EndUserAuthorizationFailedResponse,
        MessageKind::AccessTokenAuthorizationCodeRequest,
        MessageKind::AccessTokenSuccessResponse,
        MessageKind::AccessTokenFailedResponse,
        MessageKind::AssociateRequest,
        MessageKind::AssociateSuccessResponse,
        MessageKind::DirectErrorResponse,
        MessageKind::CheckIdRequest,
        MessageKind::PositiveAssertion,
        MessageKind::NegativeAssertion,
        MessageKind::CheckAuthenticationRequest,
        MessageKind::CheckAuthenticationResponse,
    ];

    /// The protocol this message type belongs to.
    pub fn protocol(self) -> Protocol {
        use self::MessageKind::*;
        match self {
            UnauthorizedTokenRequest
            | UnauthorizedTokenResponse
            | UserAuthorizationRequest
            | UserAuthorizationResponse
            | AuthorizedTokenRequest
            | AuthorizedTokenResponse
            | AccessProtectedResourceRequest => Protocol::OAuth1,
            EndUserAuthorizationRequest
            | EndUserAuthorizationSuccessResponse
            | EndUserAuthorizationFailedResponse
            | AccessTokenAuthorizationCodeRequest
            | AccessTokenSuccessResponse
            | AccessTokenFailedResponse => Protocol::OAuth2,
            AssociateRequest
            | AssociateSuccessResponse
            | DirectErrorResponse
            | CheckIdRequest
            | PositiveAssertion
            | NegativeAssertion
            | CheckAuthenticationRequest
            | CheckAuthenticationResponse => Protocol::OpenId,
        }
    }

    /// Whether the message travels through the user agent.
    pub fn transport(self) -> Transport {
        use self::MessageKind::*;
        match self {
            UserAuthorizationRequest
            | UserAuthorizationResponse
            | EndUserAuthorizationRequest
            | EndUserAuthorizationSuccessResponse
            | EndUserAuthorizationFailedResponse
            | CheckIdRequest
            | PositiveAssertion
            | NegativeAssertion => Transport::Indirect,
            _ => Transport::Direct,
        }
    }

    /// Whether the message starts an exchange, as opposed to answering one.
    pub fn is_request(self) -> bool {
        use self::MessageKind::*;
        matches!(
            self,
            UnauthorizedTokenRequest
                | UserAuthorizationRequest
                | AuthorizedTokenRequest
                | AccessProtectedResourceRequest
                | EndUserAuthorizationRequest
                | AccessTokenAuthorizationCodeRequest
                | AssociateRequest
                | CheckIdRequest
                | CheckAuthenticationRequest
        )
    }

    /// Whether the message reports a failure to the other party.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            MessageKind::EndUserAuthorizationFailedResponse
                | MessageKind::AccessTokenFailedResponse
                | MessageKind::DirectErrorResponse
        )
    }
}

/// A decoded part value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// Plain, constant or enumerated text.
    Text(String),
    /// A point in time, with whole second precision.
    Time(DateTime<Utc>),
    /// A signed integer.
    Integer(i64),
    /// An absolute URL.
    Url(Url),
    /// Binary data, base64 on the wire.
    Bytes(Vec<u8>),
    /// A boolean flag.
    Flag(bool),
    /// An OpenID response nonce, creation time followed by a unique suffix.
    DatedNonce {
        /// Creation time of the message.
        time: DateTime<Utc>,
        /// The unique suffix.
        nonce: String,
    },
}

impl Value {
    /// Text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    fn truncated(self) -> Value {
        match self {
            Value::Time(time) => Value::Time(truncate(time)),
            Value::DatedNonce { time, nonce } => Value::DatedNonce {
                time: truncate(time),
                nonce,
            },
            other => other,
        }
    }
}

impl From<&'_ str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<Url> for Value {
    fn from(url: Url) -> Self {
        Value::Url(url)
    }
}

impl From<i64> for Value {
    fn from(integer: i64) -> Self {
        Value::Integer(integer)
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Flag(flag)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

fn truncate(time: DateTime<Utc>) -> DateTime<Utc> {
    time.with_nanosecond(0).unwrap_or(time)
}

/// A protocol message of one concrete type and version.
#[derive(Clone)]
pub struct Message {
    description: &'static MessageDescription,
    recipient: Option<Url>,
    http_method: HttpMethod,
    parts: BTreeMap<&'static str, Value>,
    /// Received form of parts that were not changed since decoding.
    raw: BTreeMap<&'static str, String>,
    extra: BTreeMap<String, String>,
}

impl Message {
    /// An empty message of the given type, with all constant parts filled in.
    ///
    /// Fails with a configuration error when the message type does not exist in that version.
    pub fn new(kind: MessageKind, version: ProtocolVersion) -> Result<Self> {
        let description = MessageDescription::lookup(kind, version).ok_or_else(|| {
            Error::Configuration(format!("{:?} is not a message of {:?}", kind, version))
        })?;

        let parts = description
            .parts
            .iter()
            .filter_map(|part| match part.encoding {
                Encoding::Constant(constant) => Some((part.name, Value::Text(constant.to_string()))),
                _ => None,
            })
            .collect();

        Ok(Message {
            description,
            recipient: None,
            http_method: HttpMethod::default(),
            parts,
            raw: BTreeMap::new(),
            extra: BTreeMap::new(),
        })
    }

    /// Decode a message of a known type from its raw fields.
    ///
    /// Each declared part is decoded with its encoding and fails with a format error naming the
    /// part. Empty values of parts that do not allow them are a protocol violation. Required parts
    /// are checked later, by `validate`. The received strings are kept for `to_fields`.
    pub fn from_fields(
        kind: MessageKind,
        version: ProtocolVersion,
        fields: BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut message = Message::new(kind, version)?;
        message.parts.clear();

        for (key, raw) in fields {
            match message.description.part(&key) {
                Some(part) => {
                    if raw.is_empty() && !part.allow_empty {
                        return Err(Error::violation(format!("part `{}` must not be empty", part.name)));
                    }
                    let value = part.decode(&raw)?;
                    message.parts.insert(part.name, value);
                    message.raw.insert(part.name, raw);
                }
                None => {
                    message.extra.insert(key, raw);
                }
            }
        }

        Ok(message)
    }

    /// Encode all parts and the extra data into raw fields.
    ///
    /// Parts unchanged since `from_fields` are reproduced exactly as received.
    pub fn to_fields(&self) -> Result<BTreeMap<String, String>> {
        let mut fields = BTreeMap::new();
        for (name, value) in self.parts.iter() {
            let encoded = match self.raw.get(name) {
                Some(raw) => raw.clone(),
                None => self
                    .description
                    .part(name)
                    .ok_or_else(|| Error::violation(format!("undeclared part `{}`", name)))?
                    .encode(value)?,
            };
            fields.insert(name.to_string(), encoded);
        }

        for (key, value) in self.extra.iter() {
            if fields.insert(key.clone(), value.clone()).is_some() {
                return Err(Error::violation(format!("extra data shadows the part `{}`", key)));
            }
        }

        Ok(fields)
    }

    /// Check that all required parts are present and the message is consistent.
    pub fn validate(&self) -> Result<()> {
        for part in self.description.parts.iter().filter(|part| part.required) {
            match self.parts.get(part.name) {
                None => {
                    return Err(Error::violation(format!(
                        "{:?} is missing the required part `{}`",
                        self.kind(),
                        part.name
                    )))
                }
                Some(Value::Text(text)) if text.is_empty() && !part.allow_empty => {
                    return Err(Error::violation(format!("part `{}` must not be empty", part.name)))
                }
                Some(_) => (),
            }
        }

        self.check_consistency()
    }

    fn check_consistency(&self) -> Result<()> {
        match (self.kind(), self.version()) {
            (MessageKind::PositiveAssertion, ProtocolVersion::OpenId20)
            | (MessageKind::CheckAuthenticationRequest, ProtocolVersion::OpenId20) => {
                let claimed = self.parts.contains_key("openid.claimed_id");
                let identity = self.parts.contains_key("openid.identity");
                if claimed != identity {
                    return Err(Error::violation("claimed_id and identity must appear together"));
                }
            }
            (MessageKind::CheckIdRequest, ProtocolVersion::OpenId20) => {
                if !self.parts.contains_key("openid.return_to") && !self.parts.contains_key("openid.realm") {
                    return Err(Error::violation("either return_to or realm is required"));
                }
            }
            _ => (),
        }
        Ok(())
    }

    /// The static description of this message type.
    pub fn description(&self) -> &'static MessageDescription {
        self.description
    }

    /// The concrete message type.
    pub fn kind(&self) -> MessageKind {
        self.description.kind
    }

    /// The protocol version.
    pub fn version(&self) -> ProtocolVersion {
        self.description.version
    }

    /// Where an indirect message or direct request is sent.
    pub fn recipient(&self) -> Option<&Url> {
        self.recipient.as_ref()
    }

    /// Set the recipient.
    pub fn set_recipient(&mut self, recipient: Url) {
        self.recipient = Some(recipient);
    }

    /// Builder variant of `set_recipient`.
    pub fn with_recipient(mut self, recipient: Url) -> Self {
        self.recipient = Some(recipient);
        self
    }

    /// Method the message is (to be) transmitted with.
    pub fn http_method(&self) -> HttpMethod {
        self.http_method
    }

    /// Set the transmission method.
    pub fn set_http_method(&mut self, method: HttpMethod) {
        self.http_method = method;
    }

    /// A declared part's value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.parts.get(name)
    }

    /// A declared part's text value.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_text)
    }

    /// A declared part's URL value.
    pub fn url(&self, name: &str) -> Option<&Url> {
        match self.get(name) {
            Some(Value::Url(url)) => Some(url),
            _ => None,
        }
    }

    /// Set a declared part. The value must fit the part's encoding.
    pub fn set<V: Into<Value>>(&mut self, name: &str, value: V) -> Result<()> {
        let part = self.description.part(name).ok_or_else(|| {
            Error::violation(format!("{:?} has no part `{}`", self.kind(), name))
        })?;
        let value = value.into().truncated();
        part.encode(&value)?;
        self.raw.remove(part.name);
        self.parts.insert(part.name, value);
        Ok(())
    }

    /// Builder variant of `set`.
    pub fn with<V: Into<Value>>(mut self, name: &str, value: V) -> Result<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    /// Remove a declared part.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.raw.remove(name);
        self.parts.remove(name)
    }

    /// Fields not declared by the message type.
    pub fn extra(&self) -> &BTreeMap<String, String> {
        &self.extra
    }

    /// Mutable access to the undeclared fields.
    pub fn extra_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.extra
    }

    /// The value of the signature part, if the message type is signed.
    pub fn signature(&self) -> Option<&str> {
        self.description.signature.and_then(|name| self.text(name))
    }

    /// The replay nonce, if the message type carries one.
    pub fn nonce(&self) -> Option<&str> {
        match self.description.nonce.and_then(|name| self.get(name)) {
            Some(Value::Text(nonce)) => Some(nonce),
            Some(Value::DatedNonce { nonce, .. }) => Some(nonce),
            _ => None,
        }
    }

    /// Attach a replay nonce.
    pub fn set_nonce(&mut self, nonce: String) -> Result<()> {
        let name = self
            .description
            .nonce
            .ok_or_else(|| Error::violation(format!("{:?} carries no nonce", self.kind())))?;
        let value = match self.get(name) {
            Some(Value::DatedNonce { time, .. }) => Value::DatedNonce { time: *time, nonce },
            _ if self.description.timestamp == Some(name) => Value::DatedNonce {
                time: Utc::now(),
                nonce,
            },
            _ => Value::Text(nonce),
        };
        self.set(name, value)
    }

    /// The creation time, if the message type carries one.
    pub fn creation_date(&self) -> Option<DateTime<Utc>> {
        match self.description.timestamp.and_then(|name| self.get(name)) {
            Some(Value::Time(time)) => Some(*time),
            Some(Value::DatedNonce { time, .. }) => Some(*time),
            _ => None,
        }
    }

    /// Stamp the creation time. Sub-second precision is dropped.
    pub fn set_creation_date(&mut self, time: DateTime<Utc>) -> Result<()> {
        let name = self
            .description
            .timestamp
            .ok_or_else(|| Error::violation(format!("{:?} carries no timestamp", self.kind())))?;
        let value = match self.get(name) {
            Some(Value::DatedNonce { nonce, .. }) => Value::DatedNonce {
                time,
                nonce: nonce.clone(),
            },
            _ if self.description.nonce == Some(name) => Value::DatedNonce {
                time,
                nonce: String::new(),
            },
            _ => Value::Time(time),
        };
        self.set(name, value)
    }
}

// Two messages are equal when they carry the same values, however these were spelled on the wire.
impl PartialEq for Message {
    fn eq(&self, other: &Message) -> bool {
        self.description == other.description
            && self.recipient == other.recipient
            && self.http_method == other.http_method
            && self.parts == other.parts
            && self.extra == other.extra
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind())
            .field("version", &self.version())
            .field("recipient", &self.recipient)
            .field("http_method", &self.http_method)
            .field("parts", &self.parts)
            .field("extra", &self.extra)
            .finish()
    }
}

#[cfg(test)]
mod tests;
