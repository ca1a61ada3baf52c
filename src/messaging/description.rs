use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use url::Url;

use crate::error::{Error, Result};
use super::{MessageKind, Protections, ProtocolVersion, Transport, Value, OPENID2_NAMESPACE};

const DATED_NONCE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const DATED_NONCE_PREFIX: usize = 20;
/// `9999-12-31T23:59:59Z`, later unix timestamps are refused.
const MAXIMUM_TIMESTAMP: i64 = 253_402_300_799;

/// Split a dated nonce into its creation time and unique suffix.
pub(crate) fn parse_dated_nonce(raw: &str) -> Option<(DateTime<Utc>, &str)> {
    let stamp = raw.get(..DATED_NONCE_PREFIX)?;
    let time = NaiveDateTime::parse_from_str(stamp, DATED_NONCE_FORMAT).ok()?;
    Some((Utc.from_utc_datetime(&time), &raw[DATED_NONCE_PREFIX..]))
}

pub(crate) fn format_dated_nonce(time: DateTime<Utc>, nonce: &str) -> String {
    format!("{}{}", time.format(DATED_NONCE_FORMAT), nonce)
}

/// How a part's value is put on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// Any text.
    Text,
    /// Exactly this text.
    Constant(&'static str),
    /// One of an enumerated set of wire strings.
    OneOf(&'static [&'static str]),
    /// Seconds since the unix epoch.
    Timestamp,
    /// Decimal integer.
    Integer,
    /// Absolute URL.
    Url,
    /// Base64 encoded bytes.
    Base64,
    /// `true` or `false`.
    Bool,
    /// `2005-05-15T17:11:51Z` followed by a unique suffix.
    DatedNonce,
}

impl Encoding {
    fn decode(self, part: &str, raw: &str) -> Result<Value> {
        match self {
            Encoding::Text => Ok(Value::Text(raw.to_string())),
            Encoding::Constant(constant) if raw == constant => Ok(Value::Text(raw.to_string())),
            Encoding::Constant(constant) => Err(Error::format(part, format!("expected `{}`", constant))),
            Encoding::OneOf(options) if options.contains(&raw) => Ok(Value::Text(raw.to_string())),
            Encoding::OneOf(options) => {
                Err(Error::format(part, format!("expected one of {}", options.join(", "))))
            }
            Encoding::Timestamp => raw
                .parse::<i64>()
                .ok()
                .filter(|seconds| (0..=MAXIMUM_TIMESTAMP).contains(seconds))
                .and_then(|seconds| Utc.timestamp_opt(seconds, 0).single())
                .map(Value::Time)
                .ok_or_else(|| Error::format(part, "not a unix timestamp")),
            Encoding::Integer => raw
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| Error::format(part, "not an integer")),
            Encoding::Url => Url::parse(raw)
                .map(Value::Url)
                .map_err(|err| Error::format(part, err.to_string())),
            Encoding::Base64 => base64::decode(raw)
                .map(Value::Bytes)
                .map_err(|_| Error::format(part, "not valid base64")),
            Encoding::Bool => match raw {
                "true" => Ok(Value::Flag(true)),
                "false" => Ok(Value::Flag(false)),
                _ => Err(Error::format(part, "expected `true` or `false`")),
            },
            Encoding::DatedNonce => {
                let (time, nonce) =
                    parse_dated_nonce(raw).ok_or_else(|| Error::format(part, "nonce lacks its timestamp"))?;
                Ok(Value::DatedNonce {
                    time,
                    nonce: nonce.to_string(),
                })
            }
        }
    }

    fn encode(self, part: &str, value: &Value) -> Result<String> {
        match (self, value) {
            (Encoding::Text, Value::Text(text)) => Ok(text.clone()),
            (Encoding::Constant(constant), Value::Text(text)) if text == constant => Ok(text.clone()),
            (Encoding::OneOf(options), Value::Text(text)) if options.contains(&text.as_str()) => {
                Ok(text.clone())
            }
            (Encoding::Timestamp, Value::Time(time)) => Ok(time.timestamp().to_string()),
            (Encoding::Integer, Value::Integer(int)) => Ok(int.to_string()),
            (Encoding::Url, Value::Url(url)) => Ok(url.as_str().to_string()),
            (Encoding::Base64, Value::Bytes(bytes)) => Ok(base64::encode(bytes)),
            (Encoding::Bool, Value::Flag(flag)) => Ok(flag.to_string()),
            (Encoding::DatedNonce, Value::DatedNonce { time, nonce }) => Ok(format_dated_nonce(*time, nonce)),
            (encoding, value) => Err(Error::format(
                part,
                format!("value {:?} does not fit the encoding {:?}", value, encoding),
            )),
        }
    }
}

/// Declaration of one named part of a message type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessagePart {
    /// Name on the wire.
    pub name: &'static str,
    /// Must be present in every valid message.
    pub required: bool,
    /// May be present with an empty value.
    pub allow_empty: bool,
    /// Encoder and decoder of the value.
    pub encoding: Encoding,
    /// Must be covered by the signature, when the message is signed by a list of fields.
    pub protected: bool,
}

impl MessagePart {
    fn required(name: &'static str, encoding: Encoding) -> Self {
        MessagePart {
            name,
            required: true,
            allow_empty: false,
            encoding,
            protected: false,
        }
    }

    fn optional(name: &'static str, encoding: Encoding) -> Self {
        MessagePart {
            required: false,
            ..MessagePart::required(name, encoding)
        }
    }

    fn allow_empty(self) -> Self {
        MessagePart {
            allow_empty: true,
            ..self
        }
    }

    fn protected(self) -> Self {
        MessagePart {
            protected: true,
            ..self
        }
    }

    /// Decode a raw value of this part.
    pub fn decode(&self, raw: &str) -> Result<Value> {
        if raw.is_empty() && self.allow_empty {
            return Ok(Value::Text(String::new()));
        }
        self.encoding.decode(self.name, raw)
    }

    /// Encode a value of this part.
    pub fn encode(&self, value: &Value) -> Result<String> {
        match value {
            Value::Text(text) if text.is_empty() && self.allow_empty => Ok(String::new()),
            value => self.encoding.encode(self.name, value),
        }
    }
}

/// The static schema of one message type in one protocol version.
#[derive(Debug, PartialEq, Eq)]
pub struct MessageDescription {
    /// The message type.
    pub kind: MessageKind,
    /// The protocol version.
    pub version: ProtocolVersion,
    /// All declared parts.
    pub parts: Vec<MessagePart>,
    /// Part holding the signature, if the type is signed.
    pub signature: Option<&'static str>,
    /// Part holding the replay nonce.
    pub nonce: Option<&'static str>,
    /// Part holding the creation time.
    pub timestamp: Option<&'static str>,
    /// Part whose value namespaces the nonce.
    pub replay_context: Option<&'static str>,
}

static REGISTRY: Lazy<HashMap<(MessageKind, ProtocolVersion), MessageDescription>> = Lazy::new(|| {
    let mut registry = HashMap::new();
    for &kind in MessageKind::ALL.iter() {
        for &version in ProtocolVersion::ALL.iter() {
            if let Some(description) = describe(kind, version) {
                registry.insert((kind, version), description);
            }
        }
    }
    registry
});

impl MessageDescription {
    /// The description of a message type, `None` if the version does not define it.
    pub fn lookup(kind: MessageKind, version: ProtocolVersion) -> Option<&'static MessageDescription> {
        REGISTRY.get(&(kind, version))
    }

    /// All descriptions of the given versions.
    pub fn all_of(versions: &[ProtocolVersion]) -> Vec<&'static MessageDescription> {
        let mut all: Vec<_> = REGISTRY
            .values()
            .filter(|description| versions.contains(&description.version))
            .collect();
        all.sort_by_key(|description| (description.kind, description.version));
        all
    }

    /// A declared part by name.
    pub fn part(&self, name: &str) -> Option<&MessagePart> {
        self.parts.iter().find(|part| part.name == name)
    }

    /// Protections that must have been applied before the message is sent or accepted.
    pub fn required_protection(&self) -> Protections {
        let mut required = Protections::NONE;
        if self.signature.is_some() {
            required |= Protections::TAMPER;
        }
        if self.timestamp.is_some() {
            required |= Protections::EXPIRATION;
        }
        if self.nonce.is_some() {
            required |= Protections::REPLAY;
        }
        required
    }

    /// Direct or indirect.
    pub fn transport(&self) -> Transport {
        self.kind.transport()
    }
}

const SIGNATURE_METHODS: &[&str] = &["HMAC-SHA1", "HMAC-SHA256", "PLAINTEXT"];
const ASSOCIATION_TYPES: &[&str] = &["HMAC-SHA1", "HMAC-SHA256"];
const SESSION_TYPES: &[&str] = &["no-encryption", "DH-SHA1", "DH-SHA256"];
const AUTHORIZATION_ERRORS: &[&str] = &[
    "invalid_request",
    "unauthorized_client",
    "access_denied",
    "unsupported_response_type",
    "invalid_scope",
    "server_error",
    "temporarily_unavailable",
];
const TOKEN_ERRORS: &[&str] = &[
    "invalid_request",
    "invalid_client",
    "invalid_grant",
    "unauthorized_client",
    "unsupported_grant_type",
    "invalid_scope",
];

struct Schema {
    parts: Vec<MessagePart>,
    signature: Option<&'static str>,
    nonce: Option<&'static str>,
    timestamp: Option<&'static str>,
    replay_context: Option<&'static str>,
}

impl Schema {
    fn plain(parts: Vec<MessagePart>) -> Self {
        Schema {
            parts,
            signature: None,
            nonce: None,
            timestamp: None,
            replay_context: None,
        }
    }
}

fn describe(kind: MessageKind, version: ProtocolVersion) -> Option<MessageDescription> {
    if kind.protocol() != version.protocol() {
        return None;
    }

    let schema = match version {
        ProtocolVersion::OAuth10 | ProtocolVersion::OAuth10a => {
            oauth1(kind, version == ProtocolVersion::OAuth10a)
        }
        ProtocolVersion::OAuth20 => oauth2(kind),
        ProtocolVersion::OpenId11 | ProtocolVersion::OpenId20 => {
            openid(kind, version == ProtocolVersion::OpenId20)
        }
    };

    Some(MessageDescription {
        kind,
        version,
        parts: schema.parts,
        signature: schema.signature,
        nonce: schema.nonce,
        timestamp: schema.timestamp,
        replay_context: schema.replay_context,
    })
}

fn oauth1(kind: MessageKind, revision_a: bool) -> Schema {
    use self::Encoding::*;
    use super::MessageKind::*;
    let req = MessagePart::required;
    let opt = MessagePart::optional;
    let revised = |name, encoding| if revision_a { req(name, encoding) } else { opt(name, encoding) };

    let signed = |mut extra: Vec<MessagePart>| {
        let mut parts = vec![
            req("oauth_consumer_key", Text),
            req("oauth_nonce", Text).allow_empty(),
            req("oauth_timestamp", Timestamp),
            req("oauth_signature_method", OneOf(SIGNATURE_METHODS)),
            req("oauth_signature", Text),
            opt("oauth_version", Constant("1.0")),
        ];
        parts.append(&mut extra);
        Schema {
            parts,
            signature: Some("oauth_signature"),
            nonce: Some("oauth_nonce"),
            timestamp: Some("oauth_timestamp"),
            replay_context: Some("oauth_consumer_key"),
        }
    };

    match kind {
        UnauthorizedTokenRequest => signed(vec![revised("oauth_callback", Text)]),
        UnauthorizedTokenResponse => {
            let mut parts = vec![
                req("oauth_token", Text),
                req("oauth_token_secret", Text).allow_empty(),
            ];
            if revision_a {
                parts.push(req("oauth_callback_confirmed", Constant("true")));
            }
            Schema::plain(parts)
        }
        UserAuthorizationRequest => {
            let mut parts = vec![opt("oauth_token", Text)];
            if !revision_a {
                parts.push(opt("oauth_callback", Url));
            }
            Schema::plain(parts)
        }
        UserAuthorizationResponse => Schema::plain(vec![
            req("oauth_token", Text),
            revised("oauth_verifier", Text),
        ]),
        AuthorizedTokenRequest => signed(vec![req("oauth_token", Text), revised("oauth_verifier", Text)]),
        AuthorizedTokenResponse => Schema::plain(vec![
            req("oauth_token", Text),
            req("oauth_token_secret", Text).allow_empty(),
        ]),
        AccessProtectedResourceRequest => signed(vec![req("oauth_token", Text)]),
        _ => Schema::plain(Vec::new()),
    }
}

fn oauth2(kind: MessageKind) -> Schema {
    use self::Encoding::*;
    use super::MessageKind::*;
    let req = MessagePart::required;
    let opt = MessagePart::optional;

    let parts = match kind {
        EndUserAuthorizationRequest => vec![
            req("response_type", Constant("code")),
            req("client_id", Text),
            opt("redirect_uri", Url),
            opt("scope", Text),
            opt("state", Text),
        ],
        EndUserAuthorizationSuccessResponse => vec![req("code", Text), opt("state", Text)],
        EndUserAuthorizationFailedResponse => vec![
            req("error", OneOf(AUTHORIZATION_ERRORS)),
            opt("error_description", Text),
            opt("error_uri", Url),
            opt("state", Text),
        ],
        AccessTokenAuthorizationCodeRequest => vec![
            req("grant_type", Constant("authorization_code")),
            req("code", Text),
            opt("redirect_uri", Url),
            req("client_id", Text),
            opt("client_secret", Text),
        ],
        AccessTokenSuccessResponse => vec![
            req("access_token", Text),
            req("token_type", Text),
            opt("expires_in", Integer),
            opt("refresh_token", Text),
            opt("scope", Text),
        ],
        AccessTokenFailedResponse => vec![
            req("error", OneOf(TOKEN_ERRORS)),
            opt("error_description", Text),
            opt("error_uri", Url),
        ],
        _ => Vec::new(),
    };

    Schema::plain(parts)
}

fn openid(kind: MessageKind, v2: bool) -> Schema {
    use self::Encoding::*;
    use super::MessageKind::*;
    let req = MessagePart::required;
    let opt = MessagePart::optional;
    let revised = |name, encoding| if v2 { req(name, encoding) } else { opt(name, encoding) };
    let legacy = |name, encoding| if v2 { opt(name, encoding) } else { req(name, encoding) };

    let mut parts = Vec::new();
    match kind.transport() {
        Transport::Indirect => {
            if v2 {
                parts.push(req("openid.ns", Constant(OPENID2_NAMESPACE)));
            }
        }
        Transport::Direct if kind.is_request() => {
            if v2 {
                parts.push(req("openid.ns", Constant(OPENID2_NAMESPACE)));
            }
        }
        Transport::Direct => {
            if v2 {
                parts.push(req("ns", Constant(OPENID2_NAMESPACE)));
            }
        }
    }

    let assertion = |mode: Encoding, parts: &mut Vec<MessagePart>| {
        parts.push(req("openid.mode", mode));
        if v2 {
            parts.push(req("openid.op_endpoint", Url).protected());
            parts.push(opt("openid.claimed_id", Text).protected());
            parts.push(req("openid.response_nonce", DatedNonce).protected());
        }
        parts.extend(vec![
            legacy("openid.identity", Text).protected(),
            req("openid.return_to", Url).protected(),
            req("openid.assoc_handle", Text).protected(),
            opt("openid.invalidate_handle", Text),
            req("openid.signed", Text),
            req("openid.sig", Text),
        ]);
    };

    let signed = |parts: Vec<MessagePart>| Schema {
        parts,
        signature: Some("openid.sig"),
        nonce: if v2 { Some("openid.response_nonce") } else { None },
        timestamp: if v2 { Some("openid.response_nonce") } else { None },
        replay_context: if v2 { Some("openid.op_endpoint") } else { None },
    };

    match kind {
        AssociateRequest => {
            parts.push(req("openid.mode", Constant("associate")));
            parts.push(req("openid.assoc_type", OneOf(ASSOCIATION_TYPES)));
            parts.push(revised("openid.session_type", OneOf(SESSION_TYPES)).allow_empty());
            Schema::plain(parts)
        }
        AssociateSuccessResponse => {
            parts.extend(vec![
                req("assoc_type", OneOf(ASSOCIATION_TYPES)),
                revised("session_type", OneOf(SESSION_TYPES)).allow_empty(),
                req("assoc_handle", Text),
                req("expires_in", Integer),
                opt("mac_key", Base64),
            ]);
            Schema::plain(parts)
        }
        DirectErrorResponse => {
            parts.extend(vec![
                req("error", Text),
                opt("error_code", Text),
                opt("contact", Text),
                opt("reference", Text),
                opt("assoc_type", OneOf(ASSOCIATION_TYPES)),
                opt("session_type", OneOf(SESSION_TYPES)),
            ]);
            Schema::plain(parts)
        }
        CheckIdRequest => {
            parts.push(req("openid.mode", OneOf(&["checkid_setup", "checkid_immediate"])));
            if v2 {
                parts.push(opt("openid.claimed_id", Text));
                parts.push(opt("openid.realm", Url));
            } else {
                parts.push(opt("openid.trust_root", Url));
            }
            parts.push(legacy("openid.identity", Text));
            parts.push(opt("openid.assoc_handle", Text));
            parts.push(legacy("openid.return_to", Url));
            Schema::plain(parts)
        }
        PositiveAssertion => {
            assertion(Constant("id_res"), &mut parts);
            signed(parts)
        }
        NegativeAssertion => {
            if v2 {
                parts.push(req("openid.mode", OneOf(&["cancel", "setup_needed"])));
            } else {
                parts.push(req("openid.mode", OneOf(&["cancel", "id_res"])));
                parts.push(opt("openid.user_setup_url", Url));
            }
            Schema::plain(parts)
        }
        CheckAuthenticationRequest => {
            assertion(Constant("check_authentication"), &mut parts);
            signed(parts)
        }
        CheckAuthenticationResponse => {
            parts.push(req("is_valid", Bool));
            parts.push(opt("invalidate_handle", Text));
            Schema::plain(parts)
        }
        _ => Schema::plain(parts),
    }
}
