use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use url::Url;

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::messaging::encoding::escape;
use crate::messaging::{Message, Protections};
use crate::oauth1::TokenManager;
use crate::bindings::BindingElement;

/// OAuth 1 signature methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignatureMethod {
    /// `HMAC-SHA1`
    HmacSha1,
    /// `HMAC-SHA256`
    HmacSha256,
    /// `PLAINTEXT`, only ever used over https.
    Plaintext,
}

impl SignatureMethod {
    /// The wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            SignatureMethod::HmacSha1 => "HMAC-SHA1",
            SignatureMethod::HmacSha256 => "HMAC-SHA256",
            SignatureMethod::Plaintext => "PLAINTEXT",
        }
    }

    /// Parse the wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "HMAC-SHA1" => Some(SignatureMethod::HmacSha1),
            "HMAC-SHA256" => Some(SignatureMethod::HmacSha256),
            "PLAINTEXT" => Some(SignatureMethod::Plaintext),
            _ => None,
        }
    }

    fn applies_to(self, recipient: &Url) -> bool {
        match self {
            SignatureMethod::Plaintext => recipient.scheme() == "https",
            _ => true,
        }
    }

    fn sign(self, base_string: &str, key: &str) -> Result<String> {
        let tag = match self {
            SignatureMethod::HmacSha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes())
                    .map_err(|_| Error::Configuration("unusable signing key".into()))?;
                mac.update(base_string.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
            SignatureMethod::HmacSha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
                    .map_err(|_| Error::Configuration("unusable signing key".into()))?;
                mac.update(base_string.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
            SignatureMethod::Plaintext => return Ok(key.to_string()),
        };
        Ok(base64::encode(tag))
    }
}

/// The key of HMAC and PLAINTEXT signatures.
pub fn signing_key(consumer_secret: &str, token_secret: &str) -> String {
    format!("{}&{}", escape(consumer_secret), escape(token_secret))
}

/// Scheme, host, non-default port and path. No query and no fragment.
fn normalized_url(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::violation("recipient has no host"))?
        .to_ascii_lowercase();
    let scheme = url.scheme().to_ascii_lowercase();
    // The url crate already drops ports that are the scheme's default.
    let port = match url.port() {
        Some(port) => format!(":{}", port),
        None => String::new(),
    };
    Ok(format!("{}://{}{}{}", scheme, host, port, url.path()))
}

/// Canonical OAuth 1 signature base string of a message.
///
/// `METHOD&escape(normalized url)&escape(sorted parameters)`, where the parameters are all message
/// fields and the recipient's query, without `oauth_signature` and `realm`.
pub fn signature_base_string(message: &Message) -> Result<String> {
    let recipient = message
        .recipient()
        .ok_or_else(|| Error::violation("signed OAuth messages need a recipient"))?;

    let mut params: Vec<(String, String)> = message
        .to_fields()?
        .into_iter()
        .filter(|(key, _)| key != "oauth_signature" && key != "realm")
        .map(|(key, value)| (escape(&key), escape(&value)))
        .collect();
    params.extend(
        recipient
            .query_pairs()
            .map(|(key, value)| (escape(&key), escape(&value))),
    );
    params.sort();

    let params = params
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");

    Ok(format!(
        "{}&{}&{}",
        message.http_method().as_str(),
        escape(&normalized_url(recipient)?),
        escape(&params)
    ))
}

/// Signs and verifies OAuth 1 messages with consumer and token secrets.
pub struct OAuthSigning {
    methods: Vec<SignatureMethod>,
    tokens: Arc<dyn TokenManager>,
}

impl OAuthSigning {
    /// Accept the given methods, signing outgoing messages with the first applicable one.
    pub fn new(methods: Vec<SignatureMethod>, tokens: Arc<dyn TokenManager>) -> Self {
        OAuthSigning { methods, tokens }
    }

    /// Sign and accept `HMAC-SHA1` only.
    pub fn hmac_sha1(tokens: Arc<dyn TokenManager>) -> Self {
        OAuthSigning::new(vec![SignatureMethod::HmacSha1], tokens)
    }

    fn key(&self, message: &Message) -> Result<String> {
        let consumer_key = message
            .text("oauth_consumer_key")
            .ok_or_else(|| Error::violation("missing oauth_consumer_key"))?;
        let consumer_secret = self
            .tokens
            .consumer_secret(consumer_key)
            .ok_or_else(|| Error::violation(format!("unknown consumer `{}`", consumer_key)))?;

        let token_secret = match message.text("oauth_token") {
            Some(token) => self
                .tokens
                .token_secret(token)
                .ok_or_else(|| Error::violation("unknown or expired token"))?,
            None => String::new(),
        };

        Ok(signing_key(&consumer_secret, &token_secret))
    }
}

impl BindingElement for OAuthSigning {
    fn protection(&self) -> Protections {
        Protections::TAMPER
    }

    fn process_outgoing(&self, message: &mut Message, _: &Deadline) -> Result<Option<Protections>> {
        if message.description().signature.is_none() {
            return Ok(None);
        }

        let recipient = match message.recipient() {
            Some(recipient) => recipient.clone(),
            None => return Ok(None),
        };
        let method = match self.methods.iter().find(|method| method.applies_to(&recipient)) {
            Some(method) => *method,
            None => return Ok(None),
        };

        message.set("oauth_signature_method", method.as_str())?;
        message.remove("oauth_signature");
        let base_string = signature_base_string(message)?;
        tracing::debug!(%base_string, method = method.as_str(), "signing OAuth message");

        let signature = method.sign(&base_string, &self.key(message)?)?;
        message.set("oauth_signature", signature)?;
        Ok(Some(Protections::TAMPER))
    }

    fn process_incoming(&self, message: &mut Message, _: &Deadline) -> Result<Option<Protections>> {
        if message.description().signature.is_none() {
            return Ok(None);
        }

        let method = match message.text("oauth_signature_method").and_then(SignatureMethod::from_wire) {
            Some(method) if self.methods.contains(&method) => method,
            _ => return Ok(None),
        };
        match message.recipient() {
            Some(recipient) if method.applies_to(recipient) => (),
            _ => return Ok(None),
        }

        let provided = message
            .signature()
            .ok_or_else(|| Error::violation("missing oauth_signature"))?;
        let base_string = signature_base_string(message)?;
        let expected = method.sign(&base_string, &self.key(message)?)?;
        tracing::debug!(%base_string, "verifying OAuth signature");

        if !bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
            tracing::error!(kind = ?message.kind(), "OAuth signature mismatch");
            return Err(Error::InvalidSignature { kind: message.kind() });
        }

        Ok(Some(Protections::TAMPER))
    }
}
