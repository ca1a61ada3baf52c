//! Authorization codes that carry their own grant.
//!
//! A code produced by a `CodeBag` includes a serialized version of the grant, the time it was
//! issued and a random nonce, followed by an HMAC signature. Nothing has to be stored to redeem
//! it, except for the nonce once it was used, which makes every code redeemable exactly once.
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rand::{thread_rng, RngCore};
use sha2::Sha256;
use url::Url;

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::messaging::MessageKind;
use crate::stores::NonceStore;

/// Nonce store context of redeemed codes.
const CONTEXT: &str = "CodeBag";

const KIND: MessageKind = MessageKind::AccessTokenAuthorizationCodeRequest;

/// What the user granted to a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationGrant {
    /// The client the code was issued to.
    pub client_id: String,
    /// The redirect uri the code was delivered to, if the request named one.
    pub redirect_uri: Option<Url>,
    /// The granted scope.
    pub scope: Option<String>,
    /// Identifies the user who authorized the client.
    pub user: String,
}

#[derive(Serialize, Deserialize)]
struct SerdeGrant {
    client_id: String,
    redirect_uri: Option<String>,
    scope: Option<String>,
    user: String,
    issued: i64,
    nonce: String,
}

#[derive(Serialize, Deserialize)]
struct SignedBag(Vec<u8>, Vec<u8>);

/// Encodes and redeems authorization codes.
pub struct CodeBag {
    key: Vec<u8>,
    maximum_age: Duration,
    nonces: Arc<dyn NonceStore>,
}

impl CodeBag {
    /// Sign codes with a custom secret.
    ///
    /// The nonce store must keep entries for at least `maximum_age`.
    pub fn new(key: &[u8], maximum_age: Duration, nonces: Arc<dyn NonceStore>) -> Self {
        CodeBag {
            key: key.to_vec(),
            maximum_age,
            nonces,
        }
    }

    /// Codes that are only valid for the program execution.
    pub fn ephemeral(maximum_age: Duration, nonces: Arc<dyn NonceStore>) -> Self {
        let mut key = vec![0; 32];
        thread_rng().fill_bytes(&mut key);
        CodeBag::new(&key, maximum_age, nonces)
    }

    fn mac(&self) -> Result<Hmac<Sha256>> {
        Hmac::<Sha256>::new_from_slice(&self.key).map_err(|_| Error::Configuration("unusable code bag key".into()))
    }

    /// Produce the code for a grant.
    pub fn encode(&self, grant: &AuthorizationGrant) -> Result<String> {
        let mut nonce = vec![0; 16];
        thread_rng().fill_bytes(&mut nonce);

        let payload = SerdeGrant {
            client_id: grant.client_id.clone(),
            redirect_uri: grant.redirect_uri.as_ref().map(Url::to_string),
            scope: grant.scope.clone(),
            user: grant.user.clone(),
            issued: Utc::now().timestamp(),
            nonce: base64::encode_config(&nonce, base64::URL_SAFE_NO_PAD),
        };
        let payload = rmp_serde::to_vec(&payload).map_err(|err| Error::format("code", err.to_string()))?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        let signature = mac.finalize().into_bytes().to_vec();

        let bag = rmp_serde::to_vec(&SignedBag(payload, signature)).map_err(|err| Error::format("code", err.to_string()))?;
        Ok(base64::encode_config(&bag, base64::URL_SAFE_NO_PAD))
    }

    /// Verify a code and recover its grant, consuming it.
    ///
    /// Fails with `InvalidSignature` for forged codes, `ExpiredMessage` for old ones and
    /// `ReplayedMessage` for codes redeemed before.
    pub fn decode(&self, code: &str, deadline: &Deadline) -> Result<AuthorizationGrant> {
        let bag = base64::decode_config(code, base64::URL_SAFE_NO_PAD)
            .map_err(|_| Error::format("code", "not base64"))?;
        let SignedBag(payload, signature) =
            rmp_serde::from_slice(&bag).map_err(|_| Error::format("code", "not a code"))?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        if mac.verify_slice(&signature).is_err() {
            tracing::error!("authorization code with an invalid signature");
            return Err(Error::InvalidSignature { kind: KIND });
        }

        let grant: SerdeGrant = rmp_serde::from_slice(&payload).map_err(|_| Error::format("code", "corrupt payload"))?;
        let issued = Utc
            .timestamp_opt(grant.issued, 0)
            .single()
            .ok_or_else(|| Error::format("code", "issue time out of range"))?;

        let expired_at = issued + self.maximum_age;
        if Utc::now() > expired_at {
            return Err(Error::ExpiredMessage { kind: KIND, expired_at });
        }

        if !self.nonces.try_consume(CONTEXT, &grant.nonce, issued, deadline)? {
            tracing::error!(client_id = %grant.client_id, "authorization code redeemed twice");
            return Err(Error::ReplayedMessage { kind: KIND });
        }

        let redirect_uri = match grant.redirect_uri {
            Some(uri) => Some(uri.parse().map_err(|_| Error::format("code", "corrupt redirect uri"))?),
            None => None,
        };

        Ok(AuthorizationGrant {
            client_id: grant.client_id,
            redirect_uri,
            scope: grant.scope,
            user: grant.user,
        })
    }
}
