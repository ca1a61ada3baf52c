use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rand::{thread_rng, RngCore};

use crate::error::{Error, Result};

/// Classification of an OAuth 1 token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenType {
    /// Issued by the request token endpoint, possibly authorized by the user.
    Request,
    /// Grants access to protected resources.
    Access,
    /// Unknown, revoked or otherwise unusable.
    Invalid,
}

/// The consumer and token credentials the signing and token checks rely on.
///
/// Implemented by the hosting application, usually on top of its database.
pub trait TokenManager: Send + Sync {
    /// The shared secret of a consumer.
    fn consumer_secret(&self, consumer_key: &str) -> Option<String>;

    /// The secret of a request or access token.
    fn token_secret(&self, token: &str) -> Option<String>;

    /// What kind of token this is.
    fn token_type(&self, token: &str) -> TokenType;

    /// The verifier handed out when the user authorized a request token.
    fn verifier(&self, _request_token: &str) -> Option<String> {
        None
    }
}

impl<T: TokenManager + ?Sized> TokenManager for Arc<T> {
    fn consumer_secret(&self, consumer_key: &str) -> Option<String> {
        (**self).consumer_secret(consumer_key)
    }

    fn token_secret(&self, token: &str) -> Option<String> {
        (**self).token_secret(token)
    }

    fn token_type(&self, token: &str) -> TokenType {
        (**self).token_type(token)
    }

    fn verifier(&self, request_token: &str) -> Option<String> {
        (**self).verifier(request_token)
    }
}

/// A token and its secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenCredentials {
    /// The public token.
    pub token: String,
    /// The secret that signs requests made with the token.
    pub secret: String,
}

struct Token {
    secret: String,
    kind: TokenType,
    consumer_key: Option<String>,
    callback: Option<String>,
    verifier: Option<String>,
    authorized: bool,
    issued: DateTime<Utc>,
}

impl Token {
    fn new(secret: String, kind: TokenType) -> Self {
        Token {
            secret,
            kind,
            consumer_key: None,
            callback: None,
            verifier: None,
            authorized: false,
            issued: Utc::now(),
        }
    }

    /// Request tokens are only usable for a while, access tokens until revoked.
    fn is_stale(&self, lifetime: Duration, now: DateTime<Utc>) -> bool {
        self.kind == TokenType::Request && now.signed_duration_since(self.issued) >= lifetime
    }
}

/// Keeps track of consumers and tokens in hash-maps.
///
/// Usable on both sides: a service provider registers all its consumers and issues tokens, a
/// consumer registers its own credentials and inserts the tokens it obtained. Request tokens that
/// were not exchanged within their lifetime, an hour by default, are treated as invalid and are
/// dropped by `purge_stale_request_tokens`.
pub struct ConsumerMap {
    consumers: RwLock<HashMap<String, String>>,
    tokens: RwLock<HashMap<String, Token>>,
    request_token_lifetime: Duration,
}

impl Default for ConsumerMap {
    fn default() -> Self {
        ConsumerMap {
            consumers: RwLock::default(),
            tokens: RwLock::default(),
            request_token_lifetime: Duration::hours(1),
        }
    }
}

fn random_string(len: usize) -> String {
    let mut bytes = vec![0; len];
    thread_rng().fill_bytes(&mut bytes);
    base64::encode_config(&bytes, base64::URL_SAFE_NO_PAD)
}

impl ConsumerMap {
    /// An empty map.
    pub fn new() -> Self {
        ConsumerMap::default()
    }

    /// Keep request tokens usable for another duration than an hour.
    pub fn with_request_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.request_token_lifetime = lifetime;
        self
    }

    /// Drop request tokens older than their lifetime, returns how many were dropped.
    pub fn purge_stale_request_tokens(&self, now: DateTime<Utc>) -> usize {
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        let lifetime = self.request_token_lifetime;
        tokens.retain(|_, token| !token.is_stale(lifetime, now));
        let purged = before - tokens.len();
        tracing::debug!(purged, "dropped stale request tokens");
        purged
    }

    fn live<'a>(&self, tokens: &'a HashMap<String, Token>, token: &str) -> Option<&'a Token> {
        tokens
            .get(token)
            .filter(|token| !token.is_stale(self.request_token_lifetime, Utc::now()))
    }

    /// Register or replace a consumer.
    pub fn register_consumer(&self, consumer_key: &str, secret: &str) {
        self.consumers
            .write()
            .insert(consumer_key.to_string(), secret.to_string());
    }

    /// Directly record a token, for example one a consumer received.
    pub fn insert_token(&self, token: &str, secret: &str, kind: TokenType) {
        self.tokens
            .write()
            .insert(token.to_string(), Token::new(secret.to_string(), kind));
    }

    /// Unconditionally forget a token.
    pub fn revoke(&self, token: &str) {
        self.tokens.write().remove(token);
    }

    /// Issue a fresh request token to a known consumer.
    pub fn issue_request_token(&self, consumer_key: &str, callback: Option<&str>) -> Result<TokenCredentials> {
        if !self.consumers.read().contains_key(consumer_key) {
            return Err(Error::violation(format!("unknown consumer `{}`", consumer_key)));
        }

        let credentials = TokenCredentials {
            token: random_string(16),
            secret: random_string(24),
        };
        let mut token = Token::new(credentials.secret.clone(), TokenType::Request);
        token.consumer_key = Some(consumer_key.to_string());
        token.callback = callback.map(str::to_string);
        self.tokens.write().insert(credentials.token.clone(), token);
        Ok(credentials)
    }

    /// The callback recorded with a request token.
    pub fn callback(&self, request_token: &str) -> Option<String> {
        self.live(&self.tokens.read(), request_token)
            .and_then(|token| token.callback.clone())
    }

    /// The user authorized the request token, returns the verifier for the consumer.
    pub fn authorize(&self, request_token: &str) -> Result<String> {
        let lifetime = self.request_token_lifetime;
        let mut tokens = self.tokens.write();
        let token = match tokens.get_mut(request_token) {
            Some(token) if token.kind == TokenType::Request && !token.is_stale(lifetime, Utc::now()) => token,
            _ => return Err(Error::violation("not a usable request token")),
        };

        let verifier = random_string(12);
        token.authorized = true;
        token.verifier = Some(verifier.clone());
        Ok(verifier)
    }

    /// Trade an authorized request token for an access token.
    ///
    /// The request token is consumed, a second exchange fails.
    pub fn exchange(&self, request_token: &str, consumer_key: &str) -> Result<TokenCredentials> {
        let mut tokens = self.tokens.write();
        match self.live(&tokens, request_token) {
            Some(token)
                if token.kind == TokenType::Request
                    && token.authorized
                    && token.consumer_key.as_ref().map(String::as_str) == Some(consumer_key) => {}
            _ => return Err(Error::violation("request token is unknown, unauthorized or of another consumer")),
        }
        tokens.remove(request_token);

        let credentials = TokenCredentials {
            token: random_string(16),
            secret: random_string(24),
        };
        let mut token = Token::new(credentials.secret.clone(), TokenType::Access);
        token.consumer_key = Some(consumer_key.to_string());
        token.authorized = true;
        tokens.insert(credentials.token.clone(), token);
        Ok(credentials)
    }
}

impl TokenManager for ConsumerMap {
    fn consumer_secret(&self, consumer_key: &str) -> Option<String> {
        self.consumers.read().get(consumer_key).cloned()
    }

    fn token_secret(&self, token: &str) -> Option<String> {
        self.live(&self.tokens.read(), token)
            .filter(|token| token.kind != TokenType::Invalid)
            .map(|token| token.secret.clone())
    }

    fn token_type(&self, token: &str) -> TokenType {
        self.live(&self.tokens.read(), token)
            .map_or(TokenType::Invalid, |token| token.kind)
    }

    fn verifier(&self, request_token: &str) -> Option<String> {
        self.live(&self.tokens.read(), request_token)
            .and_then(|token| token.verifier.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_token_lifecycle() {
        let map = ConsumerMap::new();
        map.register_consumer("ck", "cs");

        assert!(map.issue_request_token("stranger", None).is_err());

        let request = map.issue_request_token("ck", Some("oob")).unwrap();
        assert_eq!(map.token_type(&request.token), TokenType::Request);
        assert_eq!(map.token_secret(&request.token), Some(request.secret.clone()));
        assert_eq!(map.callback(&request.token).as_deref(), Some("oob"));

        // Not yet authorized.
        assert!(map.exchange(&request.token, "ck").is_err());

        let verifier = map.authorize(&request.token).unwrap();
        assert_eq!(map.verifier(&request.token), Some(verifier));
        assert!(map.exchange(&request.token, "other").is_err());

        let access = map.exchange(&request.token, "ck").unwrap();
        assert_eq!(map.token_type(&access.token), TokenType::Access);
        assert_eq!(map.token_type(&request.token), TokenType::Invalid);
        assert!(map.exchange(&request.token, "ck").is_err());

        map.revoke(&access.token);
        assert_eq!(map.token_secret(&access.token), None);
    }

    #[test]
    fn stale_request_tokens() {
        let map = ConsumerMap::new().with_request_token_lifetime(Duration::zero());
        map.register_consumer("ck", "cs");
        map.insert_token("at", "ats", TokenType::Access);

        let request = map.issue_request_token("ck", None).unwrap();
        assert_eq!(map.token_type(&request.token), TokenType::Invalid);
        assert_eq!(map.token_secret(&request.token), None);
        assert!(map.authorize(&request.token).is_err());

        assert_eq!(map.purge_stale_request_tokens(Utc::now()), 1);
        assert_eq!(map.token_type("at"), TokenType::Access);
    }

    #[test]
    fn fresh_request_tokens_survive_purge() {
        let map = ConsumerMap::new();
        map.register_consumer("ck", "cs");
        let request = map.issue_request_token("ck", None).unwrap();

        assert_eq!(map.purge_stale_request_tokens(Utc::now()), 0);
        assert_eq!(map.token_type(&request.token), TokenType::Request);
        assert_eq!(map.purge_stale_request_tokens(Utc::now() + Duration::hours(2)), 1);
        assert_eq!(map.token_type(&request.token), TokenType::Invalid);
    }

    #[test]
    fn access_tokens_cannot_be_authorized() {
        let map = ConsumerMap::new();
        map.insert_token("at", "ats", TokenType::Access);
        assert!(map.authorize("at").is_err());
        assert!(map.authorize("unknown").is_err());
    }
}
