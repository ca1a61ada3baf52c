use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rand::{thread_rng, RngCore};
use subtle::ConstantTimeEq;
use url::Url;

use crate::channel::{Channel, OutgoingWebResponse, WebRequest};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::messaging::{Message, MessageKind, ProtocolVersion};
use crate::settings::SecuritySettings;
use crate::stores::NonceStore;
use super::{channel, AuthorizationGrant, CodeBag};

/// Default lifetime of issued access tokens, in seconds.
const TOKEN_LIFETIME: i64 = 3600;

struct RegisteredClient {
    redirect_uri: Url,
    secret: Option<String>,
}

struct IssuedToken {
    grant: AuthorizationGrant,
    until: DateTime<Utc>,
}

/// The authorization and token endpoints of an authorization server.
pub struct AuthorizationServer {
    channel: Channel,
    codes: CodeBag,
    clients: RwLock<HashMap<String, RegisteredClient>>,
    tokens: RwLock<HashMap<String, IssuedToken>>,
    token_lifetime: Duration,
}

impl AuthorizationServer {
    /// A server with an ephemeral code signing key.
    pub fn new(nonces: Arc<dyn NonceStore>, settings: SecuritySettings) -> Result<Self> {
        let codes = CodeBag::ephemeral(Duration::minutes(10), nonces);
        Ok(AuthorizationServer {
            channel: channel(settings)?,
            codes,
            clients: RwLock::default(),
            tokens: RwLock::default(),
            token_lifetime: Duration::seconds(TOKEN_LIFETIME),
        })
    }

    /// Issue access tokens valid for another duration than an hour.
    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }

    /// Use another code bag, for example one with a persistent key.
    pub fn with_codes(mut self, codes: CodeBag) -> Self {
        self.codes = codes;
        self
    }

    /// Register a client. Public clients have no secret.
    pub fn register_client(&self, client_id: &str, redirect_uri: Url, secret: Option<&str>) {
        self.clients.write().insert(
            client_id.to_string(),
            RegisteredClient {
                redirect_uri,
                secret: secret.map(str::to_string),
            },
        );
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Read a request at either endpoint.
    pub fn read_request<R: WebRequest + ?Sized>(&self, request: &R, deadline: &Deadline) -> Result<Option<Message>> {
        self.channel.read_incoming(request, deadline)
    }

    /// Where the response to an authorization request goes.
    ///
    /// A redirect uri in the request must be the registered one. Errors here must be shown to
    /// the user and never redirected.
    pub fn redirect_uri(&self, request: &Message) -> Result<Url> {
        if request.kind() != MessageKind::EndUserAuthorizationRequest {
            return Err(Error::violation("not an authorization request"));
        }

        let client_id = request.text("client_id").unwrap_or("");
        let clients = self.clients.read();
        let client = clients
            .get(client_id)
            .ok_or_else(|| Error::violation(format!("unknown client `{}`", client_id)))?;

        match request.url("redirect_uri") {
            Some(uri) if uri != &client.redirect_uri => Err(Error::violation("redirect_uri is not registered")),
            _ => Ok(client.redirect_uri.clone()),
        }
    }

    /// The user granted the authorization request, redirect with a code.
    pub fn approve(&self, request: &Message, user: &str, deadline: &Deadline) -> Result<OutgoingWebResponse> {
        let redirect_uri = self.redirect_uri(request)?;
        let grant = AuthorizationGrant {
            client_id: request.text("client_id").unwrap_or("").to_string(),
            redirect_uri: request.url("redirect_uri").cloned(),
            scope: request.text("scope").map(str::to_string),
            user: user.to_string(),
        };

        let mut response = Message::new(MessageKind::EndUserAuthorizationSuccessResponse, ProtocolVersion::OAuth20)?
            .with_recipient(redirect_uri)
            .with("code", self.codes.encode(&grant)?)?;
        if let Some(state) = request.text("state") {
            response.set("state", state)?;
        }
        self.channel.send(response, deadline)
    }

    /// The user denied the authorization request.
    pub fn deny(&self, request: &Message, deadline: &Deadline) -> Result<OutgoingWebResponse> {
        let redirect_uri = self.redirect_uri(request)?;
        let mut response = Message::new(MessageKind::EndUserAuthorizationFailedResponse, ProtocolVersion::OAuth20)?
            .with_recipient(redirect_uri)
            .with("error", "access_denied")?;
        if let Some(state) = request.text("state") {
            response.set("state", state)?;
        }
        self.channel.send(response, deadline)
    }

    fn authenticate(&self, request: &Message) -> bool {
        let client_id = request.text("client_id").unwrap_or("");
        let clients = self.clients.read();
        match clients.get(client_id) {
            Some(RegisteredClient { secret: None, .. }) => true,
            Some(RegisteredClient { secret: Some(expected), .. }) => {
                let provided = request.text("client_secret").unwrap_or("");
                bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
            }
            None => false,
        }
    }

    fn token_error(&self, error: &str, description: &str, deadline: &Deadline) -> Result<OutgoingWebResponse> {
        let response = Message::new(MessageKind::AccessTokenFailedResponse, ProtocolVersion::OAuth20)?
            .with("error", error)?
            .with("error_description", description)?;
        self.channel.prepare_response(response, deadline)
    }

    /// Answer an access token request.
    ///
    /// Failures to authenticate the client or redeem the code are answered with the protocol's
    /// error response. Codes that were forged, expired or used before are refused alike.
    pub fn token_response(&self, request: &Message, deadline: &Deadline) -> Result<OutgoingWebResponse> {
        if request.kind() != MessageKind::AccessTokenAuthorizationCodeRequest {
            return Err(Error::violation("not an access token request"));
        }

        if !self.authenticate(request) {
            tracing::warn!(client_id = request.text("client_id"), "client authentication failed");
            return self.token_error("invalid_client", "client authentication failed", deadline);
        }

        let code = request.text("code").unwrap_or("");
        let grant = match self.codes.decode(code, deadline) {
            Ok(grant) => grant,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => {
                tracing::warn!(%err, "authorization code refused");
                return self.token_error("invalid_grant", "the code is invalid, expired or was used", deadline);
            }
        };

        if Some(grant.client_id.as_str()) != request.text("client_id")
            || grant.redirect_uri.as_ref() != request.url("redirect_uri")
        {
            return self.token_error("invalid_grant", "the code was issued to another client or redirect uri", deadline);
        }

        let mut bytes = vec![0; 24];
        thread_rng().fill_bytes(&mut bytes);
        let token = base64::encode_config(&bytes, base64::URL_SAFE_NO_PAD);
        let until = Utc::now()
            .checked_add_signed(self.token_lifetime)
            .ok_or_else(|| Error::Configuration("access token lifetime overflows".into()))?;

        let mut response = Message::new(MessageKind::AccessTokenSuccessResponse, ProtocolVersion::OAuth20)?
            .with("access_token", token.as_str())?
            .with("token_type", "bearer")?
            .with("expires_in", self.token_lifetime.num_seconds())?;
        if let Some(scope) = &grant.scope {
            response.set("scope", scope.as_str())?;
        }

        self.tokens.write().insert(token, IssuedToken { grant, until });
        self.channel.prepare_response(response, deadline)
    }

    /// The grant behind an issued access token that has not expired yet.
    ///
    /// An expired token is forgotten on lookup.
    pub fn grant_of(&self, access_token: &str) -> Option<AuthorizationGrant> {
        let mut tokens = self.tokens.write();
        match tokens.get(access_token) {
            Some(issued) if Utc::now() < issued.until => Some(issued.grant.clone()),
            Some(_) => {
                tracing::debug!("access token expired");
                tokens.remove(access_token);
                None
            }
            None => None,
        }
    }

    /// Forget all expired access tokens.
    pub fn purge_expired(&self) {
        let now = Utc::now();
        let mut tokens = self.tokens.write();
        tokens.retain(|_, issued| now < issued.until);
        tracing::debug!(remaining = tokens.len(), "purged access tokens");
    }

    /// Number of access tokens currently remembered.
    pub fn issued_tokens(&self) -> usize {
        self.tokens.read().len()
    }
}
