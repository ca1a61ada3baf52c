use std::sync::Arc;

use url::Url;

use crate::channel::{Channel, DirectWebRequestHandler, HttpRequestInfo, OutgoingWebResponse, WebRequest};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::messaging::factory::ServiceProviderEndpoints;
use crate::messaging::{HttpMethod, Message, MessageKind, ProtocolVersion};
use crate::settings::SecuritySettings;
use crate::stores::NonceStore;
use super::{consumer_channel, ConsumerMap, TokenCredentials, TokenType};

/// Callback value announcing that the user will copy the verifier by hand.
const OUT_OF_BAND: &str = "oob";

/// The consumer side of the three-legged flow.
pub struct Consumer {
    channel: Channel,
    endpoints: ServiceProviderEndpoints,
    consumer_key: String,
    tokens: Arc<ConsumerMap>,
    version: ProtocolVersion,
}

fn credentials(response: &Message) -> Result<TokenCredentials> {
    let token = response
        .text("oauth_token")
        .ok_or_else(|| Error::violation("response lacks oauth_token"))?;
    let secret = response.text("oauth_token_secret").unwrap_or("");
    Ok(TokenCredentials {
        token: token.to_string(),
        secret: secret.to_string(),
    })
}

impl Consumer {
    /// A consumer speaking OAuth 1.0a with the given service provider.
    pub fn new(
        endpoints: ServiceProviderEndpoints,
        consumer_key: &str,
        consumer_secret: &str,
        nonces: Arc<dyn NonceStore>,
        settings: SecuritySettings,
    ) -> Result<Self> {
        let tokens = Arc::new(ConsumerMap::new());
        tokens.register_consumer(consumer_key, consumer_secret);
        let channel = consumer_channel(endpoints.clone(), tokens.clone(), nonces, settings)?;

        Ok(Consumer {
            channel,
            endpoints,
            consumer_key: consumer_key.to_string(),
            tokens,
            version: ProtocolVersion::OAuth10a,
        })
    }

    /// Speak another protocol revision.
    pub fn with_version(mut self, version: ProtocolVersion) -> Result<Self> {
        match version {
            ProtocolVersion::OAuth10 | ProtocolVersion::OAuth10a => {
                self.version = version;
                Ok(self)
            }
            other => Err(Error::Configuration(format!("{:?} is not an OAuth 1 revision", other))),
        }
    }

    /// Reach the service provider through this handler.
    pub fn with_handler(mut self, handler: Arc<dyn DirectWebRequestHandler>) -> Self {
        self.channel = self.channel.with_handler(handler);
        self
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    fn message(&self, kind: MessageKind, recipient: &Url) -> Result<Message> {
        let mut message = Message::new(kind, self.version)?.with_recipient(recipient.clone());
        message.set("oauth_consumer_key", self.consumer_key.as_str())?;
        message.set_http_method(HttpMethod::Post);
        Ok(message)
    }

    /// Obtain an unauthorized request token.
    ///
    /// In 1.0a the callback is announced now, `oob` when there is none.
    pub fn request_token(&self, callback: Option<&Url>, deadline: &Deadline) -> Result<TokenCredentials> {
        let mut message = self.message(MessageKind::UnauthorizedTokenRequest, &self.endpoints.request_token)?;
        if self.version == ProtocolVersion::OAuth10a {
            let callback = callback.map_or(OUT_OF_BAND, Url::as_str);
            message.set("oauth_callback", callback)?;
        }

        let response = self.channel.request(message, deadline)?;
        let credentials = credentials(&response)?;
        tracing::debug!(token = %credentials.token, "obtained request token");
        Ok(credentials)
    }

    /// Redirect the user to authorize the request token.
    ///
    /// Only OAuth 1.0 passes the callback here.
    pub fn authorization_redirect(
        &self,
        request_token: &TokenCredentials,
        callback: Option<Url>,
        deadline: &Deadline,
    ) -> Result<OutgoingWebResponse> {
        let mut message = Message::new(MessageKind::UserAuthorizationRequest, self.version)?
            .with_recipient(self.endpoints.user_authorization.clone());
        message.set("oauth_token", request_token.token.as_str())?;
        if let (ProtocolVersion::OAuth10, Some(callback)) = (self.version, callback) {
            message.set("oauth_callback", callback)?;
        }

        self.channel.send(message, deadline)
    }

    /// Read the user agent's return from the service provider.
    pub fn read_authorization<R: WebRequest + ?Sized>(&self, request: &R, deadline: &Deadline) -> Result<Option<Message>> {
        match self.channel.read_incoming(request, deadline)? {
            Some(message) if message.kind() == MessageKind::UserAuthorizationResponse => Ok(Some(message)),
            Some(message) => Err(Error::violation(format!(
                "expected an authorization response, got {:?}",
                message.kind()
            ))),
            None => Ok(None),
        }
    }

    /// Trade the authorized request token for an access token.
    ///
    /// The verifier is required in 1.0a and ignored in 1.0.
    pub fn access_token(
        &self,
        request_token: &TokenCredentials,
        verifier: Option<&str>,
        deadline: &Deadline,
    ) -> Result<TokenCredentials> {
        let mut message = self.message(MessageKind::AuthorizedTokenRequest, &self.endpoints.access_token)?;
        message.set("oauth_token", request_token.token.as_str())?;
        if self.version == ProtocolVersion::OAuth10a {
            let verifier = verifier.ok_or_else(|| Error::violation("OAuth 1.0a requires the verifier"))?;
            message.set("oauth_verifier", verifier)?;
        }

        self.tokens
            .insert_token(&request_token.token, &request_token.secret, TokenType::Request);
        let result = self.channel.request(message, deadline);
        self.tokens.revoke(&request_token.token);

        let access = credentials(&result?)?;
        self.tokens.insert_token(&access.token, &access.secret, TokenType::Access);
        Ok(access)
    }

    /// Sign a request for a protected resource.
    ///
    /// The query of `url` is signed as well. The returned request is performed by the caller.
    pub fn authorize_request(
        &self,
        access_token: &TokenCredentials,
        method: HttpMethod,
        url: Url,
        deadline: &Deadline,
    ) -> Result<HttpRequestInfo> {
        self.tokens
            .insert_token(&access_token.token, &access_token.secret, TokenType::Access);

        let mut message = self.message(MessageKind::AccessProtectedResourceRequest, &url)?;
        message.set_http_method(method);
        message.set("oauth_token", access_token.token.as_str())?;
        self.channel.prepare_request(&mut message, deadline)
    }
}
