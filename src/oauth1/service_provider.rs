use std::sync::Arc;

use url::Url;

use crate::channel::{Body, Channel, OutgoingWebResponse, Status, WebRequest};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::messaging::encoding::to_query;
use crate::messaging::factory::ServiceProviderEndpoints;
use crate::messaging::{Message, MessageKind, ProtocolVersion};
use crate::settings::SecuritySettings;
use crate::stores::NonceStore;
use super::{service_provider_channel, ConsumerMap};

/// The service provider side of the three-legged flow.
///
/// Every method expecting a message takes one previously returned by `read_request`, all
/// protections have been verified at that point.
pub struct ServiceProvider {
    channel: Channel,
    tokens: Arc<ConsumerMap>,
}

fn expect_kind(message: &Message, kind: MessageKind) -> Result<()> {
    if message.kind() == kind {
        Ok(())
    } else {
        Err(Error::violation(format!("expected {:?}, got {:?}", kind, message.kind())))
    }
}

fn required<'a>(message: &'a Message, part: &str) -> Result<&'a str> {
    message
        .text(part)
        .ok_or_else(|| Error::violation(format!("missing `{}`", part)))
}

impl ServiceProvider {
    /// Serve the endpoints for the consumers registered in `tokens`.
    pub fn new(
        endpoints: ServiceProviderEndpoints,
        tokens: Arc<ConsumerMap>,
        nonces: Arc<dyn NonceStore>,
        settings: SecuritySettings,
    ) -> Result<Self> {
        let channel = service_provider_channel(endpoints, tokens.clone(), nonces, settings)?;
        Ok(ServiceProvider { channel, tokens })
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Read and validate any request arriving at one of the endpoints or a protected resource.
    pub fn read_request<R: WebRequest + ?Sized>(&self, request: &R, deadline: &Deadline) -> Result<Option<Message>> {
        self.channel.read_incoming(request, deadline)
    }

    /// Issue a request token.
    pub fn request_token_response(&self, request: &Message, deadline: &Deadline) -> Result<OutgoingWebResponse> {
        expect_kind(request, MessageKind::UnauthorizedTokenRequest)?;
        let consumer_key = required(request, "oauth_consumer_key")?;
        let issued = self
            .tokens
            .issue_request_token(consumer_key, request.text("oauth_callback"))?;

        let response = Message::new(MessageKind::UnauthorizedTokenResponse, request.version())?
            .with("oauth_token", issued.token)?
            .with("oauth_token_secret", issued.secret)?;
        self.channel.send(response, deadline)
    }

    /// The user authorized the request token, send them back to the consumer.
    ///
    /// Without a usable callback the verifier is shown to the user instead, who copies it to the
    /// consumer by hand.
    pub fn authorize(&self, request: &Message, deadline: &Deadline) -> Result<OutgoingWebResponse> {
        expect_kind(request, MessageKind::UserAuthorizationRequest)?;
        let token = required(request, "oauth_token")?;
        let verifier = self.tokens.authorize(token)?;

        let callback = match request.version() {
            ProtocolVersion::OAuth10 => request.url("oauth_callback").cloned(),
            _ => self
                .tokens
                .callback(token)
                .and_then(|callback| callback.parse::<Url>().ok()),
        };

        let callback = match callback {
            Some(callback) => callback,
            None => {
                let body = to_query(vec![("oauth_token", token), ("oauth_verifier", verifier.as_str())]);
                return Ok(OutgoingWebResponse::with_body(Status::Ok, Body::Form(body)));
            }
        };

        let mut response = Message::new(MessageKind::UserAuthorizationResponse, request.version())?
            .with_recipient(callback)
            .with("oauth_token", token)?;
        if request.version() == ProtocolVersion::OAuth10a {
            response.set("oauth_verifier", verifier)?;
        }
        self.channel.send(response, deadline)
    }

    /// Exchange an authorized request token for an access token.
    pub fn access_token_response(&self, request: &Message, deadline: &Deadline) -> Result<OutgoingWebResponse> {
        expect_kind(request, MessageKind::AuthorizedTokenRequest)?;
        let token = required(request, "oauth_token")?;
        let consumer_key = required(request, "oauth_consumer_key")?;
        let access = self.tokens.exchange(token, consumer_key)?;

        let response = Message::new(MessageKind::AuthorizedTokenResponse, request.version())?
            .with("oauth_token", access.token)?
            .with("oauth_token_secret", access.secret)?;
        self.channel.send(response, deadline)
    }
}

/// Report a refused request in the `oauth_problem` convention.
///
/// Authentication failures answer 401, malformed requests 400.
pub fn problem_response(error: &Error) -> OutgoingWebResponse {
    let (status, problem) = match error {
        Error::InvalidSignature { .. } => (Status::Unauthorized, "signature_invalid"),
        Error::ReplayedMessage { .. } => (Status::Unauthorized, "nonce_used"),
        Error::ExpiredMessage { .. } => (Status::Unauthorized, "timestamp_refused"),
        Error::Format { .. } | Error::UnrecognizedMessage => (Status::BadRequest, "parameter_absent"),
        Error::ProtocolViolation(_) => (Status::BadRequest, "parameter_rejected"),
        _ => (Status::Unauthorized, "permission_denied"),
    };

    OutgoingWebResponse::with_body(status, Body::Form(to_query(vec![("oauth_problem", problem)])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MessageKind;

    #[test]
    fn problems() {
        let response = problem_response(&Error::ReplayedMessage {
            kind: MessageKind::AccessProtectedResourceRequest,
        });
        assert_eq!(response.status, Status::Unauthorized);
        assert_eq!(response.body, Some(Body::Form("oauth_problem=nonce_used".into())));

        let response = problem_response(&Error::violation("missing"));
        assert_eq!(response.status, Status::BadRequest);
    }
}
