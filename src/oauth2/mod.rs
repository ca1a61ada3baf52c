//! OAuth 2.0, the authorization code grant.
//!
//! Messages of this protocol are not signed. Their security rests on TLS, on the authorization
//! code being single use and on the client authenticating at the token endpoint, so the channel
//! runs without any binding element.
use url::Url;

use crate::bindings::Pipeline;
use crate::channel::Channel;
use crate::error::Result;
use crate::messaging::factory::OAuth2MessageFactory;
use crate::messaging::{HttpMethod, Message, MessageKind, ProtocolVersion};
use crate::settings::SecuritySettings;

mod client;
pub mod code;
mod server;

pub use self::client::Client;
pub use self::code::{AuthorizationGrant, CodeBag};
pub use self::server::AuthorizationServer;

/// A channel for either side.
pub fn channel(settings: SecuritySettings) -> Result<Channel> {
    Channel::new(Box::new(OAuth2MessageFactory), Pipeline::empty(), settings)
}

/// Ask the user, through the authorization endpoint, to grant access.
pub fn authorization_request(
    endpoint: &Url,
    client_id: &str,
    redirect_uri: Option<&Url>,
    scope: Option<&str>,
    state: Option<&str>,
) -> Result<Message> {
    let mut message = Message::new(MessageKind::EndUserAuthorizationRequest, ProtocolVersion::OAuth20)?
        .with_recipient(endpoint.clone())
        .with("client_id", client_id)?;
    if let Some(redirect_uri) = redirect_uri {
        message.set("redirect_uri", redirect_uri.clone())?;
    }
    if let Some(scope) = scope {
        message.set("scope", scope)?;
    }
    if let Some(state) = state {
        message.set("state", state)?;
    }
    Ok(message)
}

/// Redeem an authorization code at the token endpoint.
pub fn access_token_request(
    endpoint: &Url,
    code: &str,
    client_id: &str,
    client_secret: Option<&str>,
    redirect_uri: Option<&Url>,
) -> Result<Message> {
    let mut message = Message::new(MessageKind::AccessTokenAuthorizationCodeRequest, ProtocolVersion::OAuth20)?
        .with_recipient(endpoint.clone())
        .with("code", code)?
        .with("client_id", client_id)?;
    message.set_http_method(HttpMethod::Post);
    if let Some(secret) = client_secret {
        message.set("client_secret", secret)?;
    }
    if let Some(redirect_uri) = redirect_uri {
        message.set("redirect_uri", redirect_uri.clone())?;
    }
    Ok(message)
}
