use std::sync::Arc;

use url::Url;

use crate::channel::{Channel, DirectWebRequestHandler, OutgoingWebResponse, WebRequest};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::messaging::{Message, MessageKind};
use crate::settings::SecuritySettings;
use super::{access_token_request, authorization_request, channel};

/// A client of one authorization server.
pub struct Client {
    channel: Channel,
    client_id: String,
    client_secret: Option<String>,
    authorization_endpoint: Url,
    token_endpoint: Url,
    redirect_uri: Url,
}

impl Client {
    /// A client registered with `redirect_uri`.
    pub fn new(
        client_id: &str,
        client_secret: Option<&str>,
        authorization_endpoint: Url,
        token_endpoint: Url,
        redirect_uri: Url,
        settings: SecuritySettings,
    ) -> Result<Self> {
        Ok(Client {
            channel: channel(settings)?,
            client_id: client_id.to_string(),
            client_secret: client_secret.map(str::to_string),
            authorization_endpoint,
            token_endpoint,
            redirect_uri,
        })
    }

    /// Reach the token endpoint through this handler.
    pub fn with_handler(mut self, handler: Arc<dyn DirectWebRequestHandler>) -> Self {
        self.channel = self.channel.with_handler(handler);
        self
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Send the user to the authorization endpoint.
    ///
    /// `state` is handed back unchanged and should bind the response to the user's session.
    pub fn authorization_redirect(
        &self,
        scope: Option<&str>,
        state: Option<&str>,
        deadline: &Deadline,
    ) -> Result<OutgoingWebResponse> {
        let message = authorization_request(
            &self.authorization_endpoint,
            &self.client_id,
            Some(&self.redirect_uri),
            scope,
            state,
        )?;
        self.channel.send(message, deadline)
    }

    /// Read the user agent's return to the redirect uri.
    ///
    /// A denied request is returned as well, its kind tells them apart.
    pub fn read_authorization<R: WebRequest + ?Sized>(&self, request: &R, deadline: &Deadline) -> Result<Option<Message>> {
        match self.channel.read_incoming(request, deadline)? {
            Some(message)
                if message.kind() == MessageKind::EndUserAuthorizationSuccessResponse
                    || message.kind() == MessageKind::EndUserAuthorizationFailedResponse =>
            {
                Ok(Some(message))
            }
            Some(message) => Err(Error::violation(format!(
                "expected an authorization response, got {:?}",
                message.kind()
            ))),
            None => Ok(None),
        }
    }

    /// Redeem the code for an access token.
    ///
    /// An error response of the server is turned into a protocol violation carrying its error
    /// code.
    pub fn exchange_code(&self, code: &str, deadline: &Deadline) -> Result<Message> {
        let request = access_token_request(
            &self.token_endpoint,
            code,
            &self.client_id,
            self.client_secret.as_ref().map(String::as_str),
            Some(&self.redirect_uri),
        )?;

        let response = self.channel.request(request, deadline)?;
        match response.kind() {
            MessageKind::AccessTokenSuccessResponse => Ok(response),
            _ => Err(Error::violation(format!(
                "token endpoint refused: {}",
                response.text("error").unwrap_or("unknown error")
            ))),
        }
    }
}
