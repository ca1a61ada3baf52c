use std::sync::Arc;

use subtle::ConstantTimeEq;

use crate::bindings::BindingElement;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::messaging::{Message, MessageKind, ProtocolVersion, Protections};
use super::{TokenManager, TokenType};

/// Checks that incoming tokens are used for what they were issued for.
///
/// Runs after all protections, so only tokens of authentic messages are looked at. Access tokens
/// are the only ones accepted for protected resources, and only request tokens may be authorized
/// or exchanged. In OAuth 1.0a the exchange must also present the verifier of the authorization.
pub struct TokenHandling {
    tokens: Arc<dyn TokenManager>,
}

impl TokenHandling {
    /// Classify tokens with this manager.
    pub fn new(tokens: Arc<dyn TokenManager>) -> Self {
        TokenHandling { tokens }
    }

    fn expect(&self, token: &str, expected: TokenType) -> Result<()> {
        let actual = self.tokens.token_type(token);
        if actual == expected {
            Ok(())
        } else {
            tracing::warn!(?expected, ?actual, "token used for the wrong purpose");
            Err(Error::violation(format!("expected a {:?} token, got {:?}", expected, actual)))
        }
    }
}

impl BindingElement for TokenHandling {
    fn protection(&self) -> Protections {
        Protections::NONE
    }

    fn process_outgoing(&self, _: &mut Message, _: &Deadline) -> Result<Option<Protections>> {
        Ok(None)
    }

    fn process_incoming(&self, message: &mut Message, _: &Deadline) -> Result<Option<Protections>> {
        let token = match message.text("oauth_token") {
            Some(token) => token,
            None => return Ok(None),
        };

        match message.kind() {
            MessageKind::AccessProtectedResourceRequest => self.expect(token, TokenType::Access)?,
            MessageKind::UserAuthorizationRequest => self.expect(token, TokenType::Request)?,
            MessageKind::AuthorizedTokenRequest => {
                self.expect(token, TokenType::Request)?;
                if message.version() == ProtocolVersion::OAuth10a {
                    let provided = message.text("oauth_verifier").unwrap_or("");
                    let expected = self.tokens.verifier(token).unwrap_or_default();
                    if expected.is_empty() || !bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
                        tracing::warn!("access token request with a wrong verifier");
                        return Err(Error::violation("oauth_verifier does not match"));
                    }
                }
            }
            _ => (),
        }

        Ok(None)
    }
}
