//! OAuth 1.0 and 1.0a.
//!
//! Both sides of the three-legged flow. The consumer obtains a request token, sends the user to
//! authorize it and trades it for an access token with which it signs requests for protected
//! resources. The service provider answers each of these steps.
//!
//! No state about an ongoing authorization is kept implicitly. The consumer gets the request
//! token credentials back from [`Consumer::request_token`] and must hand them back into
//! [`Consumer::access_token`], storing them in whatever per-user storage it has in between.
//!
//! [`Consumer::request_token`]: struct.Consumer.html#method.request_token
//! [`Consumer::access_token`]: struct.Consumer.html#method.access_token
use std::sync::Arc;

use crate::bindings::{BindingElement, ExpirationProtection, OAuthSigning, Pipeline, ReplayProtection, SignatureMethod};
use crate::channel::Channel;
use crate::error::Result;
use crate::messaging::factory::{OAuth1MessageFactory, ServiceProviderEndpoints};
use crate::settings::SecuritySettings;
use crate::stores::NonceStore;

mod consumer;
mod handling;
mod service_provider;
mod tokens;

pub use self::consumer::Consumer;
pub use self::handling::TokenHandling;
pub use self::service_provider::{problem_response, ServiceProvider};
pub use self::tokens::{ConsumerMap, TokenCredentials, TokenManager, TokenType};

/// Signature methods used when none are configured. The first one signs outgoing requests.
pub const DEFAULT_SIGNATURE_METHODS: [SignatureMethod; 2] = [SignatureMethod::HmacSha1, SignatureMethod::HmacSha256];

fn protections(
    tokens: Arc<dyn TokenManager>,
    nonces: Arc<dyn NonceStore>,
    settings: &SecuritySettings,
) -> Vec<Box<dyn BindingElement>> {
    vec![
        Box::new(OAuthSigning::new(DEFAULT_SIGNATURE_METHODS.to_vec(), tokens)),
        Box::new(ExpirationProtection::new(settings)),
        Box::new(ReplayProtection::new(nonces, settings)),
    ]
}

/// A channel for the consumer side.
pub fn consumer_channel(
    endpoints: ServiceProviderEndpoints,
    tokens: Arc<dyn TokenManager>,
    nonces: Arc<dyn NonceStore>,
    settings: SecuritySettings,
) -> Result<Channel> {
    let pipeline = Pipeline::new(protections(tokens, nonces, &settings))?;
    Channel::new(Box::new(OAuth1MessageFactory::new(endpoints)), pipeline, settings)
}

/// A channel for the service provider side, which also checks token usage.
pub fn service_provider_channel(
    endpoints: ServiceProviderEndpoints,
    tokens: Arc<dyn TokenManager>,
    nonces: Arc<dyn NonceStore>,
    settings: SecuritySettings,
) -> Result<Channel> {
    let mut elements = protections(tokens.clone(), nonces, &settings);
    elements.push(Box::new(TokenHandling::new(tokens)));
    let pipeline = Pipeline::new(elements)?;
    Channel::new(Box::new(OAuth1MessageFactory::new(endpoints)), pipeline, settings)
}
