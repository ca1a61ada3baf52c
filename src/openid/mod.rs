//! OpenID 1.1 and 2.0 authentication.
//!
//! A relying party sends the user to the provider with a `checkid` request. The provider answers
//! through the user agent with a signed positive assertion, or a negative one. The relying party
//! verifies the signature with an association it shares with the provider, or, lacking one, asks
//! the provider directly with a `check_authentication` request.
//!
//! Associations are established with the `associate` direct exchange. Only the `no-encryption`
//! session type is supported, which must only ever be used over TLS.
use std::sync::Arc;

use url::Url;

use crate::bindings::{BindingElement, ExpirationProtection, OpenIdSigning, Pipeline, ReplayProtection};
use crate::channel::{Channel, DirectWebRequestHandler};
use crate::error::{Error, Result};
use crate::messaging::encoding::extend_url;
use crate::messaging::factory::OpenIdMessageFactory;
use crate::messaging::{Message, MessageKind, ProtocolVersion};
use crate::settings::SecuritySettings;
use crate::stores::{AssociationStore, NonceStore};

pub mod provider;
pub mod relying_party;

fn channel(signing: OpenIdSigning, replay: ReplayProtection, settings: SecuritySettings) -> Result<Channel> {
    let elements: Vec<Box<dyn BindingElement>> = vec![
        Box::new(signing),
        Box::new(ExpirationProtection::new(&settings)),
        Box::new(replay),
    ];
    Channel::new(Box::new(OpenIdMessageFactory), Pipeline::new(elements)?, settings)
}

/// A channel for the provider side.
pub fn provider_channel(
    associations: Arc<dyn AssociationStore>,
    nonces: Arc<dyn NonceStore>,
    settings: SecuritySettings,
) -> Result<Channel> {
    let signing = OpenIdSigning::provider(associations, &settings);
    let replay = ReplayProtection::new(nonces, &settings);
    channel(signing, replay, settings)
}

/// A channel for the relying party side.
///
/// With a handler, assertions signed by unknown associations are verified by asking the
/// provider, and `associate` requests can be sent. OpenID 1.1 requests get a nonce in their
/// `return_to` url, and assertions without one are refused.
pub fn relying_party_channel(
    associations: Arc<dyn AssociationStore>,
    nonces: Arc<dyn NonceStore>,
    handler: Option<Arc<dyn DirectWebRequestHandler>>,
    settings: SecuritySettings,
) -> Result<Channel> {
    let signing = OpenIdSigning::relying_party(associations, handler.clone());
    let replay = ReplayProtection::new(nonces, &settings).with_return_to_nonces();
    let channel = channel(signing, replay, settings)?;
    Ok(match handler {
        Some(handler) => channel.with_handler(handler),
        None => channel,
    })
}

/// Ask the provider at `endpoint` to authenticate the user as `claimed_id`.
///
/// OpenID 1.1 assertions do not name their provider, so its endpoint is remembered in the
/// `return_to` url instead, which the provider signs.
pub fn check_id_request(
    version: ProtocolVersion,
    endpoint: &Url,
    claimed_id: &str,
    return_to: &Url,
    realm: Option<&Url>,
    immediate: bool,
) -> Result<Message> {
    let mode = if immediate { "checkid_immediate" } else { "checkid_setup" };
    let mut message = Message::new(MessageKind::CheckIdRequest, version)?
        .with_recipient(endpoint.clone())
        .with("openid.mode", mode)?
        .with("openid.identity", claimed_id)?;

    match version {
        ProtocolVersion::OpenId20 => {
            message.set("openid.claimed_id", claimed_id)?;
            message.set("openid.return_to", return_to.clone())?;
            if let Some(realm) = realm {
                message.set("openid.realm", realm.clone())?;
            }
        }
        ProtocolVersion::OpenId11 => {
            let return_to = extend_url(
                return_to,
                vec![(relying_party::RETURN_TO_ENDPOINT, endpoint.as_str())],
            );
            message.set("openid.return_to", return_to)?;
            if let Some(realm) = realm {
                message.set("openid.trust_root", realm.clone())?;
            }
        }
        other => return Err(Error::Configuration(format!("{:?} is not an OpenID version", other))),
    }

    Ok(message)
}
