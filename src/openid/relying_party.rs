//! The relying party side.
use chrono::Utc;
use url::Url;

use crate::channel::{Channel, DirectWebRequestHandler, HttpRequestInfo, OutgoingWebResponse, WebRequest};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::messaging::encoding::{from_key_value_form, to_query};
use crate::messaging::factory::same_endpoint;
use crate::messaging::{HttpMethod, Message, MessageKind, ProtocolVersion, Value};
use crate::stores::association::lifetime_from_seconds;
use crate::stores::{Association, AssociationStore, AssociationType, AssociationUsage};
use super::check_id_request;
use super::provider::NO_ENCRYPTION;

/// Query parameter of `return_to` naming the provider endpoint of an OpenID 1.1 request.
pub const RETURN_TO_ENDPOINT: &str = "rp.op_endpoint";

/// Query parameter of `return_to` carrying the replay nonce of an OpenID 1.1 request.
pub const RETURN_TO_NONCE: &str = "rp.nonce";

/// The provider's answer to a check_authentication request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckAuthenticationOutcome {
    /// Whether the provider confirmed the signature.
    pub is_valid: bool,
    /// A handle the relying party should forget.
    pub invalidate_handle: Option<String>,
}

/// The endpoint of the provider that issued an assertion.
///
/// OpenID 2.0 assertions name it, for 1.1 it is recovered from the signed `return_to`.
pub fn provider_endpoint(message: &Message) -> Option<Url> {
    if let Some(endpoint) = message.url("openid.op_endpoint") {
        return Some(endpoint.clone());
    }

    let return_to = message.url("openid.return_to")?;
    return_to
        .query_pairs()
        .find(|(key, _)| key == RETURN_TO_ENDPOINT)
        .and_then(|(_, value)| value.parse().ok())
}

/// Ask the provider whether it issued `assertion`.
///
/// The assertion is copied verbatim, signature included, with the mode changed to
/// `check_authentication`. This does not pass through a channel since the nonce of the copied
/// assertion must stay untouched.
pub(crate) fn verify_with_provider(
    handler: &dyn DirectWebRequestHandler,
    endpoint: &Url,
    assertion: &Message,
    deadline: &Deadline,
) -> Result<CheckAuthenticationOutcome> {
    deadline.check()?;
    let mut fields = assertion.to_fields()?;
    fields.insert("openid.mode".to_string(), "check_authentication".to_string());
    let body = to_query(fields.iter().map(|(key, value)| (key.as_str(), value.as_str())));

    tracing::debug!(%endpoint, "verifying assertion with the provider");
    let response = handler.send(&HttpRequestInfo::post_form(endpoint.clone(), body), deadline)?;
    if response.status >= 500 {
        return Err(Error::Transport(format!("provider failed with status {}", response.status)));
    }

    let fields = from_key_value_form(&response.body)?;
    if let Some(error) = fields.get("error") {
        return Err(Error::violation(format!("provider refused check_authentication: {}", error)));
    }

    let verdict = Message::from_fields(MessageKind::CheckAuthenticationResponse, assertion.version(), fields)?;
    verdict.validate()?;
    Ok(CheckAuthenticationOutcome {
        is_valid: verdict.get("is_valid") == Some(&Value::Flag(true)),
        invalidate_handle: verdict.text("invalidate_handle").map(str::to_string),
    })
}

/// Establish a shared association with the provider at `endpoint`.
///
/// The association is stored under the endpoint. Association data the provider sent that does
/// not make a usable association is a protocol violation, an error response as well.
pub fn associate(
    channel: &Channel,
    version: ProtocolVersion,
    endpoint: &Url,
    store: &dyn AssociationStore,
    kind: AssociationType,
    deadline: &Deadline,
) -> Result<Association> {
    let mut request = Message::new(MessageKind::AssociateRequest, version)?
        .with_recipient(endpoint.clone())
        .with("openid.assoc_type", kind.as_str())?;
    if version == ProtocolVersion::OpenId20 {
        request.set("openid.session_type", NO_ENCRYPTION)?;
    }
    request.set_http_method(HttpMethod::Post);

    let response = channel.request(request, deadline)?;
    if response.kind() == MessageKind::DirectErrorResponse {
        return Err(Error::violation(format!(
            "provider refused to associate: {}",
            response.text("error").unwrap_or_default()
        )));
    }

    let handle = response.text("assoc_handle").unwrap_or_default().to_string();
    let kind = response
        .text("assoc_type")
        .and_then(AssociationType::from_wire)
        .ok_or_else(|| Error::violation("unknown association type"))?;
    let secret = match response.get("mac_key") {
        Some(Value::Bytes(secret)) => secret.clone(),
        _ => return Err(Error::violation("the provider sent no mac_key")),
    };
    let lifetime = match response.get("expires_in") {
        Some(Value::Integer(seconds)) => {
            lifetime_from_seconds(*seconds).ok_or_else(|| Error::violation("expires_in out of range"))?
        }
        _ => return Err(Error::violation("the provider sent no expires_in")),
    };

    let association = Association::new(handle, kind, secret, Utc::now(), lifetime, AssociationUsage::Shared)
        .map_err(|err| match err {
            Error::Configuration(reason) => Error::violation(reason),
            other => other,
        })?;
    store.store(endpoint.as_str(), association.clone(), deadline)?;
    tracing::debug!(%endpoint, handle = association.handle(), "associated with provider");
    Ok(association)
}

/// Send the user to the provider, naming the best association known for it.
#[allow(clippy::too_many_arguments)]
pub fn check_id_redirect(
    channel: &Channel,
    store: &dyn AssociationStore,
    version: ProtocolVersion,
    endpoint: &Url,
    claimed_id: &str,
    return_to: &Url,
    realm: Option<&Url>,
    immediate: bool,
    deadline: &Deadline,
) -> Result<OutgoingWebResponse> {
    let mut request = check_id_request(version, endpoint, claimed_id, return_to, realm, immediate)?;
    if let Some(association) = store.best(endpoint.as_str(), deadline)? {
        request.set("openid.assoc_handle", association.handle())?;
    }
    channel.send(request, deadline)
}

/// Whether the request arrived at the `return_to` url of the assertion.
///
/// Every query parameter of `return_to` must be present in the request, with the same value.
fn arrived_at_return_to(return_to: &Url, arrived: &Url) -> bool {
    if !same_endpoint(return_to, arrived) {
        return false;
    }

    let received: Vec<_> = arrived.query_pairs().collect();
    return_to
        .query_pairs()
        .all(|expected| received.iter().any(|pair| pair == &expected))
}

/// Read the provider's answer returned through the user agent.
///
/// Positive assertions come back verified. Negative assertions are returned as well, their kind
/// tells them apart.
pub fn read_assertion<R: WebRequest + ?Sized>(
    channel: &Channel,
    request: &R,
    deadline: &Deadline,
) -> Result<Option<Message>> {
    let message = match channel.read_incoming(request, deadline)? {
        Some(message) => message,
        None => return Ok(None),
    };

    match message.kind() {
        MessageKind::PositiveAssertion => {
            let return_to = message
                .url("openid.return_to")
                .ok_or_else(|| Error::violation("missing openid.return_to"))?;
            if !arrived_at_return_to(return_to, request.url()) {
                return Err(Error::violation("the assertion arrived outside of its return_to url"));
            }
            Ok(Some(message))
        }
        MessageKind::NegativeAssertion => Ok(Some(message)),
        other => Err(Error::violation(format!("expected an assertion, got {:?}", other))),
    }
}
