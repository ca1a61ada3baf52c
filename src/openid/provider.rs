//! The provider side.
use chrono::{Duration, Utc};
use url::Url;

use crate::channel::{Channel, OutgoingWebResponse, WebRequest};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::messaging::{Message, MessageKind, ProtocolVersion};
use crate::settings::SecuritySettings;
use crate::stores::{Association, AssociationStore, AssociationType, AssociationUsage};

/// The only supported session type, the secret travels in the clear over TLS.
pub const NO_ENCRYPTION: &str = "no-encryption";

/// Generate an association and store it under the factor of its usage.
pub fn create_association(
    store: &dyn AssociationStore,
    kind: AssociationType,
    usage: AssociationUsage,
    lifetime: Duration,
    deadline: &Deadline,
) -> Result<Association> {
    deadline.check()?;
    let association = Association::generate(kind, usage, lifetime)?;
    store.store(usage.factor(), association.clone(), deadline)?;
    tracing::debug!(handle = association.handle(), ?usage, "created association");
    Ok(association)
}

/// The success response disclosing a shared association.
///
/// Private associations are never disclosed, asking for that is a configuration error.
pub fn associate_success_response(version: ProtocolVersion, association: &Association) -> Result<Message> {
    if association.usage() != AssociationUsage::Shared {
        return Err(Error::Configuration("private associations must not be disclosed".into()));
    }

    let mut response = Message::new(MessageKind::AssociateSuccessResponse, version)?
        .with("assoc_type", association.kind().as_str())?
        .with("assoc_handle", association.handle())?
        .with("expires_in", association.seconds_till_expiration(Utc::now()))?
        .with("mac_key", association.secret().to_vec())?;
    if version == ProtocolVersion::OpenId20 {
        response.set("session_type", NO_ENCRYPTION)?;
    }
    Ok(response)
}

fn unsupported(request: &Message, reason: &str) -> Result<Message> {
    let mut response = Message::new(MessageKind::DirectErrorResponse, request.version())?
        .with("error", reason)?
        .with("error_code", "unsupported-type")?
        .with("session_type", NO_ENCRYPTION)?;
    if request.version() == ProtocolVersion::OpenId20 {
        response.set("assoc_type", AssociationType::HmacSha256.as_str())?;
    }
    Ok(response)
}

/// Answer an associate request.
///
/// Diffie-Hellman sessions are refused with an error response suggesting `no-encryption`.
pub fn associate_response(
    store: &dyn AssociationStore,
    request: &Message,
    settings: &SecuritySettings,
    deadline: &Deadline,
) -> Result<Message> {
    if request.kind() != MessageKind::AssociateRequest {
        return Err(Error::violation("not an associate request"));
    }

    match request.text("openid.session_type") {
        None | Some("") | Some(NO_ENCRYPTION) => (),
        Some(other) => {
            tracing::debug!(session_type = other, "refusing association session type");
            return unsupported(request, "only no-encryption sessions are supported");
        }
    }

    let kind = match request.text("openid.assoc_type").and_then(AssociationType::from_wire) {
        Some(kind) => kind,
        None => return unsupported(request, "unsupported association type"),
    };

    let association = create_association(
        store,
        kind,
        AssociationUsage::Shared,
        settings.shared_association_lifetime,
        deadline,
    )?;
    associate_success_response(request.version(), &association)
}

/// Assert the identity requested in a checkid request.
///
/// The assertion names the association the relying party asked for, the signing element falls
/// back to a private one if the provider does not know it.
pub fn positive_assertion(request: &Message, op_endpoint: &Url) -> Result<Message> {
    if request.kind() != MessageKind::CheckIdRequest {
        return Err(Error::violation("not a checkid request"));
    }

    let return_to = request
        .url("openid.return_to")
        .cloned()
        .ok_or_else(|| Error::violation("the request has no return_to to answer to"))?;

    let version = request.version();
    let mut assertion = Message::new(MessageKind::PositiveAssertion, version)?
        .with_recipient(return_to.clone())
        .with("openid.return_to", return_to)?;

    if let Some(identity) = request.text("openid.identity") {
        assertion.set("openid.identity", identity)?;
    }
    if let Some(handle) = request.text("openid.assoc_handle") {
        assertion.set("openid.assoc_handle", handle)?;
    }
    if version == ProtocolVersion::OpenId20 {
        assertion.set("openid.op_endpoint", op_endpoint.clone())?;
        if let Some(claimed_id) = request.text("openid.claimed_id") {
            assertion.set("openid.claimed_id", claimed_id)?;
        }
    }

    Ok(assertion)
}

/// Refuse a checkid request.
///
/// Immediate requests are told that setup is needed, others that the user cancelled.
pub fn negative_assertion(request: &Message, user_setup_url: Option<&Url>) -> Result<Message> {
    let return_to = request
        .url("openid.return_to")
        .cloned()
        .ok_or_else(|| Error::violation("the request has no return_to to answer to"))?;
    let immediate = request.text("openid.mode") == Some("checkid_immediate");

    let mut assertion = Message::new(MessageKind::NegativeAssertion, request.version())?.with_recipient(return_to);
    match (request.version(), immediate) {
        (ProtocolVersion::OpenId20, true) => assertion.set("openid.mode", "setup_needed")?,
        (ProtocolVersion::OpenId11, true) => {
            assertion.set("openid.mode", "id_res")?;
            if let Some(url) = user_setup_url {
                assertion.set("openid.user_setup_url", url.clone())?;
            }
        }
        _ => assertion.set("openid.mode", "cancel")?,
    }
    Ok(assertion)
}

/// The verdict on a check_authentication request.
pub fn check_authentication_response(
    version: ProtocolVersion,
    is_valid: bool,
    invalidate_handle: Option<&str>,
) -> Result<Message> {
    let mut response = Message::new(MessageKind::CheckAuthenticationResponse, version)?.with("is_valid", is_valid)?;
    if let Some(handle) = invalidate_handle {
        response.set("invalidate_handle", handle)?;
    }
    Ok(response)
}

/// Read a check_authentication request and answer it.
///
/// Signatures that do not verify, and assertions that were checked before, are answered with
/// `is_valid:false`. A handle the relying party wanted to use that the provider does not know
/// any more is reported for invalidation.
pub fn answer_check_authentication<R: WebRequest + ?Sized>(
    channel: &Channel,
    store: &dyn AssociationStore,
    request: &R,
    deadline: &Deadline,
) -> Result<OutgoingWebResponse> {
    let (version, is_valid, stale) = match channel.read_incoming(request, deadline) {
        Ok(Some(message)) if message.kind() == MessageKind::CheckAuthenticationRequest => {
            let stale = match message.text("openid.invalidate_handle") {
                Some(handle) if store.get(AssociationUsage::Shared.factor(), handle, deadline)?.is_none() => {
                    Some(handle.to_string())
                }
                _ => None,
            };
            (message.version(), true, stale)
        }
        Ok(Some(message)) => {
            return Err(Error::violation(format!(
                "expected check_authentication, got {:?}",
                message.kind()
            )))
        }
        Ok(None) => return Err(Error::UnrecognizedMessage),
        Err(err) if err.is_security_failure() => {
            tracing::warn!(%err, "check_authentication refused");
            let fields = channel.incoming_fields(request)?;
            let version = channel
                .factory()
                .request_kind(&fields, request.url())
                .map_or(ProtocolVersion::OpenId20, |(_, version)| version);
            (version, false, None)
        }
        Err(err) => return Err(err),
    };

    let response = check_authentication_response(version, is_valid, stale.as_deref())?;
    channel.prepare_response(response, deadline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryAssociationStore;

    #[test]
    fn associate_no_encryption() {
        let store = MemoryAssociationStore::new();
        let request = Message::new(MessageKind::AssociateRequest, ProtocolVersion::OpenId20)
            .unwrap()
            .with("openid.assoc_type", "HMAC-SHA256")
            .unwrap()
            .with("openid.session_type", NO_ENCRYPTION)
            .unwrap();

        let response = associate_response(&store, &request, &SecuritySettings::default(), &Deadline::none()).unwrap();
        assert_eq!(response.kind(), MessageKind::AssociateSuccessResponse);
        let handle = response.text("assoc_handle").unwrap();
        let stored = store.get("smart", handle, &Deadline::none()).unwrap().unwrap();
        assert_eq!(response.get("mac_key"), Some(&crate::messaging::Value::Bytes(stored.secret().to_vec())));
        assert!(response.validate().is_ok());
    }

    #[test]
    fn diffie_hellman_refused() {
        let store = MemoryAssociationStore::new();
        let request = Message::new(MessageKind::AssociateRequest, ProtocolVersion::OpenId20)
            .unwrap()
            .with("openid.assoc_type", "HMAC-SHA1")
            .unwrap()
            .with("openid.session_type", "DH-SHA1")
            .unwrap();

        let response = associate_response(&store, &request, &SecuritySettings::default(), &Deadline::none()).unwrap();
        assert_eq!(response.kind(), MessageKind::DirectErrorResponse);
        assert_eq!(response.text("error_code"), Some("unsupported-type"));
        assert_eq!(store.best("smart", &Deadline::none()).unwrap(), None);
    }

    #[test]
    fn private_associations_stay_private() {
        let association =
            Association::generate(AssociationType::HmacSha1, AssociationUsage::Private, Duration::days(1)).unwrap();
        assert!(matches!(
            associate_success_response(ProtocolVersion::OpenId20, &association),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn negative_modes() {
        let request = Message::new(MessageKind::CheckIdRequest, ProtocolVersion::OpenId20)
            .unwrap()
            .with("openid.mode", "checkid_immediate")
            .unwrap()
            .with("openid.return_to", "https://rp.example/return".parse::<Url>().unwrap())
            .unwrap();
        let negative = negative_assertion(&request, None).unwrap();
        assert_eq!(negative.text("openid.mode"), Some("setup_needed"));
        assert!(negative.validate().is_ok());
    }
}
