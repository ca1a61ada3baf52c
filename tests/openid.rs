extern crate chrono;
extern crate oxide_messaging;
extern crate url;

use std::sync::Arc;

use chrono::Duration;
use oxide_messaging::channel::{Channel, HttpRequestInfo};
use oxide_messaging::messaging::{MessageKind, ProtocolVersion};
use oxide_messaging::openid::{provider, provider_channel, relying_party, relying_party_channel};
use oxide_messaging::stores::{AssociationStore, AssociationType, MemoryAssociationStore, MemoryNonceStore};
use oxide_messaging::{Deadline, Error, SecuritySettings};
use url::Url;

#[allow(dead_code)]
mod helpers;

use helpers::defaults::*;
use helpers::{follow, Router};

struct Provider {
    channel: Channel,
    associations: Arc<MemoryAssociationStore>,
}

impl Provider {
    fn serve(&self, request: &HttpRequestInfo) -> oxide_messaging::channel::DirectResponse {
        let fields = self.channel.incoming_fields(request).unwrap();
        let response = match fields.get("openid.mode").map(String::as_str) {
            Some("associate") => {
                let message = self.channel.read_incoming(request, &Deadline::none()).unwrap().unwrap();
                let answer = provider::associate_response(
                    self.associations.as_ref(),
                    &message,
                    self.channel.settings(),
                    &Deadline::none(),
                )
                .unwrap();
                self.channel.prepare_response(answer, &Deadline::none()).unwrap()
            }
            Some("check_authentication") => provider::answer_check_authentication(
                &self.channel,
                self.associations.as_ref(),
                request,
                &Deadline::none(),
            )
            .unwrap(),
            other => panic!("Unexpected direct request with mode {:?}", other),
        };
        response.into_direct_response()
    }
}

struct Setup {
    provider: Arc<Provider>,
    rp: Channel,
    rp_associations: Arc<MemoryAssociationStore>,
    endpoint: Url,
}

impl Setup {
    fn new() -> Setup {
        let settings = SecuritySettings::default();
        let associations = Arc::new(MemoryAssociationStore::new());
        let channel = provider_channel(
            associations.clone(),
            Arc::new(MemoryNonceStore::new(Duration::minutes(15))),
            settings.clone(),
        )
        .unwrap();
        let provider = Arc::new(Provider { channel, associations });

        let serving = provider.clone();
        let router = Router::new().route(OP_ENDPOINT, move |request: &HttpRequestInfo| serving.serve(request));

        let rp_associations = Arc::new(MemoryAssociationStore::new());
        let rp = relying_party_channel(
            rp_associations.clone(),
            Arc::new(MemoryNonceStore::new(Duration::minutes(15))),
            Some(Arc::new(router)),
            settings,
        )
        .unwrap();

        Setup {
            provider,
            rp,
            rp_associations,
            endpoint: OP_ENDPOINT.parse().unwrap(),
        }
    }

    fn associate(&self, version: ProtocolVersion) {
        let association = relying_party::associate(
            &self.rp,
            version,
            &self.endpoint,
            self.rp_associations.as_ref(),
            AssociationType::HmacSha256,
            &Deadline::none(),
        )
        .expect("Association should be established");
        let known = self
            .provider
            .associations
            .get("smart", association.handle(), &Deadline::none())
            .unwrap()
            .unwrap();
        assert_eq!(known.secret(), association.secret());
    }

    /// Runs the indirect part of a login, returns the request bringing the answer back.
    fn login(&self, version: ProtocolVersion, immediate: bool, approve: bool) -> HttpRequestInfo {
        let redirect = relying_party::check_id_redirect(
            &self.rp,
            self.rp_associations.as_ref(),
            version,
            &self.endpoint,
            CLAIMED_ID,
            &RETURN_TO.parse().unwrap(),
            None,
            immediate,
            &Deadline::none(),
        )
        .unwrap();

        let channel = &self.provider.channel;
        let request = channel.read_incoming(&follow(&redirect), &Deadline::none()).unwrap().unwrap();
        assert_eq!(request.kind(), MessageKind::CheckIdRequest);
        assert_eq!(request.version(), version);

        let assertion = if approve {
            provider::positive_assertion(&request, &self.endpoint).unwrap()
        } else {
            provider::negative_assertion(&request, None).unwrap()
        };
        follow(&channel.send(assertion, &Deadline::none()).unwrap())
    }
}

#[test]
fn shared_association_login() {
    let setup = Setup::new();
    setup.associate(ProtocolVersion::OpenId20);

    let back = setup.login(ProtocolVersion::OpenId20, false, true);
    let assertion = relying_party::read_assertion(&setup.rp, &back, &Deadline::none())
        .expect("Assertion should verify")
        .unwrap();
    assert_eq!(assertion.kind(), MessageKind::PositiveAssertion);
    assert_eq!(assertion.text("openid.claimed_id"), Some(CLAIMED_ID));
    assert!(assertion.text("openid.invalidate_handle").is_none());

    match relying_party::read_assertion(&setup.rp, &back, &Deadline::none()) {
        Err(Error::ReplayedMessage { kind }) => assert_eq!(kind, MessageKind::PositiveAssertion),
        other => panic!("Expected the second delivery to be a replay, got {:?}", other),
    }
}

#[test]
fn stateless_login_asks_provider() {
    let setup = Setup::new();
    let back = setup.login(ProtocolVersion::OpenId20, false, true);

    let assertion = relying_party::read_assertion(&setup.rp, &back, &Deadline::none())
        .expect("Provider should confirm the assertion")
        .unwrap();
    assert_eq!(assertion.text("openid.identity"), Some(CLAIMED_ID));

    // The provider remembers the nonce it confirmed.
    let mut fields = assertion.to_fields().unwrap();
    fields.insert("openid.mode".into(), "check_authentication".into());
    let body = oxide_messaging::messaging::encoding::to_query(
        fields.iter().map(|(key, value)| (key.as_str(), value.as_str())),
    );
    let again = setup
        .provider
        .serve(&HttpRequestInfo::post_form(setup.endpoint.clone(), body));
    assert!(again.body.contains("is_valid:false"));
}

#[test]
fn forged_assertion_refused_by_provider() {
    let setup = Setup::new();
    let back = setup.login(ProtocolVersion::OpenId20, false, true);

    let mut forged = back.clone();
    let query: Vec<(String, String)> = back
        .url
        .query_pairs()
        .map(|(key, value)| match &*key {
            "openid.identity" | "openid.claimed_id" => (key.into_owned(), "https://mallory.example/".to_string()),
            _ => (key.into_owned(), value.into_owned()),
        })
        .collect();
    forged.url.query_pairs_mut().clear().extend_pairs(query);

    match relying_party::read_assertion(&setup.rp, &forged, &Deadline::none()) {
        Err(Error::InvalidSignature { .. }) => (),
        other => panic!("Expected the provider to refuse the forgery, got {:?}", other),
    }
}

#[test]
fn legacy_login() {
    let setup = Setup::new();
    setup.associate(ProtocolVersion::OpenId11);

    let back = setup.login(ProtocolVersion::OpenId11, false, true);
    let assertion = relying_party::read_assertion(&setup.rp, &back, &Deadline::none())
        .expect("Assertion should verify")
        .unwrap();
    assert_eq!(assertion.version(), ProtocolVersion::OpenId11);
    assert_eq!(
        relying_party::provider_endpoint(&assertion),
        Some(setup.endpoint.clone())
    );
}

#[test]
fn legacy_assertion_accepted_once() {
    let setup = Setup::new();
    setup.associate(ProtocolVersion::OpenId11);

    let back = setup.login(ProtocolVersion::OpenId11, false, true);
    assert!(back.url.query_pairs().any(|(key, _)| key == relying_party::RETURN_TO_NONCE));
    relying_party::read_assertion(&setup.rp, &back, &Deadline::none())
        .expect("Assertion should verify")
        .unwrap();

    match relying_party::read_assertion(&setup.rp, &back, &Deadline::none()) {
        Err(Error::ReplayedMessage { kind }) => assert_eq!(kind, MessageKind::PositiveAssertion),
        other => panic!("Expected the second delivery to be a replay, got {:?}", other),
    }
}

#[test]
fn stateless_legacy_assertion_accepted_once() {
    let setup = Setup::new();
    let back = setup.login(ProtocolVersion::OpenId11, false, true);

    relying_party::read_assertion(&setup.rp, &back, &Deadline::none())
        .expect("Provider should confirm the assertion")
        .unwrap();
    assert!(matches!(
        relying_party::read_assertion(&setup.rp, &back, &Deadline::none()),
        Err(Error::ReplayedMessage { .. })
    ));
}

#[test]
fn legacy_assertion_with_forged_nonce() {
    let setup = Setup::new();
    setup.associate(ProtocolVersion::OpenId11);
    let back = setup.login(ProtocolVersion::OpenId11, false, true);

    // A fresh nonce breaks the signature over return_to.
    let mut forged = back.clone();
    let query: Vec<(String, String)> = back
        .url
        .query_pairs()
        .map(|(key, value)| {
            let value = value.replace("rp.nonce=", "rp.nonce=X");
            (key.into_owned(), value)
        })
        .collect();
    forged.url.query_pairs_mut().clear().extend_pairs(query);

    match relying_party::read_assertion(&setup.rp, &forged, &Deadline::none()) {
        Err(Error::InvalidSignature { .. }) => (),
        other => panic!("Expected a broken signature, got {:?}", other),
    }
}

#[test]
fn immediate_request_needs_setup() {
    let setup = Setup::new();
    let back = setup.login(ProtocolVersion::OpenId20, true, false);

    let answer = relying_party::read_assertion(&setup.rp, &back, &Deadline::none())
        .unwrap()
        .unwrap();
    assert_eq!(answer.kind(), MessageKind::NegativeAssertion);
    assert_eq!(answer.text("openid.mode"), Some("setup_needed"));
}

#[test]
fn unknown_association_without_handler() {
    let setup = Setup::new();
    let back = setup.login(ProtocolVersion::OpenId20, false, true);

    let offline = relying_party_channel(
        Arc::new(MemoryAssociationStore::new()),
        Arc::new(MemoryNonceStore::new(Duration::minutes(15))),
        None,
        SecuritySettings::default(),
    )
    .unwrap();
    match relying_party::read_assertion(&offline, &back, &Deadline::none()) {
        Err(Error::UnknownAssociation(_)) => (),
        other => panic!("Expected an unknown association, got {:?}", other),
    }
}
