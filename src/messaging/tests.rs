use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use super::*;

fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[test]
fn every_kind_has_descriptions() {
    for &kind in MessageKind::ALL.iter() {
        let versions: Vec<_> = ProtocolVersion::ALL
            .iter()
            .filter(|version| MessageDescription::lookup(kind, **version).is_some())
            .collect();
        assert!(!versions.is_empty(), "{:?} has no description", kind);
        assert!(versions.iter().all(|version| version.protocol() == kind.protocol()));
    }
}

#[test]
fn required_protection_from_schema() {
    let signed = MessageDescription::lookup(MessageKind::AccessProtectedResourceRequest, ProtocolVersion::OAuth10a)
        .unwrap();
    assert_eq!(signed.required_protection(), Protections::ALL);

    let old = MessageDescription::lookup(MessageKind::PositiveAssertion, ProtocolVersion::OpenId11).unwrap();
    assert_eq!(old.required_protection(), Protections::TAMPER);

    let plain = MessageDescription::lookup(MessageKind::CheckIdRequest, ProtocolVersion::OpenId20).unwrap();
    assert!(plain.required_protection().is_empty());
}

#[test]
fn constants_are_prefilled() {
    let message = Message::new(MessageKind::AssociateRequest, ProtocolVersion::OpenId20).unwrap();
    assert_eq!(message.text("openid.mode"), Some("associate"));
    assert_eq!(message.text("openid.ns"), Some(OPENID2_NAMESPACE));

    assert!(Message::new(MessageKind::AssociateRequest, ProtocolVersion::OAuth10).is_err());
}

#[test]
fn format_error_names_part() {
    let raw = fields(&[
        ("oauth_consumer_key", "ck"),
        ("oauth_nonce", "n"),
        ("oauth_timestamp", "yesterday"),
        ("oauth_signature_method", "HMAC-SHA1"),
        ("oauth_signature", "s"),
        ("oauth_token", "t"),
    ]);

    match Message::from_fields(MessageKind::AccessProtectedResourceRequest, ProtocolVersion::OAuth10a, raw) {
        Err(Error::Format { part, .. }) => assert_eq!(part, "oauth_timestamp"),
        other => panic!("Expected a format error, got {:?}", other),
    }

    let bad_enum = fields(&[("assoc_type", "HMAC-MD5")]);
    match Message::from_fields(MessageKind::AssociateSuccessResponse, ProtocolVersion::OpenId11, bad_enum) {
        Err(Error::Format { part, .. }) => assert_eq!(part, "assoc_type"),
        other => panic!("Expected a format error, got {:?}", other),
    }
}

#[test]
fn missing_required_part() {
    let raw = fields(&[("openid.mode", "check_authentication")]);
    let message = Message::from_fields(MessageKind::CheckAuthenticationRequest, ProtocolVersion::OpenId11, raw)
        .unwrap();
    match message.validate() {
        Err(Error::ProtocolViolation(msg)) => assert!(msg.contains("openid.")),
        other => panic!("Expected a protocol violation, got {:?}", other),
    }
}

#[test]
fn empty_value_rejected_unless_allowed() {
    let raw = fields(&[("code", ""), ("state", "s")]);
    assert!(matches!(
        Message::from_fields(MessageKind::EndUserAuthorizationSuccessResponse, ProtocolVersion::OAuth20, raw),
        Err(Error::ProtocolViolation(_))
    ));

    let raw = fields(&[("oauth_token", "t"), ("oauth_token_secret", "")]);
    let message = Message::from_fields(MessageKind::AuthorizedTokenResponse, ProtocolVersion::OAuth10a, raw)
        .unwrap();
    assert!(message.validate().is_ok());
    assert_eq!(message.text("oauth_token_secret"), Some(""));
}

#[test]
fn extra_data_is_kept() {
    let raw = fields(&[("code", "c"), ("tracking", "42")]);
    let message = Message::from_fields(MessageKind::EndUserAuthorizationSuccessResponse, ProtocolVersion::OAuth20, raw.clone())
        .unwrap();
    assert_eq!(message.extra().get("tracking").map(String::as_str), Some("42"));
    assert_eq!(message.to_fields().unwrap(), raw);
}

#[test]
fn received_form_is_reproduced() {
    let raw = fields(&[
        ("openid.op_endpoint", "https://op.example"),
        ("openid.return_to", "HTTPS://rp.example/return"),
        ("openid.mode", "id_res"),
    ]);
    let mut message = Message::from_fields(MessageKind::PositiveAssertion, ProtocolVersion::OpenId20, raw.clone())
        .unwrap();
    assert_eq!(message.url("openid.op_endpoint").unwrap().as_str(), "https://op.example/");
    assert_eq!(message.to_fields().unwrap(), raw);

    // Changed parts are encoded anew.
    message
        .set("openid.op_endpoint", "https://op.example".parse::<Url>().unwrap())
        .unwrap();
    assert_eq!(message.to_fields().unwrap()["openid.op_endpoint"], "https://op.example/");
    assert_eq!(message.to_fields().unwrap()["openid.return_to"], "HTTPS://rp.example/return");

    let raw = fields(&[("access_token", "a"), ("token_type", "bearer"), ("expires_in", "0123")]);
    let message = Message::from_fields(MessageKind::AccessTokenSuccessResponse, ProtocolVersion::OAuth20, raw.clone())
        .unwrap();
    assert_eq!(message.get("expires_in"), Some(&Value::Integer(123)));
    assert_eq!(message.to_fields().unwrap(), raw);
}

#[test]
fn timestamps_out_of_range() {
    for stamp in &["8210266876799", "-1", "9223372036854775807"] {
        let raw = fields(&[("oauth_timestamp", stamp)]);
        match Message::from_fields(MessageKind::AccessProtectedResourceRequest, ProtocolVersion::OAuth10a, raw) {
            Err(Error::Format { part, .. }) => assert_eq!(part, "oauth_timestamp"),
            other => panic!("Expected {} to be refused, got {:?}", stamp, other),
        }
    }
}

#[test]
fn set_checks_the_encoding() {
    let mut message = Message::new(MessageKind::AccessTokenSuccessResponse, ProtocolVersion::OAuth20).unwrap();
    assert!(message.set("expires_in", Value::Integer(3600)).is_ok());
    assert!(message.set("expires_in", "soon").is_err());
    assert!(message.set("no_such_part", "x").is_err());
}

#[test]
fn dated_nonce_accessors() {
    let mut message = Message::new(MessageKind::PositiveAssertion, ProtocolVersion::OpenId20).unwrap();
    let time = Utc.with_ymd_and_hms(2005, 5, 15, 17, 11, 51).unwrap();
    message.set_nonce("UNIQUE".to_string()).unwrap();
    message.set_creation_date(time).unwrap();

    assert_eq!(message.nonce(), Some("UNIQUE"));
    assert_eq!(message.creation_date(), Some(time));

    let fields = message.to_fields().unwrap();
    assert_eq!(fields["openid.response_nonce"], "2005-05-15T17:11:51ZUNIQUE");
}

#[test]
fn claimed_id_needs_identity() {
    let mut message = Message::new(MessageKind::PositiveAssertion, ProtocolVersion::OpenId20).unwrap();
    message.set("openid.claimed_id", "http://user.example/").unwrap();
    assert!(message.check_consistency().is_err());
    message.set("openid.identity", "http://user.example/").unwrap();
    assert!(message.check_consistency().is_ok());
}

fn arb_token() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 %&=+/._~-]{1,24}"
}

fn arb_time() -> impl Strategy<Value = chrono::DateTime<Utc>> {
    (0i64..4_000_000_000).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
}

proptest! {
    #[test]
    fn oauth1_request_roundtrip(key in arb_token(), token in arb_token(), nonce in arb_token(), time in arb_time()) {
        let mut message = Message::new(MessageKind::AccessProtectedResourceRequest, ProtocolVersion::OAuth10a).unwrap();
        message.set("oauth_consumer_key", key).unwrap();
        message.set("oauth_token", token).unwrap();
        message.set("oauth_signature_method", "HMAC-SHA256").unwrap();
        message.set("oauth_signature", "c2ln").unwrap();
        message.set_nonce(nonce).unwrap();
        message.set_creation_date(time).unwrap();
        message.extra_mut().insert("page".into(), "2".into());

        let fields = message.to_fields().unwrap();
        let decoded = Message::from_fields(message.kind(), message.version(), fields).unwrap();
        prop_assert_eq!(decoded, message);
    }

    #[test]
    fn openid_assertion_roundtrip(identity in arb_token(), handle in arb_token(), nonce in arb_token(), time in arb_time()) {
        let mut message = Message::new(MessageKind::PositiveAssertion, ProtocolVersion::OpenId20).unwrap();
        message.set("openid.op_endpoint", Value::Url("https://op.example/server".parse().unwrap())).unwrap();
        message.set("openid.return_to", Value::Url("https://rp.example/return?x=1".parse().unwrap())).unwrap();
        message.set("openid.identity", identity.clone()).unwrap();
        message.set("openid.claimed_id", identity).unwrap();
        message.set("openid.assoc_handle", handle).unwrap();
        message.set("openid.signed", "op_endpoint,return_to").unwrap();
        message.set("openid.sig", "c2ln").unwrap();
        message.set_nonce(nonce).unwrap();
        message.set_creation_date(time).unwrap();

        let fields = message.to_fields().unwrap();
        let decoded = Message::from_fields(message.kind(), message.version(), fields).unwrap();
        prop_assert_eq!(&decoded, &message);
        prop_assert!(decoded.validate().is_ok());
    }

    #[test]
    fn association_response_roundtrip(secret in proptest::collection::vec(any::<u8>(), 20), expires in 0i64..2_000_000) {
        let mut message = Message::new(MessageKind::AssociateSuccessResponse, ProtocolVersion::OpenId20).unwrap();
        message.set("assoc_type", "HMAC-SHA1").unwrap();
        message.set("session_type", "no-encryption").unwrap();
        message.set("assoc_handle", "{HMAC-SHA1}{1}{abc}").unwrap();
        message.set("expires_in", Value::Integer(expires)).unwrap();
        message.set("mac_key", Value::Bytes(secret)).unwrap();

        let fields = message.to_fields().unwrap();
        let decoded = Message::from_fields(message.kind(), message.version(), fields).unwrap();
        prop_assert_eq!(decoded, message);
    }

    #[test]
    fn token_response_roundtrip(access in arb_token(), expires in 1i64..100_000, flag in any::<bool>()) {
        let mut message = Message::new(MessageKind::CheckAuthenticationResponse, ProtocolVersion::OpenId20).unwrap();
        message.set("is_valid", Value::Flag(flag)).unwrap();
        let decoded = Message::from_fields(message.kind(), message.version(), message.to_fields().unwrap()).unwrap();
        prop_assert_eq!(decoded, message);

        let mut message = Message::new(MessageKind::AccessTokenSuccessResponse, ProtocolVersion::OAuth20).unwrap();
        message.set("access_token", access).unwrap();
        message.set("token_type", "bearer").unwrap();
        message.set("expires_in", Value::Integer(expires)).unwrap();
        let decoded = Message::from_fields(message.kind(), message.version(), message.to_fields().unwrap()).unwrap();
        prop_assert_eq!(decoded, message);
    }
}
