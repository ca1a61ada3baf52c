extern crate chrono;
extern crate oxide_messaging;
extern crate url;

use std::sync::Arc;

use chrono::Duration;
use oxide_messaging::channel::{Body, HttpRequestInfo, Status};
use oxide_messaging::messaging::factory::ServiceProviderEndpoints;
use oxide_messaging::messaging::{HttpMethod, MessageKind, ProtocolVersion};
use oxide_messaging::oauth1::{problem_response, Consumer, ConsumerMap, ServiceProvider};
use oxide_messaging::stores::MemoryNonceStore;
use oxide_messaging::{Deadline, Error, SecuritySettings};

#[allow(dead_code)]
mod helpers;

use helpers::defaults::*;
use helpers::{follow, Router};

fn endpoints() -> ServiceProviderEndpoints {
    ServiceProviderEndpoints {
        request_token: REQUEST_TOKEN_ENDPOINT.parse().unwrap(),
        user_authorization: AUTHORIZATION_ENDPOINT.parse().unwrap(),
        access_token: ACCESS_TOKEN_ENDPOINT.parse().unwrap(),
    }
}

fn nonces() -> Arc<MemoryNonceStore> {
    Arc::new(MemoryNonceStore::new(Duration::minutes(15)))
}

struct Setup {
    provider: Arc<ServiceProvider>,
    consumer: Consumer,
}

impl Setup {
    fn new(version: ProtocolVersion) -> Setup {
        let tokens = Arc::new(ConsumerMap::new());
        tokens.register_consumer(CONSUMER_KEY, CONSUMER_SECRET);
        let provider =
            Arc::new(ServiceProvider::new(endpoints(), tokens, nonces(), SecuritySettings::default()).unwrap());

        let serve = |provider: Arc<ServiceProvider>, kind: MessageKind| {
            move |request: &HttpRequestInfo| {
                let response = provider
                    .read_request(request, &Deadline::none())
                    .and_then(|message| {
                        let message = message.ok_or(Error::UnrecognizedMessage)?;
                        match kind {
                            MessageKind::UnauthorizedTokenRequest => {
                                provider.request_token_response(&message, &Deadline::none())
                            }
                            _ => provider.access_token_response(&message, &Deadline::none()),
                        }
                    })
                    .unwrap_or_else(|err| problem_response(&err));
                response.into_direct_response()
            }
        };

        let router = Router::new()
            .route(
                REQUEST_TOKEN_ENDPOINT,
                serve(provider.clone(), MessageKind::UnauthorizedTokenRequest),
            )
            .route(
                ACCESS_TOKEN_ENDPOINT,
                serve(provider.clone(), MessageKind::AuthorizedTokenRequest),
            );

        let consumer = Consumer::new(
            endpoints(),
            CONSUMER_KEY,
            CONSUMER_SECRET,
            nonces(),
            SecuritySettings::default(),
        )
        .unwrap()
        .with_version(version)
        .unwrap()
        .with_handler(Arc::new(router));

        Setup { provider, consumer }
    }
}

#[test]
fn three_legged_revision_a() {
    let setup = Setup::new(ProtocolVersion::OAuth10a);
    let callback = CONSUMER_CALLBACK.parse().unwrap();
    let request_token = setup
        .consumer
        .request_token(Some(&callback), &Deadline::none())
        .expect("Request token should be issued");

    let redirect = setup
        .consumer
        .authorization_redirect(&request_token, None, &Deadline::none())
        .unwrap();
    assert_eq!(redirect.status, Status::Redirect);

    let authorization = setup
        .provider
        .read_request(&follow(&redirect), &Deadline::none())
        .unwrap()
        .unwrap();
    assert_eq!(authorization.kind(), MessageKind::UserAuthorizationRequest);
    assert_eq!(authorization.version(), ProtocolVersion::OAuth10a);

    let back = setup.provider.authorize(&authorization, &Deadline::none()).unwrap();
    assert!(back.location.as_ref().unwrap().as_str().starts_with(CONSUMER_CALLBACK));

    let returned = setup
        .consumer
        .read_authorization(&follow(&back), &Deadline::none())
        .unwrap()
        .unwrap();
    let verifier = returned.text("oauth_verifier").unwrap().to_string();

    let access = setup
        .consumer
        .access_token(&request_token, Some(&verifier), &Deadline::none())
        .expect("Access token should be issued");
    assert_ne!(access.token, request_token.token);

    let resource = setup
        .consumer
        .authorize_request(&access, HttpMethod::Get, PROTECTED_RESOURCE.parse().unwrap(), &Deadline::none())
        .unwrap();
    assert!(resource.authorization.as_ref().unwrap().starts_with("OAuth "));

    let accessed = setup
        .provider
        .read_request(&resource, &Deadline::none())
        .unwrap()
        .unwrap();
    assert_eq!(accessed.kind(), MessageKind::AccessProtectedResourceRequest);
    assert_eq!(accessed.text("oauth_token"), Some(access.token.as_str()));
    assert_eq!(accessed.extra().get("size").map(String::as_str), Some("original"));

    match setup.provider.read_request(&resource, &Deadline::none()) {
        Err(Error::ReplayedMessage { kind }) => assert_eq!(kind, MessageKind::AccessProtectedResourceRequest),
        other => panic!("Expected the second delivery to be a replay, got {:?}", other),
    }
}

#[test]
fn out_of_band_verifier() {
    let setup = Setup::new(ProtocolVersion::OAuth10a);
    let request_token = setup.consumer.request_token(None, &Deadline::none()).unwrap();
    let redirect = setup
        .consumer
        .authorization_redirect(&request_token, None, &Deadline::none())
        .unwrap();
    let authorization = setup
        .provider
        .read_request(&follow(&redirect), &Deadline::none())
        .unwrap()
        .unwrap();

    let shown = setup.provider.authorize(&authorization, &Deadline::none()).unwrap();
    assert!(shown.location.is_none());
    let verifier = match shown.body {
        Some(Body::Form(ref form)) => url::form_urlencoded::parse(form.as_bytes())
            .find(|(key, _)| key == "oauth_verifier")
            .map(|(_, value)| value.into_owned())
            .unwrap(),
        ref other => panic!("Expected the verifier to be shown, got {:?}", other),
    };

    setup
        .consumer
        .access_token(&request_token, Some(&verifier), &Deadline::none())
        .expect("Access token should be issued");
}

#[test]
fn wrong_verifier_refused() {
    let setup = Setup::new(ProtocolVersion::OAuth10a);
    let request_token = setup.consumer.request_token(None, &Deadline::none()).unwrap();
    let redirect = setup
        .consumer
        .authorization_redirect(&request_token, None, &Deadline::none())
        .unwrap();
    let authorization = setup
        .provider
        .read_request(&follow(&redirect), &Deadline::none())
        .unwrap()
        .unwrap();
    setup.provider.authorize(&authorization, &Deadline::none()).unwrap();

    match setup.consumer.access_token(&request_token, Some("guessed"), &Deadline::none()) {
        Err(Error::ProtocolViolation(_)) => (),
        other => panic!("Expected the service provider to refuse, got {:?}", other),
    }
}

#[test]
fn three_legged_original_revision() {
    let setup = Setup::new(ProtocolVersion::OAuth10);
    let request_token = setup.consumer.request_token(None, &Deadline::none()).unwrap();

    let redirect = setup
        .consumer
        .authorization_redirect(&request_token, Some(CONSUMER_CALLBACK.parse().unwrap()), &Deadline::none())
        .unwrap();
    let authorization = setup
        .provider
        .read_request(&follow(&redirect), &Deadline::none())
        .unwrap()
        .unwrap();
    assert_eq!(authorization.version(), ProtocolVersion::OAuth10);

    let back = setup.provider.authorize(&authorization, &Deadline::none()).unwrap();
    let returned = setup
        .consumer
        .read_authorization(&follow(&back), &Deadline::none())
        .unwrap()
        .unwrap();
    assert!(returned.text("oauth_verifier").is_none());

    setup
        .consumer
        .access_token(&request_token, None, &Deadline::none())
        .expect("Access token should be issued without a verifier");
}

#[test]
fn tampered_resource_request() {
    let setup = Setup::new(ProtocolVersion::OAuth10a);
    let request_token = setup.consumer.request_token(None, &Deadline::none()).unwrap();
    let redirect = setup
        .consumer
        .authorization_redirect(&request_token, None, &Deadline::none())
        .unwrap();
    let authorization = setup
        .provider
        .read_request(&follow(&redirect), &Deadline::none())
        .unwrap()
        .unwrap();
    let shown = setup.provider.authorize(&authorization, &Deadline::none()).unwrap();
    let verifier = match shown.body {
        Some(Body::Form(ref form)) => url::form_urlencoded::parse(form.as_bytes())
            .find(|(key, _)| key == "oauth_verifier")
            .map(|(_, value)| value.into_owned())
            .unwrap(),
        _ => unreachable!(),
    };
    let access = setup
        .consumer
        .access_token(&request_token, Some(&verifier), &Deadline::none())
        .unwrap();

    let mut resource = setup
        .consumer
        .authorize_request(&access, HttpMethod::Get, PROTECTED_RESOURCE.parse().unwrap(), &Deadline::none())
        .unwrap();
    resource.url.set_query(Some("size=thumbnail"));

    let refused = setup.provider.read_request(&resource, &Deadline::none()).unwrap_err();
    assert!(matches!(refused, Error::InvalidSignature { .. }));
    assert_eq!(problem_response(&refused).status, Status::Unauthorized);
}
