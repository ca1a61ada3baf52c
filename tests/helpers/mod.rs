//! Shared setup for the flow tests: peers talking to each other within one process.
use oxide_messaging::channel::{Body, DirectResponse, DirectWebRequestHandler, HttpRequestInfo, OutgoingWebResponse};
use oxide_messaging::messaging::encoding::to_query;
use oxide_messaging::messaging::factory::same_endpoint;
use oxide_messaging::{Deadline, Error, Result};
use url::Url;

type Route = Box<dyn Fn(&HttpRequestInfo) -> DirectResponse + Send + Sync>;

/// Delivers direct requests to the peer serving the endpoint.
#[derive(Default)]
pub struct Router {
    routes: Vec<(Url, Route)>,
}

impl Router {
    pub fn new() -> Self {
        Router::default()
    }

    pub fn route<F>(mut self, endpoint: &str, serve: F) -> Self
    where
        F: Fn(&HttpRequestInfo) -> DirectResponse + Send + Sync + 'static,
    {
        self.routes.push((endpoint.parse().unwrap(), Box::new(serve)));
        self
    }
}

impl DirectWebRequestHandler for Router {
    fn send(&self, request: &HttpRequestInfo, deadline: &Deadline) -> Result<DirectResponse> {
        deadline.check()?;
        self.routes
            .iter()
            .find(|(endpoint, _)| same_endpoint(endpoint, &request.url))
            .map(|(_, serve)| serve(request))
            .ok_or_else(|| Error::Transport(format!("no route to {}", request.url)))
    }
}

/// The request the user agent makes after receiving an indirect message.
pub fn follow(response: &OutgoingWebResponse) -> HttpRequestInfo {
    match (&response.location, &response.body) {
        (Some(location), _) => HttpRequestInfo::get(location.clone()),
        (None, Some(Body::AutoPost { action, fields })) => {
            let body = to_query(fields.iter().map(|(key, value)| (key.as_str(), value.as_str())));
            HttpRequestInfo::post_form(action.clone(), body)
        }
        other => panic!("Expected an indirect message, got {:?}", other),
    }
}

/// Value of a query parameter of the redirect target.
pub fn query_value(response: &OutgoingWebResponse, key: &str) -> Option<String> {
    response
        .location
        .as_ref()?
        .query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}

pub mod defaults {
    pub const REQUEST_TOKEN_ENDPOINT: &str = "https://sp.example/request_token";
    pub const AUTHORIZATION_ENDPOINT: &str = "https://sp.example/authorize";
    pub const ACCESS_TOKEN_ENDPOINT: &str = "https://sp.example/access_token";
    pub const PROTECTED_RESOURCE: &str = "https://sp.example/photos?size=original";
    pub const CONSUMER_KEY: &str = "dpf43f3p2l4k3l03";
    pub const CONSUMER_SECRET: &str = "kd94hf93k423kf44";
    pub const CONSUMER_CALLBACK: &str = "https://consumer.example/ready";

    pub const CLIENT_ID: &str = "LocalClient";
    pub const CLIENT_SECRET: &str = "WOO_PASSPHRASE";
    pub const REDIRECT_URI: &str = "https://client.example/endpoint";
    pub const TOKEN_ENDPOINT: &str = "https://as.example/token";
    pub const USER_AUTHORIZATION_ENDPOINT: &str = "https://as.example/authorize";
    pub const OWNER_ID: &str = "Owner";

    pub const OP_ENDPOINT: &str = "https://op.example/server";
    pub const CLAIMED_ID: &str = "https://alice.example/";
    pub const RETURN_TO: &str = "https://rp.example/return?session=7";
}
