//! Simple, owning request and response types and the direct request seam.
use std::collections::BTreeMap;
use std::sync::Arc;

use url::Url;

use crate::deadline::Deadline;
use crate::error::Result;
use crate::messaging::encoding::from_query;
use crate::messaging::{HttpMethod, NormalizedParameter};

const FORM: &str = "application/x-www-form-urlencoded";

/// Abstraction of an incoming HTTP request.
///
/// The channel only looks at the method, the url, a form body and the authorization header.
pub trait WebRequest {
    /// The request method.
    fn method(&self) -> HttpMethod;

    /// The full request url, including the query.
    fn url(&self) -> &Url;

    /// Parsed url query. An empty query yields an empty parameter set.
    fn query(&self) -> Result<NormalizedParameter> {
        match self.url().query() {
            Some(query) => from_query(query),
            None => Ok(NormalizedParameter::new()),
        }
    }

    /// Parsed `application/x-www-form-urlencoded` body, empty for any other content.
    fn urlbody(&self) -> Result<NormalizedParameter>;

    /// Contents of the authorization header, if any.
    fn authheader(&self) -> Option<&str>;
}

/// Open and simple implementation of `WebRequest`.
///
/// Doubles as the description of a direct request the channel asks a `DirectWebRequestHandler`
/// to perform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequestInfo {
    /// Request method.
    pub method: HttpMethod,

    /// Full url, query included.
    pub url: Url,

    /// Value of the `Authorization` header.
    pub authorization: Option<String>,

    /// Value of the `Content-Type` header.
    pub content_type: Option<String>,

    /// Raw body.
    pub body: Option<String>,
}

impl HttpRequestInfo {
    /// A body-less GET request.
    pub fn get(url: Url) -> Self {
        HttpRequestInfo {
            method: HttpMethod::Get,
            url,
            authorization: None,
            content_type: None,
            body: None,
        }
    }

    /// A POST of an urlencoded form.
    pub fn post_form(url: Url, body: String) -> Self {
        HttpRequestInfo {
            method: HttpMethod::Post,
            url,
            authorization: None,
            content_type: Some(FORM.to_string()),
            body: Some(body),
        }
    }

    /// Set the `Authorization` header.
    pub fn with_authorization(mut self, header: String) -> Self {
        self.authorization = Some(header);
        self
    }
}

impl WebRequest for HttpRequestInfo {
    fn method(&self) -> HttpMethod {
        self.method
    }

    fn url(&self) -> &Url {
        &self.url
    }

    fn urlbody(&self) -> Result<NormalizedParameter> {
        let is_form = self
            .content_type
            .as_ref()
            .map_or(false, |content_type| content_type.starts_with(FORM));
        match (&self.body, is_form) {
            (Some(body), true) => from_query(body),
            _ => Ok(NormalizedParameter::new()),
        }
    }

    fn authheader(&self) -> Option<&str> {
        self.authorization.as_ref().map(String::as_str)
    }
}

/// The HTTP status codes a channel responds with.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Status {
    /// Http status code 200.
    Ok,

    /// Http status code 302.
    Redirect,

    /// Http status code 400.
    BadRequest,

    /// Http status code 401.
    Unauthorized,
}

impl Status {
    /// The numeric status code.
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Redirect => 302,
            Status::BadRequest => 400,
            Status::Unauthorized => 401,
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Ok
    }
}

/// Models the necessary body contents.
///
/// Real HTTP servers should set the content type of `content_type` for each of the variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body {
    /// An urlencoded form, `application/x-www-form-urlencoded`.
    Form(String),

    /// A json encoded body, `application/json`.
    Json(String),

    /// OpenID Key-Value Form, `text/plain`.
    KeyValueForm(String),

    /// An indirect message too long for a redirect.
    ///
    /// The hosting application renders a form posting `fields` to `action` and submits it from the
    /// user agent.
    AutoPost {
        /// Where the form posts to.
        action: Url,
        /// The hidden form fields.
        fields: BTreeMap<String, String>,
    },
}

impl Body {
    /// The media type of the body.
    pub fn content_type(&self) -> &'static str {
        match self {
            Body::Form(_) => FORM,
            Body::Json(_) => "application/json",
            Body::KeyValueForm(_) => "text/plain; charset=utf-8",
            Body::AutoPost { .. } => "text/html; charset=utf-8",
        }
    }
}

/// A message ready to be written out by the hosting web server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutgoingWebResponse {
    /// HTTP status code.
    pub status: Status,

    /// A location header, for redirects.
    pub location: Option<Url>,

    /// Encoded body of the response.
    pub body: Option<Body>,
}

impl OutgoingWebResponse {
    /// Redirect the user agent.
    pub fn redirect(location: Url) -> Self {
        OutgoingWebResponse {
            status: Status::Redirect,
            location: Some(location),
            body: None,
        }
    }

    /// A response with a body.
    pub fn with_body(status: Status, body: Body) -> Self {
        OutgoingWebResponse {
            status,
            location: None,
            body: Some(body),
        }
    }

    /// The form the response has when it arrives at a direct requester.
    ///
    /// Mainly useful for routing direct requests to a channel in the same process.
    pub fn into_direct_response(self) -> DirectResponse {
        let content_type = self.body.as_ref().map(|body| body.content_type().to_string());
        let body = match self.body {
            Some(Body::Form(text)) | Some(Body::Json(text)) | Some(Body::KeyValueForm(text)) => text,
            Some(Body::AutoPost { .. }) | None => String::new(),
        };

        DirectResponse {
            status: self.status.code(),
            content_type,
            body,
        }
    }
}

/// The response to a direct request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectResponse {
    /// HTTP status code.
    pub status: u16,

    /// Value of the `Content-Type` header.
    pub content_type: Option<String>,

    /// The body, decoded as text.
    pub body: String,
}

/// Performs server-to-server HTTP requests for the channel.
///
/// Implementations block until the response arrived, and must give up with `Error::Cancelled` or
/// `Error::Transport` once the deadline passed.
pub trait DirectWebRequestHandler: Send + Sync {
    /// Perform the request.
    fn send(&self, request: &HttpRequestInfo, deadline: &Deadline) -> Result<DirectResponse>;
}

impl<H: DirectWebRequestHandler + ?Sized> DirectWebRequestHandler for Arc<H> {
    fn send(&self, request: &HttpRequestInfo, deadline: &Deadline) -> Result<DirectResponse> {
        (**self).send(request, deadline)
    }
}

#[cfg(feature = "http-client")]
pub use self::client::ReqwestHandler;

#[cfg(feature = "http-client")]
mod client {
    use std::time::Duration;

    use reqwest::blocking::Client;
    use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
    use reqwest::redirect::Policy;

    use super::{DirectResponse, DirectWebRequestHandler, HttpRequestInfo};
    use crate::deadline::Deadline;
    use crate::error::{Error, Result};
    use crate::messaging::HttpMethod;
    use crate::settings::SecuritySettings;

    /// A blocking `reqwest` client.
    ///
    /// Redirects are never followed, a direct response is always read from the endpoint itself.
    #[derive(Clone, Debug)]
    pub struct ReqwestHandler {
        client: Client,
        timeout: Duration,
    }

    impl ReqwestHandler {
        /// A client bounded by the direct request timeout of the settings.
        pub fn new(settings: &SecuritySettings) -> Result<Self> {
            let client = Client::builder()
                .redirect(Policy::none())
                .build()
                .map_err(|err| Error::Configuration(format!("http client: {}", err)))?;
            Ok(ReqwestHandler {
                client,
                timeout: settings.direct_request_timeout,
            })
        }
    }

    impl DirectWebRequestHandler for ReqwestHandler {
        fn send(&self, request: &HttpRequestInfo, deadline: &Deadline) -> Result<DirectResponse> {
            deadline.check()?;
            let timeout = deadline.bounded_by(self.timeout).remaining().unwrap_or(self.timeout);

            let mut builder = match request.method {
                HttpMethod::Get => self.client.get(request.url.clone()),
                HttpMethod::Post => self.client.post(request.url.clone()),
            }
            .timeout(timeout);

            if let Some(authorization) = &request.authorization {
                builder = builder.header(AUTHORIZATION, authorization.as_str());
            }
            if let Some(content_type) = &request.content_type {
                builder = builder.header(CONTENT_TYPE, content_type.as_str());
            }
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            let response = builder.send().map_err(|err| {
                if err.is_timeout() {
                    Error::Cancelled
                } else {
                    Error::Transport(err.to_string())
                }
            })?;

            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let body = response.text().map_err(|err| Error::Transport(err.to_string()))?;

            Ok(DirectResponse {
                status,
                content_type,
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_body_only_with_form_content() {
        let url: Url = "https://sp.example/token?a=1".parse().unwrap();
        let request = HttpRequestInfo::post_form(url.clone(), "b=2&c=3".into());
        assert_eq!(request.urlbody().unwrap().unique_value("b"), Some("2"));
        assert_eq!(request.query().unwrap().unique_value("a"), Some("1"));

        let mut json = request.clone();
        json.content_type = Some("application/json".into());
        assert!(json.urlbody().unwrap().is_empty());

        assert!(HttpRequestInfo::get(url).urlbody().unwrap().is_empty());
    }

    #[test]
    fn direct_response_of_outgoing() {
        let response = OutgoingWebResponse::with_body(Status::BadRequest, Body::KeyValueForm("error:x\n".into()));
        let direct = response.into_direct_response();
        assert_eq!(direct.status, 400);
        assert_eq!(direct.body, "error:x\n");
        assert_eq!(direct.content_type.as_deref(), Some("text/plain; charset=utf-8"));

        let redirect = OutgoingWebResponse::redirect("https://rp.example/".parse().unwrap());
        assert_eq!(redirect.into_direct_response().status, 302);
    }
}
