//! The channel moves messages between the wire and the application.
//!
//! Outgoing messages are prepared by running the binding pipeline forward and are then encoded
//! for their transport: indirect messages become a redirect (or an auto-submitted form when the
//! url would grow too long), direct responses become a body in the encoding of their protocol and
//! direct requests are performed through a `DirectWebRequestHandler`.
//!
//! Incoming requests are read by collecting the raw fields from the authorization header, the
//! form body and the query, letting the `MessageFactory` pick the message type, decoding, and then
//! running the pipeline in reverse. Only a message that passed every protection it requires is
//! ever handed to the application.
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bindings::Pipeline;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::messaging::encoding::{
    authorization_header, extend_url, from_key_value_form, from_query, parse_authorization_header,
    to_key_value_form, to_query,
};
use crate::messaging::factory::MessageFactory;
use crate::messaging::{
    HttpMethod, Message, NormalizedParameter, Protections, Protocol, Transport, Value,
};
use crate::settings::SecuritySettings;

pub mod web;

pub use self::web::{
    Body, DirectResponse, DirectWebRequestHandler, HttpRequestInfo, OutgoingWebResponse, Status, WebRequest,
};
#[cfg(feature = "http-client")]
pub use self::web::ReqwestHandler;

/// Sends, receives and validates messages of one protocol.
///
/// Constructed once at startup and shared between requests.
pub struct Channel {
    factory: Box<dyn MessageFactory>,
    pipeline: Pipeline,
    handler: Option<Arc<dyn DirectWebRequestHandler>>,
    settings: SecuritySettings,
}

impl Channel {
    /// Combine a factory with a pipeline.
    ///
    /// Fails with a configuration error if any message type the factory can produce requires a
    /// protection the pipeline does not offer.
    pub fn new(factory: Box<dyn MessageFactory>, pipeline: Pipeline, settings: SecuritySettings) -> Result<Self> {
        let offered = pipeline.protection();
        for description in factory.descriptions() {
            let required = description.required_protection();
            if !offered.contains(required) {
                return Err(Error::Configuration(format!(
                    "{:?} of {:?} requires {} protection but the binding elements only offer {}",
                    description.kind, description.version, required, offered
                )));
            }
        }

        Ok(Channel {
            factory,
            pipeline,
            handler: None,
            settings,
        })
    }

    /// Perform direct requests with this handler.
    pub fn with_handler(mut self, handler: Arc<dyn DirectWebRequestHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// The handler for direct requests, if any.
    pub fn handler(&self) -> Option<&Arc<dyn DirectWebRequestHandler>> {
        self.handler.as_ref()
    }

    /// The message factory.
    pub fn factory(&self) -> &dyn MessageFactory {
        self.factory.as_ref()
    }

    /// The binding pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The security settings.
    pub fn settings(&self) -> &SecuritySettings {
        &self.settings
    }

    /// Run the outgoing pipeline and check the message is complete.
    pub fn prepare(&self, message: &mut Message, deadline: &Deadline) -> Result<Protections> {
        deadline.check()?;
        let applied = self.pipeline.process_outgoing(message, deadline)?;
        message.validate()?;
        Ok(applied)
    }

    /// Prepare a message and encode it as a response to the current request of the user agent or
    /// direct requester.
    ///
    /// Indirect messages become redirects, direct responses a body. Direct requests are refused,
    /// they are sent with `request` instead.
    pub fn send(&self, mut message: Message, deadline: &Deadline) -> Result<OutgoingWebResponse> {
        match message.kind().transport() {
            Transport::Indirect => {
                self.prepare(&mut message, deadline)?;
                self.indirect(&message)
            }
            Transport::Direct if !message.kind().is_request() => self.prepare_response(message, deadline),
            Transport::Direct => Err(Error::Configuration(format!(
                "{:?} is a direct request, send it with `request`",
                message.kind()
            ))),
        }
    }

    /// Prepare a direct response and encode its body.
    ///
    /// OAuth 1 responses are urlencoded, OAuth 2 responses are JSON and OpenID responses are in
    /// Key-Value Form. Error responses carry status 400.
    pub fn prepare_response(&self, mut message: Message, deadline: &Deadline) -> Result<OutgoingWebResponse> {
        if message.kind().transport() != Transport::Direct || message.kind().is_request() {
            return Err(Error::Configuration(format!("{:?} is not a direct response", message.kind())));
        }

        self.prepare(&mut message, deadline)?;
        let fields = message.to_fields()?;
        let body = match message.kind().protocol() {
            Protocol::OAuth1 => Body::Form(to_query(pairs(&fields))),
            Protocol::OAuth2 => Body::Json(to_json(&message, &fields)?),
            Protocol::OpenId => Body::KeyValueForm(to_key_value_form(pairs(&fields))?),
        };

        let status = if message.kind().is_error() {
            Status::BadRequest
        } else {
            Status::Ok
        };
        Ok(OutgoingWebResponse::with_body(status, body))
    }

    fn indirect(&self, message: &Message) -> Result<OutgoingWebResponse> {
        let recipient = message
            .recipient()
            .ok_or_else(|| Error::violation(format!("{:?} has no recipient", message.kind())))?;
        let fields = message.to_fields()?;

        let location = extend_url(recipient, pairs(&fields));
        if location.as_str().len() <= self.settings.maximum_indirect_url_length {
            return Ok(OutgoingWebResponse::redirect(location));
        }

        tracing::debug!(kind = ?message.kind(), "indirect message too long for a redirect, using a form post");
        Ok(OutgoingWebResponse::with_body(
            Status::Ok,
            Body::AutoPost {
                action: recipient.clone(),
                fields,
            },
        ))
    }

    /// Collect the raw fields of a request.
    ///
    /// Fields are taken from an `OAuth` authorization header, the form body and the query. A key
    /// appearing in more than one place, or twice in one, is a protocol violation.
    pub fn incoming_fields<R: WebRequest + ?Sized>(&self, request: &R) -> Result<BTreeMap<String, String>> {
        let mut fields = NormalizedParameter::new();
        if let Some(header) = request.authheader() {
            if let Some(pairs) = parse_authorization_header(header)? {
                for (key, value) in pairs {
                    fields.insert_or_poison(key.into(), value.into());
                }
            }
        }

        fields.merge(request.urlbody()?);
        fields.merge(request.query()?);
        fields.into_unique()
    }

    /// Read and validate the message of an incoming request.
    ///
    /// Returns `Ok(None)` when the request carries no fields at all. A request with fields that do
    /// not form any known message fails with `Error::UnrecognizedMessage`.
    pub fn read_incoming<R: WebRequest + ?Sized>(&self, request: &R, deadline: &Deadline) -> Result<Option<Message>> {
        deadline.check()?;
        let fields = self.incoming_fields(request)?;
        if fields.is_empty() {
            return Ok(None);
        }

        // The query is part of the fields now.
        let mut recipient = request.url().clone();
        recipient.set_query(None);
        recipient.set_fragment(None);

        let (kind, version) = match self.factory.request_kind(&fields, &recipient) {
            Some(found) => found,
            None => {
                tracing::warn!(%recipient, "request does not carry any recognized message");
                return Err(Error::UnrecognizedMessage);
            }
        };

        let mut message = Message::from_fields(kind, version, fields)?;
        message.set_recipient(recipient);
        message.set_http_method(request.method());

        self.pipeline.process_incoming(&mut message, deadline)?;
        message.validate()?;
        tracing::debug!(?kind, ?version, "accepted incoming message");
        Ok(Some(message))
    }

    /// Prepare a direct request and encode it as an HTTP request.
    ///
    /// OAuth 1 protocol parameters go into the authorization header, any extra data into the query
    /// or form body as the message's http method demands. Other protocols post a form.
    pub fn prepare_request(&self, message: &mut Message, deadline: &Deadline) -> Result<HttpRequestInfo> {
        if message.kind().transport() != Transport::Direct || !message.kind().is_request() {
            return Err(Error::Configuration(format!("{:?} is not a direct request", message.kind())));
        }

        self.prepare(message, deadline)?;
        let recipient = message
            .recipient()
            .cloned()
            .ok_or_else(|| Error::violation(format!("{:?} has no recipient", message.kind())))?;
        let fields = message.to_fields()?;

        match message.kind().protocol() {
            Protocol::OAuth1 => {
                let (protocol, extra): (Vec<_>, Vec<_>) = pairs(&fields).partition(|(key, _)| key.starts_with("oauth_"));
                let header = authorization_header(protocol);
                let request = match message.http_method() {
                    HttpMethod::Get => HttpRequestInfo::get(extend_url(&recipient, extra)),
                    HttpMethod::Post => HttpRequestInfo::post_form(recipient, to_query(extra)),
                };
                Ok(request.with_authorization(header))
            }
            Protocol::OAuth2 | Protocol::OpenId => {
                message.set_http_method(HttpMethod::Post);
                Ok(HttpRequestInfo::post_form(recipient, to_query(pairs(&fields))))
            }
        }
    }

    /// Send a direct request and read the response.
    ///
    /// The wait is bounded by the deadline and the direct request timeout, whichever is earlier.
    pub fn request(&self, mut message: Message, deadline: &Deadline) -> Result<Message> {
        let handler = self
            .handler
            .as_ref()
            .ok_or_else(|| Error::Configuration("no handler for direct requests".into()))?;

        let http = self.prepare_request(&mut message, deadline)?;
        let deadline = deadline.bounded_by(self.settings.direct_request_timeout);
        deadline.check()?;

        tracing::debug!(kind = ?message.kind(), url = %http.url, "sending direct request");
        let response = handler.send(&http, &deadline)?;
        self.read_response(&message, response, &deadline)
    }

    /// Decode and validate the response to a direct request.
    pub fn read_response(&self, request: &Message, response: DirectResponse, deadline: &Deadline) -> Result<Message> {
        let parsed = match request.kind().protocol() {
            Protocol::OAuth1 if response.status >= 400 && response.status < 500 => {
                return Err(Error::violation(format!(
                    "service provider refused the request with status {}: {}",
                    response.status, response.body
                )));
            }
            Protocol::OAuth1 => from_query(&response.body).and_then(NormalizedParameter::into_unique),
            Protocol::OAuth2 => from_json(&response.body),
            Protocol::OpenId => from_key_value_form(&response.body),
        };

        let fields = match parsed {
            Ok(fields) if !fields.is_empty() => fields,
            _ if response.status >= 500 => {
                return Err(Error::Transport(format!("peer failed with status {}", response.status)))
            }
            Ok(_) => return Err(Error::UnrecognizedMessage),
            Err(err) => return Err(err),
        };

        let (kind, version) = match self.factory.response_kind(request, &fields) {
            Some(found) => found,
            None => {
                tracing::warn!(request = ?request.kind(), status = response.status, "unrecognized direct response");
                return Err(Error::UnrecognizedMessage);
            }
        };

        let mut message = Message::from_fields(kind, version, fields)?;
        self.pipeline.process_incoming(&mut message, deadline)?;
        message.validate()?;
        Ok(message)
    }
}

fn pairs(fields: &BTreeMap<String, String>) -> impl Iterator<Item = (&str, &str)> {
    fields.iter().map(|(key, value)| (key.as_str(), value.as_str()))
}

/// Integers become JSON numbers, everything else a string.
fn to_json(message: &Message, fields: &BTreeMap<String, String>) -> Result<String> {
    let object: serde_json::Map<String, serde_json::Value> = fields
        .iter()
        .map(|(key, value)| {
            let value = match message.get(key) {
                Some(Value::Integer(integer)) => serde_json::Value::from(*integer),
                _ => serde_json::Value::from(value.as_str()),
            };
            (key.clone(), value)
        })
        .collect();

    serde_json::to_string(&object).map_err(|err| Error::format("body", err.to_string()))
}

fn from_json(body: &str) -> Result<BTreeMap<String, String>> {
    let object: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(body).map_err(|err| Error::format("body", err.to_string()))?;

    object
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| match value {
            serde_json::Value::String(text) => Ok((key, text)),
            serde_json::Value::Number(number) => Ok((key, number.to_string())),
            serde_json::Value::Bool(flag) => Ok((key, flag.to_string())),
            _ => Err(Error::format(key, "nested JSON values are not supported")),
        })
        .collect()
}
