//! Selection of the concrete message type for received fields.
//!
//! The channel hands the raw fields of an incoming request, or of the response to one of its own
//! direct requests, to a `MessageFactory`. The factory decides on the message type and protocol
//! version without decoding any value; decoding and validation are left to the message model.
use std::collections::BTreeMap;

use url::Url;

use super::{Message, MessageDescription, MessageKind, ProtocolVersion, OPENID2_NAMESPACE};

/// Resolves raw fields to a message type.
pub trait MessageFactory: Send + Sync {
    /// Type of a message received as a request at `recipient`.
    fn request_kind(&self, fields: &BTreeMap<String, String>, recipient: &Url)
        -> Option<(MessageKind, ProtocolVersion)>;

    /// Type of the response received for `request`.
    fn response_kind(&self, request: &Message, fields: &BTreeMap<String, String>)
        -> Option<(MessageKind, ProtocolVersion)>;

    /// The protocol versions this factory produces messages of.
    fn versions(&self) -> &[ProtocolVersion];

    /// All message descriptions the factory may produce.
    fn descriptions(&self) -> Vec<&'static MessageDescription> {
        MessageDescription::all_of(self.versions())
    }
}

/// The three endpoints of an OAuth 1 service provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceProviderEndpoints {
    /// Where request tokens are obtained.
    pub request_token: Url,
    /// Where the user authorizes a request token.
    pub user_authorization: Url,
    /// Where authorized request tokens are exchanged.
    pub access_token: Url,
}

/// Both endpoints denote the same resource, ignoring query and fragment.
pub fn same_endpoint(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str().map(str::to_ascii_lowercase) == b.host_str().map(str::to_ascii_lowercase)
        && a.port_or_known_default() == b.port_or_known_default()
        && a.path() == b.path()
}

/// Message types of OAuth 1.0 and 1.0a.
///
/// Signed requests are told apart by the endpoint they arrive at, everything signed that does not
/// target the token endpoints is a protected resource request.
pub struct OAuth1MessageFactory {
    endpoints: ServiceProviderEndpoints,
}

impl OAuth1MessageFactory {
    /// Factory for a consumer or service provider using these endpoints.
    pub fn new(endpoints: ServiceProviderEndpoints) -> Self {
        OAuth1MessageFactory { endpoints }
    }

    /// The configured endpoints.
    pub fn endpoints(&self) -> &ServiceProviderEndpoints {
        &self.endpoints
    }
}

fn revision(fields: &BTreeMap<String, String>, marker: &str) -> ProtocolVersion {
    if fields.contains_key(marker) {
        ProtocolVersion::OAuth10a
    } else {
        ProtocolVersion::OAuth10
    }
}

impl MessageFactory for OAuth1MessageFactory {
    fn request_kind(&self, fields: &BTreeMap<String, String>, recipient: &Url)
        -> Option<(MessageKind, ProtocolVersion)>
    {
        if fields.contains_key("oauth_signature") {
            if same_endpoint(recipient, &self.endpoints.request_token) {
                Some((MessageKind::UnauthorizedTokenRequest, revision(fields, "oauth_callback")))
            } else if same_endpoint(recipient, &self.endpoints.access_token) {
                Some((MessageKind::AuthorizedTokenRequest, revision(fields, "oauth_verifier")))
            } else if fields.contains_key("oauth_token") {
                Some((MessageKind::AccessProtectedResourceRequest, ProtocolVersion::OAuth10a))
            } else {
                None
            }
        } else if same_endpoint(recipient, &self.endpoints.user_authorization) {
            let version = if fields.contains_key("oauth_callback") {
                ProtocolVersion::OAuth10
            } else {
                ProtocolVersion::OAuth10a
            };
            Some((MessageKind::UserAuthorizationRequest, version))
        } else if fields.contains_key("oauth_token") {
            Some((MessageKind::UserAuthorizationResponse, revision(fields, "oauth_verifier")))
        } else {
            None
        }
    }

    fn response_kind(&self, request: &Message, _: &BTreeMap<String, String>)
        -> Option<(MessageKind, ProtocolVersion)>
    {
        match request.kind() {
            MessageKind::UnauthorizedTokenRequest => {
                Some((MessageKind::UnauthorizedTokenResponse, request.version()))
            }
            MessageKind::AuthorizedTokenRequest => Some((MessageKind::AuthorizedTokenResponse, request.version())),
            _ => None,
        }
    }

    fn versions(&self) -> &[ProtocolVersion] {
        &[ProtocolVersion::OAuth10, ProtocolVersion::OAuth10a]
    }
}

/// Message types of the OAuth 2.0 authorization code flow.
#[derive(Clone, Copy, Debug, Default)]
pub struct OAuth2MessageFactory;

impl MessageFactory for OAuth2MessageFactory {
    fn request_kind(&self, fields: &BTreeMap<String, String>, _: &Url)
        -> Option<(MessageKind, ProtocolVersion)>
    {
        let kind = if fields.contains_key("response_type") {
            MessageKind::EndUserAuthorizationRequest
        } else if fields.contains_key("grant_type") {
            MessageKind::AccessTokenAuthorizationCodeRequest
        } else if fields.contains_key("code") {
            MessageKind::EndUserAuthorizationSuccessResponse
        } else if fields.contains_key("error") {
            MessageKind::EndUserAuthorizationFailedResponse
        } else {
            return None;
        };

        Some((kind, ProtocolVersion::OAuth20))
    }

    fn response_kind(&self, request: &Message, fields: &BTreeMap<String, String>)
        -> Option<(MessageKind, ProtocolVersion)>
    {
        if request.kind() != MessageKind::AccessTokenAuthorizationCodeRequest {
            return None;
        }

        if fields.contains_key("access_token") {
            Some((MessageKind::AccessTokenSuccessResponse, ProtocolVersion::OAuth20))
        } else if fields.contains_key("error") {
            Some((MessageKind::AccessTokenFailedResponse, ProtocolVersion::OAuth20))
        } else {
            None
        }
    }

    fn versions(&self) -> &[ProtocolVersion] {
        &[ProtocolVersion::OAuth20]
    }
}

/// Message types of OpenID 1.1 and 2.0, dispatched on `openid.mode`.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenIdMessageFactory;

impl MessageFactory for OpenIdMessageFactory {
    fn request_kind(&self, fields: &BTreeMap<String, String>, _: &Url)
        -> Option<(MessageKind, ProtocolVersion)>
    {
        let version = match fields.get("openid.ns").map(String::as_str) {
            Some(OPENID2_NAMESPACE) => ProtocolVersion::OpenId20,
            Some(_) => return None,
            None => ProtocolVersion::OpenId11,
        };

        let kind = match fields.get("openid.mode").map(String::as_str)? {
            "associate" => MessageKind::AssociateRequest,
            "checkid_setup" | "checkid_immediate" => MessageKind::CheckIdRequest,
            "id_res" if version == ProtocolVersion::OpenId11 && fields.contains_key("openid.user_setup_url") => {
                MessageKind::NegativeAssertion
            }
            "id_res" => MessageKind::PositiveAssertion,
            "cancel" | "setup_needed" => MessageKind::NegativeAssertion,
            "check_authentication" => MessageKind::CheckAuthenticationRequest,
            _ => return None,
        };

        Some((kind, version))
    }

    fn response_kind(&self, request: &Message, fields: &BTreeMap<String, String>)
        -> Option<(MessageKind, ProtocolVersion)>
    {
        let version = request.version();
        if fields.contains_key("error") {
            return Some((MessageKind::DirectErrorResponse, version));
        }

        match request.kind() {
            MessageKind::AssociateRequest => Some((MessageKind::AssociateSuccessResponse, version)),
            MessageKind::CheckAuthenticationRequest => Some((MessageKind::CheckAuthenticationResponse, version)),
            _ => None,
        }
    }

    fn versions(&self) -> &[ProtocolVersion] {
        &[ProtocolVersion::OpenId11, ProtocolVersion::OpenId20]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn endpoints() -> ServiceProviderEndpoints {
        ServiceProviderEndpoints {
            request_token: "http://sp.example/rt".parse().unwrap(),
            user_authorization: "http://sp.example/authorize".parse().unwrap(),
            access_token: "http://sp.example/at".parse().unwrap(),
        }
    }

    #[test]
    fn oauth1_dispatch_by_endpoint() {
        let factory = OAuth1MessageFactory::new(endpoints());
        let signed = fields(&[("oauth_signature", "x"), ("oauth_callback", "oob")]);

        let at = "http://SP.example:80/rt?x=1".parse().unwrap();
        assert_eq!(
            factory.request_kind(&signed, &at),
            Some((MessageKind::UnauthorizedTokenRequest, ProtocolVersion::OAuth10a))
        );

        let resource = "http://sp.example/photos".parse().unwrap();
        assert_eq!(factory.request_kind(&signed, &resource), None);

        let with_token = fields(&[("oauth_signature", "x"), ("oauth_token", "t")]);
        assert_eq!(
            factory.request_kind(&with_token, &resource),
            Some((MessageKind::AccessProtectedResourceRequest, ProtocolVersion::OAuth10a))
        );

        let callback = fields(&[("oauth_token", "t"), ("oauth_verifier", "v")]);
        let consumer = "http://consumer.example/cb".parse().unwrap();
        assert_eq!(
            factory.request_kind(&callback, &consumer),
            Some((MessageKind::UserAuthorizationResponse, ProtocolVersion::OAuth10a))
        );
    }

    #[test]
    fn openid_dispatch_by_mode() {
        let factory = OpenIdMessageFactory;
        let url = "http://rp.example/return".parse().unwrap();

        let v2 = fields(&[("openid.ns", OPENID2_NAMESPACE), ("openid.mode", "id_res")]);
        assert_eq!(
            factory.request_kind(&v2, &url),
            Some((MessageKind::PositiveAssertion, ProtocolVersion::OpenId20))
        );

        let setup = fields(&[("openid.mode", "id_res"), ("openid.user_setup_url", "http://op/setup")]);
        assert_eq!(
            factory.request_kind(&setup, &url),
            Some((MessageKind::NegativeAssertion, ProtocolVersion::OpenId11))
        );

        let unknown_ns = fields(&[("openid.ns", "urn:other"), ("openid.mode", "id_res")]);
        assert_eq!(factory.request_kind(&unknown_ns, &url), None);
        assert_eq!(factory.request_kind(&fields(&[("mode", "x")]), &url), None);
    }
}
