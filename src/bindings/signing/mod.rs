//! Tamper protection.
//!
//! OAuth 1 messages are signed over a canonical base string of the HTTP method, the normalized
//! request URL and all parameters, keyed by the consumer and token secrets. OpenID messages are
//! signed over the Key-Value Form of the fields listed in `openid.signed`, keyed by an
//! association secret.
mod oauth;
mod openid;

pub use self::oauth::{signature_base_string, signing_key, OAuthSigning, SignatureMethod};
pub use self::openid::{signed_key_value_form, OpenIdRole, OpenIdSigning};
