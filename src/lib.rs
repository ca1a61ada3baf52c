//! # oxide-messaging
//!
//! A messaging engine for the redirect based authorization protocols: OAuth 1.0 and 1.0a, the
//! OAuth 2.0 authorization code grant, and OpenID 1.1 and 2.0 authentication.
//!
//! ## About
//!
//! All of these protocols exchange flat key-value messages, either indirectly through the user
//! agent (a redirect or an auto-submitted form) or directly between two servers. What differs is
//! how the messages are encoded and how they are protected. This crate models every message type
//! of the supported protocols in one declarative [`messaging`] layer and moves them through a
//! [`Channel`], which runs an ordered pipeline of [`bindings`] on every message:
//!
//! * tamper protection, signing with OAuth 1 signature methods or OpenID associations,
//! * expiration protection, stamping and checking the creation time of messages,
//! * replay protection, attaching nonces and consuming them in a [`NonceStore`].
//!
//! A message reaches the application only once it passed every protection its type requires.
//! Failures are reported as a specific [`Error`] variant, which tells a forged signature apart
//! from a replayed or an expired message.
//!
//! ## Using a protocol
//!
//! Each protocol module offers ready made roles built on a channel: [`oauth1::Consumer`] and
//! [`oauth1::ServiceProvider`], [`oauth2::Client`] and [`oauth2::AuthorizationServer`], and the
//! [`openid::relying_party`] and [`openid::provider`] operations. Their state lives in the
//! pluggable [`stores`], the in-memory implementations are sufficient for a single process.
//!
//! Hosting web servers translate their request type into a [`WebRequest`] and write out the
//! returned [`OutgoingWebResponse`]. Direct requests to the peer are performed by a
//! [`DirectWebRequestHandler`], with an implementation on top of `reqwest` behind the
//! `http-client` feature. _WARNING_: The `PLAINTEXT` signature method, the `no-encryption`
//! association session and the OAuth 2 messages rely on TLS for their confidentiality.
//!
//! [`messaging`]: messaging/index.html
//! [`bindings`]: bindings/index.html
//! [`stores`]: stores/index.html
//! [`Channel`]: channel/struct.Channel.html
//! [`NonceStore`]: stores/nonce/trait.NonceStore.html
//! [`Error`]: error/enum.Error.html
//! [`WebRequest`]: channel/web/trait.WebRequest.html
//! [`OutgoingWebResponse`]: channel/web/struct.OutgoingWebResponse.html
//! [`DirectWebRequestHandler`]: channel/web/trait.DirectWebRequestHandler.html
//! [`oauth1::Consumer`]: oauth1/struct.Consumer.html
//! [`oauth1::ServiceProvider`]: oauth1/struct.ServiceProvider.html
//! [`oauth2::Client`]: oauth2/struct.Client.html
//! [`oauth2::AuthorizationServer`]: oauth2/struct.AuthorizationServer.html
//! [`openid::relying_party`]: openid/relying_party/index.html
//! [`openid::provider`]: openid/provider/index.html
#![warn(missing_docs)]

extern crate base64;
extern crate chrono;
extern crate hmac;
extern crate once_cell;
extern crate parking_lot;
extern crate percent_encoding;
extern crate rand;
#[cfg(feature = "http-client")]
extern crate reqwest;
extern crate rmp_serde;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate serde_urlencoded;
extern crate sha1;
extern crate sha2;
extern crate subtle;
extern crate thiserror;
extern crate tracing;
extern crate url;

pub mod bindings;
pub mod channel;
pub mod deadline;
pub mod error;
pub mod messaging;
pub mod oauth1;
pub mod oauth2;
pub mod openid;
pub mod settings;
pub mod stores;

pub use self::channel::Channel;
pub use self::deadline::Deadline;
pub use self::error::{Error, Result};
pub use self::settings::SecuritySettings;
