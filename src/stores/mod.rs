//! The mutable state shared between requests.
//!
//! Both stores are traits so that a deployment spanning several processes can back them with a
//! database. The in-memory implementations are safe for concurrent use and are meant to be
//! constructed once and shared through an `Arc`. Neither store runs a background sweep, call
//! `purge_expired` or `clear_expired` from a timer of the hosting application.
pub mod association;
pub mod nonce;

pub use self::association::{
    Association, AssociationStore, AssociationType, AssociationUsage, MemoryAssociationStore,
};
pub use self::nonce::{MemoryNonceStore, NonceStore};
