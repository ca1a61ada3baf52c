//! Shared signing secrets between OpenID relying parties and providers.
//!
//! An [`Association`] is established by the provider and either handed to a relying party
//! (*shared*, "smart mode") or kept to itself to verify its own signatures when a relying party
//! asks it to (*private*, "dumb mode"). Stores keep associations per distinguishing factor: the
//! provider endpoint on the relying party, and the usage on the provider.
//!
//! [`Association`]: struct.Association.html
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use parking_lot::{Mutex, RwLock};
use rand::{distributions::Alphanumeric, thread_rng, Rng, RngCore};
use sha1::Sha1;
use sha2::Sha256;

use crate::deadline::Deadline;
use crate::error::{Error, Result};

/// Announced lifetimes beyond this are cut down to it.
const MAXIMUM_LIFETIME_SECONDS: i64 = 5 * 366 * 24 * 60 * 60;

/// The lifetime of an association announced in seconds.
///
/// `None` for lifetimes that are not positive. Longer lifetimes than five years are shortened.
pub fn lifetime_from_seconds(seconds: i64) -> Option<Duration> {
    if seconds <= 0 {
        return None;
    }
    Some(Duration::seconds(seconds.min(MAXIMUM_LIFETIME_SECONDS)))
}

/// Signature algorithm of an association.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssociationType {
    /// `HMAC-SHA1`, 20 byte secrets.
    HmacSha1,
    /// `HMAC-SHA256`, 32 byte secrets.
    HmacSha256,
}

impl AssociationType {
    /// The wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            AssociationType::HmacSha1 => "HMAC-SHA1",
            AssociationType::HmacSha256 => "HMAC-SHA256",
        }
    }

    /// Parse the wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "HMAC-SHA1" => Some(AssociationType::HmacSha1),
            "HMAC-SHA256" => Some(AssociationType::HmacSha256),
            _ => None,
        }
    }

    /// Required secret length in bytes.
    pub fn secret_len(self) -> usize {
        match self {
            AssociationType::HmacSha1 => 20,
            AssociationType::HmacSha256 => 32,
        }
    }

    /// Compute the MAC of `data` under `key`.
    pub fn sign(self, key: &[u8], data: &[u8]) -> Vec<u8> {
        // Hmac accepts keys of any length.
        match self {
            AssociationType::HmacSha1 => match Hmac::<Sha1>::new_from_slice(key) {
                Ok(mut mac) => {
                    mac.update(data);
                    mac.finalize().into_bytes().to_vec()
                }
                Err(_) => Vec::new(),
            },
            AssociationType::HmacSha256 => match Hmac::<Sha256>::new_from_slice(key) {
                Ok(mut mac) => {
                    mac.update(data);
                    mac.finalize().into_bytes().to_vec()
                }
                Err(_) => Vec::new(),
            },
        }
    }

    /// Verify a MAC in constant time.
    pub fn verify(self, key: &[u8], data: &[u8], signature: &[u8]) -> bool {
        match self {
            AssociationType::HmacSha1 => Hmac::<Sha1>::new_from_slice(key)
                .map(|mut mac| {
                    mac.update(data);
                    mac.verify_slice(signature).is_ok()
                })
                .unwrap_or(false),
            AssociationType::HmacSha256 => Hmac::<Sha256>::new_from_slice(key)
                .map(|mut mac| {
                    mac.update(data);
                    mac.verify_slice(signature).is_ok()
                })
                .unwrap_or(false),
        }
    }
}

/// Whether the association is known to the counterparty.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssociationUsage {
    /// Established with a relying party, "smart mode".
    Shared,
    /// Known only to the provider, "dumb mode". Never disclosed.
    Private,
}

impl AssociationUsage {
    /// The distinguishing factor a provider stores these associations under.
    pub fn factor(self) -> &'static str {
        match self {
            AssociationUsage::Shared => "smart",
            AssociationUsage::Private => "dumb",
        }
    }
}

/// A shared secret with its lifetime.
#[derive(Clone, PartialEq, Eq)]
pub struct Association {
    handle: String,
    secret: Vec<u8>,
    issued: DateTime<Utc>,
    expires: DateTime<Utc>,
    kind: AssociationType,
    usage: AssociationUsage,
}

#[derive(Serialize, Deserialize)]
struct SerdeAssociation {
    handle: String,
    secret: Vec<u8>,
    issued: i64,
    lifetime: i64,
    kind: AssociationType,
    usage: AssociationUsage,
}

impl Association {
    /// Construct an association from its parts.
    ///
    /// Fails with a configuration error when the secret length does not match the algorithm, the
    /// lifetime is not positive or the handle is unusable on the wire.
    pub fn new(
        handle: String,
        kind: AssociationType,
        secret: Vec<u8>,
        issued: DateTime<Utc>,
        lifetime: Duration,
        usage: AssociationUsage,
    ) -> Result<Self> {
        if secret.len() != kind.secret_len() {
            return Err(Error::Configuration(format!(
                "{} requires a {} byte secret, got {}",
                kind.as_str(),
                kind.secret_len(),
                secret.len()
            )));
        }

        if lifetime <= Duration::zero() {
            return Err(Error::Configuration("association lifetime must be positive".into()));
        }

        if handle.is_empty() || handle.len() > 255 || !handle.bytes().all(|b| (33..=126).contains(&b)) {
            return Err(Error::Configuration(format!("unusable association handle `{}`", handle)));
        }

        let expires = issued
            .checked_add_signed(lifetime)
            .ok_or_else(|| Error::Configuration("association lifetime overflows".into()))?;

        Ok(Association {
            handle,
            secret,
            issued,
            expires,
            kind,
            usage,
        })
    }

    /// Create a fresh association with a random handle and secret.
    pub fn generate(kind: AssociationType, usage: AssociationUsage, lifetime: Duration) -> Result<Self> {
        let mut rng = thread_rng();
        let mut secret = vec![0; kind.secret_len()];
        rng.fill_bytes(&mut secret);

        let issued = Utc::now();
        let unique: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        let handle = format!("{{{}}}{{{}}}{{{}}}", kind.as_str(), issued.timestamp(), unique);

        Association::new(handle, kind, secret, issued, lifetime, usage)
    }

    /// The opaque handle.
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// The secret bytes.
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// The signature algorithm.
    pub fn kind(&self) -> AssociationType {
        self.kind
    }

    /// Shared or private.
    pub fn usage(&self) -> AssociationUsage {
        self.usage
    }

    /// Issuance time.
    pub fn issued(&self) -> DateTime<Utc> {
        self.issued
    }

    /// Expiration time.
    pub fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    /// Whether the association is no longer usable at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires
    }

    /// Whether the association is no longer usable.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Seconds of lifetime left, zero when expired.
    pub fn seconds_till_expiration(&self, now: DateTime<Utc>) -> i64 {
        (self.expires - now).num_seconds().max(0)
    }

    /// Sign data with the secret.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.kind.sign(&self.secret, data)
    }

    /// Check a signature in constant time.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        self.kind.verify(&self.secret, data, signature)
    }

    /// Export for a persistent store. The output contains the secret.
    pub fn serialize_private(&self) -> Result<Vec<u8>> {
        let serde = SerdeAssociation {
            handle: self.handle.clone(),
            secret: self.secret.clone(),
            issued: self.issued.timestamp(),
            lifetime: (self.expires - self.issued).num_seconds(),
            kind: self.kind,
            usage: self.usage,
        };
        rmp_serde::to_vec(&serde).map_err(|err| Error::Configuration(err.to_string()))
    }

    /// Restore an association written by `serialize_private`, with all creation checks applied.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let serde: SerdeAssociation =
            rmp_serde::from_slice(bytes).map_err(|err| Error::format("association", err.to_string()))?;
        let issued = Utc
            .timestamp_opt(serde.issued, 0)
            .single()
            .ok_or_else(|| Error::format("association", "issue time out of range"))?;
        let lifetime = lifetime_from_seconds(serde.lifetime)
            .ok_or_else(|| Error::format("association", "lifetime out of range"))?;
        Association::new(serde.handle, serde.kind, serde.secret, issued, lifetime, serde.usage)
    }
}

impl std::fmt::Debug for Association {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Association")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("usage", &self.usage)
            .field("issued", &self.issued)
            .field("expires", &self.expires)
            .finish()
    }
}

/// Persists associations by distinguishing factor.
///
/// Each operation is atomic on its own. Lookups never return an expired association.
pub trait AssociationStore: Send + Sync {
    /// Insert, replacing an association with the same handle for that factor.
    fn store(&self, factor: &str, association: Association, deadline: &Deadline) -> Result<()>;

    /// The most recently issued association of that factor that has not expired.
    fn best(&self, factor: &str, deadline: &Deadline) -> Result<Option<Association>>;

    /// An association by handle, `None` if unknown or expired.
    fn get(&self, factor: &str, handle: &str, deadline: &Deadline) -> Result<Option<Association>>;

    /// Remove by handle, returning whether anything was removed.
    fn remove(&self, factor: &str, handle: &str, deadline: &Deadline) -> Result<bool>;

    /// Drop all expired associations of all factors.
    fn clear_expired(&self);
}

impl<S: AssociationStore + ?Sized> AssociationStore for Arc<S> {
    fn store(&self, factor: &str, association: Association, deadline: &Deadline) -> Result<()> {
        (**self).store(factor, association, deadline)
    }

    fn best(&self, factor: &str, deadline: &Deadline) -> Result<Option<Association>> {
        (**self).best(factor, deadline)
    }

    fn get(&self, factor: &str, handle: &str, deadline: &Deadline) -> Result<Option<Association>> {
        (**self).get(factor, handle, deadline)
    }

    fn remove(&self, factor: &str, handle: &str, deadline: &Deadline) -> Result<bool> {
        (**self).remove(factor, handle, deadline)
    }

    fn clear_expired(&self) {
        (**self).clear_expired()
    }
}

type Slot = Arc<Mutex<HashMap<String, Association>>>;

/// In-memory association store.
///
/// Each factor has its own lock so operations on different peers do not contend. The outer map is
/// only write-locked to add a new factor.
#[derive(Default)]
pub struct MemoryAssociationStore {
    factors: RwLock<HashMap<String, Slot>>,
}

impl MemoryAssociationStore {
    /// An empty store.
    pub fn new() -> Self {
        MemoryAssociationStore::default()
    }

    fn slot(&self, factor: &str) -> Option<Slot> {
        self.factors.read().get(factor).cloned()
    }

    fn slot_or_insert(&self, factor: &str) -> Slot {
        if let Some(slot) = self.slot(factor) {
            return slot;
        }

        self.factors
            .write()
            .entry(factor.to_string())
            .or_default()
            .clone()
    }
}

impl AssociationStore for MemoryAssociationStore {
    fn store(&self, factor: &str, association: Association, deadline: &Deadline) -> Result<()> {
        deadline.check()?;
        let slot = self.slot_or_insert(factor);
        let mut slot = slot.lock();
        if slot.insert(association.handle.clone(), association).is_some() {
            tracing::debug!(factor, "replaced association with the same handle");
        }
        Ok(())
    }

    fn best(&self, factor: &str, deadline: &Deadline) -> Result<Option<Association>> {
        deadline.check()?;
        let now = Utc::now();
        let slot = match self.slot(factor) {
            Some(slot) => slot,
            None => return Ok(None),
        };

        let slot = slot.lock();
        Ok(slot
            .values()
            .filter(|association| !association.is_expired_at(now))
            .max_by_key(|association| association.issued)
            .cloned())
    }

    fn get(&self, factor: &str, handle: &str, deadline: &Deadline) -> Result<Option<Association>> {
        deadline.check()?;
        let now = Utc::now();
        Ok(self.slot(factor).and_then(|slot| {
            slot.lock()
                .get(handle)
                .filter(|association| !association.is_expired_at(now))
                .cloned()
        }))
    }

    fn remove(&self, factor: &str, handle: &str, deadline: &Deadline) -> Result<bool> {
        deadline.check()?;
        Ok(self
            .slot(factor)
            .map_or(false, |slot| slot.lock().remove(handle).is_some()))
    }

    fn clear_expired(&self) {
        let now = Utc::now();
        let slots: Vec<Slot> = self.factors.read().values().cloned().collect();
        for slot in slots {
            slot.lock().retain(|_, association| !association.is_expired_at(now));
        }
    }
}
