use std::sync::Arc;

use chrono::Duration;

use crate::channel::DirectWebRequestHandler;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::messaging::encoding::to_key_value_form;
use crate::messaging::{Message, MessageKind, Protections};
use crate::openid::relying_party::{provider_endpoint, verify_with_provider};
use crate::settings::SecuritySettings;
use crate::stores::{Association, AssociationStore, AssociationType, AssociationUsage};
use crate::bindings::BindingElement;

const PREFIX: &str = "openid.";

/// Which side of an OpenID exchange a signing element serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenIdRole {
    /// Signs assertions, verifies signatures of its private associations.
    Provider,
    /// Verifies assertions, locally or by asking the provider.
    RelyingParty,
}

/// Signs and verifies OpenID assertions with association secrets.
pub struct OpenIdSigning {
    role: OpenIdRole,
    store: Arc<dyn AssociationStore>,
    handler: Option<Arc<dyn DirectWebRequestHandler>>,
    private_type: AssociationType,
    private_lifetime: Duration,
}

impl OpenIdSigning {
    /// The provider side.
    ///
    /// Shared associations are looked up under the `smart` factor, private ones under `dumb` and
    /// created on demand.
    pub fn provider(store: Arc<dyn AssociationStore>, settings: &SecuritySettings) -> Self {
        OpenIdSigning {
            role: OpenIdRole::Provider,
            store,
            handler: None,
            private_type: AssociationType::HmacSha256,
            private_lifetime: settings.private_association_lifetime,
        }
    }

    /// The relying party side.
    ///
    /// Associations are looked up by the provider endpoint. Without a direct request handler,
    /// assertions signed with an unknown association are refused instead of verified by the
    /// provider.
    pub fn relying_party(
        store: Arc<dyn AssociationStore>,
        handler: Option<Arc<dyn DirectWebRequestHandler>>,
    ) -> Self {
        OpenIdSigning {
            role: OpenIdRole::RelyingParty,
            store,
            handler,
            private_type: AssociationType::HmacSha256,
            private_lifetime: Duration::zero(),
        }
    }

    /// The role this element plays.
    pub fn role(&self) -> OpenIdRole {
        self.role
    }

    fn private_association(&self, deadline: &Deadline) -> Result<Association> {
        let factor = AssociationUsage::Private.factor();
        if let Some(association) = self.store.best(factor, deadline)? {
            // Never hand out one that expires before a relying party could verify with it.
            if association.seconds_till_expiration(chrono::Utc::now()) > 60 {
                return Ok(association);
            }
        }

        let association = Association::generate(self.private_type, AssociationUsage::Private, self.private_lifetime)?;
        self.store.store(factor, association.clone(), deadline)?;
        tracing::debug!(handle = association.handle(), "created private association");
        Ok(association)
    }

    fn sign(&self, message: &mut Message, deadline: &Deadline) -> Result<()> {
        let requested = message.text("openid.assoc_handle").map(str::to_string);
        let association = match requested {
            Some(handle) => match self.store.get(AssociationUsage::Shared.factor(), &handle, deadline)? {
                Some(association) => association,
                None => {
                    tracing::debug!(%handle, "relying party named an unknown association");
                    message.set("openid.invalidate_handle", handle)?;
                    self.private_association(deadline)?
                }
            },
            None => self.private_association(deadline)?,
        };

        message.set("openid.assoc_handle", association.handle())?;
        let names = names_to_sign(message);
        message.set("openid.signed", names.join(","))?;

        let form = signed_key_value_form(message, &names)?;
        message.set("openid.sig", base64::encode(association.sign(form.as_bytes())))?;
        Ok(())
    }

    fn verify_provider_side(&self, message: &Message, deadline: &Deadline) -> Result<()> {
        let names = signed_names(message)?;
        let handle = message
            .text("openid.assoc_handle")
            .ok_or_else(|| Error::violation("missing openid.assoc_handle"))?;

        // Signatures of shared associations are verified by the relying party itself.
        match self.store.get(AssociationUsage::Private.factor(), handle, deadline)? {
            Some(association) => verify(&association, message, &names),
            None => {
                tracing::error!(%handle, "check_authentication for an unknown private association");
                Err(Error::InvalidSignature { kind: message.kind() })
            }
        }
    }

    fn verify_relying_party_side(&self, message: &Message, deadline: &Deadline) -> Result<()> {
        let names = signed_names(message)?;
        let handle = message
            .text("openid.assoc_handle")
            .ok_or_else(|| Error::violation("missing openid.assoc_handle"))?;
        let endpoint = provider_endpoint(message);

        let association = match &endpoint {
            Some(endpoint) => self.store.get(endpoint.as_str(), handle, deadline)?,
            None => None,
        };

        match (association, &self.handler, &endpoint) {
            (Some(association), _, _) => verify(&association, message, &names)?,
            (None, Some(handler), Some(endpoint)) => {
                let outcome = verify_with_provider(handler.as_ref(), endpoint, message, deadline)?;
                if let Some(invalid) = outcome.invalidate_handle {
                    self.store.remove(endpoint.as_str(), &invalid, deadline)?;
                }
                if !outcome.is_valid {
                    tracing::error!(%handle, "provider refused to confirm the assertion");
                    return Err(Error::InvalidSignature { kind: message.kind() });
                }
            }
            (None, _, _) => return Err(Error::UnknownAssociation(handle.to_string())),
        }

        if let (Some(endpoint), Some(invalid)) = (&endpoint, message.text("openid.invalidate_handle")) {
            tracing::debug!(handle = invalid, "provider invalidated an association");
            self.store.remove(endpoint.as_str(), invalid, deadline)?;
        }

        Ok(())
    }
}

/// Protected parts present in the message, then any extension fields.
fn names_to_sign(message: &Message) -> Vec<String> {
    let declared = message
        .description()
        .parts
        .iter()
        .filter(|part| part.protected && message.get(part.name).is_some())
        .map(|part| part.name.trim_start_matches(PREFIX).to_string());
    let extensions = message
        .extra()
        .keys()
        .filter(|key| key.starts_with(PREFIX))
        .map(|key| key.trim_start_matches(PREFIX).to_string());
    declared.chain(extensions).collect()
}

/// The `openid.signed` list, which must cover every protected part present.
fn signed_names(message: &Message) -> Result<Vec<String>> {
    let signed = message
        .text("openid.signed")
        .ok_or_else(|| Error::violation("missing openid.signed"))?;
    let names: Vec<String> = signed.split(',').map(str::to_string).collect();

    for part in message.description().parts.iter().filter(|part| part.protected) {
        if message.get(part.name).is_some() && !names.iter().any(|name| name == part.name.trim_start_matches(PREFIX)) {
            return Err(Error::violation(format!("`{}` is present but not signed", part.name)));
        }
    }

    Ok(names)
}

/// Key-Value Form of the named fields, in the given order, without their `openid.` prefix.
///
/// In a check_authentication request the mode is taken to be `id_res`, as in the assertion it
/// was copied from.
pub fn signed_key_value_form(message: &Message, names: &[String]) -> Result<String> {
    let fields = message.to_fields()?;
    let mut pairs = Vec::with_capacity(names.len());
    for name in names {
        let value = if name == "mode" && message.kind() == MessageKind::CheckAuthenticationRequest {
            "id_res"
        } else {
            fields
                .get(&format!("{}{}", PREFIX, name))
                .map(String::as_str)
                .ok_or_else(|| Error::violation(format!("signed field `{}` is missing", name)))?
        };
        pairs.push((name.as_str(), value));
    }

    to_key_value_form(pairs)
}

fn verify(association: &Association, message: &Message, names: &[String]) -> Result<()> {
    let form = signed_key_value_form(message, names)?;
    let signature = message
        .signature()
        .and_then(|sig| base64::decode(sig).ok())
        .unwrap_or_default();

    if association.verify(form.as_bytes(), &signature) {
        Ok(())
    } else {
        tracing::error!(kind = ?message.kind(), handle = association.handle(), "OpenID signature mismatch");
        Err(Error::InvalidSignature { kind: message.kind() })
    }
}

impl BindingElement for OpenIdSigning {
    fn protection(&self) -> Protections {
        Protections::TAMPER
    }

    fn process_outgoing(&self, message: &mut Message, deadline: &Deadline) -> Result<Option<Protections>> {
        match (self.role, message.kind()) {
            (OpenIdRole::Provider, MessageKind::PositiveAssertion) => {
                deadline.check()?;
                self.sign(message, deadline)?;
                Ok(Some(Protections::TAMPER))
            }
            // The request carries the provider's signature unchanged.
            (OpenIdRole::RelyingParty, MessageKind::CheckAuthenticationRequest) if message.signature().is_some() => {
                Ok(Some(Protections::TAMPER))
            }
            _ => Ok(None),
        }
    }

    fn process_incoming(&self, message: &mut Message, deadline: &Deadline) -> Result<Option<Protections>> {
        match (self.role, message.kind()) {
            (OpenIdRole::Provider, MessageKind::CheckAuthenticationRequest) => {
                deadline.check()?;
                self.verify_provider_side(message, deadline)?;
                Ok(Some(Protections::TAMPER))
            }
            (OpenIdRole::RelyingParty, MessageKind::PositiveAssertion) => {
                deadline.check()?;
                self.verify_relying_party_side(message, deadline)?;
                Ok(Some(Protections::TAMPER))
            }
            _ => Ok(None),
        }
    }
}
