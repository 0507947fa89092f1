//! Building signed DNS UPDATE messages.
//!
//! An update is sent to the parent zone and changes the records the parent
//! holds for a child: its delegation or its SIG(0) KEY.  Removals use the
//! "delete an RR from an RRset" form of RFC 2136, section 2.5.4, and come
//! before any additions.

use std::fmt;

use domain::base::{
    iana::{Class, Opcode},
    message_builder::{AuthorityBuilder, PushError},
    MessageBuilder, Name, Question, Record, Rtype, Ttl, UnknownRecordData,
};
use domain::rdata::{Aaaa, Ns, A};
use log::debug;
use serde::Serialize;

use crate::delegation::DelegationDiff;
use crate::keystore::{KeyKind, KeyRecord, KeyState, KeyStore, KeyStoreError};
use crate::sig0::{self, PublicKey, SigValidity, SignError};

//----------- UpdatePayload ----------------------------------------------------

/// What an update changes at the parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdatePayload {
    /// Bring the delegation in line with the child.
    Delegation(DelegationDiff),

    /// Publish the child's KEY record.
    KeyUpload { key: PublicKey },

    /// Replace the child's KEY record.
    KeyRollover { old: PublicKey, new: PublicKey },
}

impl UpdatePayload {
    /// The number of records added or removed.
    pub fn len(&self) -> usize {
        match self {
            Self::Delegation(diff) => diff.len(),
            Self::KeyUpload { .. } => 1,
            Self::KeyRollover { .. } => 2,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//----------- UpdateRequest ----------------------------------------------------

/// Everything needed to build an update.
#[derive(Clone, Debug)]
pub struct UpdateRequest {
    /// The zone the update is sent to.
    pub parent: Name<Vec<u8>>,

    /// The zone whose records change.
    pub child: Name<Vec<u8>>,

    pub payload: UpdatePayload,

    /// The TTL of added records.
    pub ttl: u32,
}

impl UpdateRequest {
    /// Build the unsigned update message.
    pub fn build(&self) -> Result<Vec<u8>, UpdateError> {
        let mut msg = MessageBuilder::new_vec();
        msg.header_mut().set_opcode(Opcode::UPDATE);
        msg.header_mut().set_random_id();

        let mut msg = msg.question();
        msg.push(Question::new(&self.parent, Rtype::SOA, Class::IN))?;

        // The prerequisite section stays empty.
        let mut msg = msg.authority();
        let ttl = Ttl::from_secs(self.ttl);
        match &self.payload {
            UpdatePayload::Delegation(diff) => push_diff(&mut msg, &self.child, diff, ttl)?,
            UpdatePayload::KeyUpload { key } => {
                push_key(&mut msg, &self.child, key, Class::IN, ttl)?;
            }
            UpdatePayload::KeyRollover { old, new } => {
                push_key(&mut msg, &self.child, old, Class::NONE, Ttl::from_secs(0))?;
                push_key(&mut msg, &self.child, new, Class::IN, ttl)?;
            }
        }

        debug!(
            "Built update for '{}' at '{}' with {} changes",
            self.child.fmt_with_dot(),
            self.parent.fmt_with_dot(),
            self.payload.len()
        );
        Ok(msg.finish())
    }

    /// Build the update and sign it with the given key.
    ///
    /// Only an active SIG(0) key with a private key signs.
    pub fn build_signed(
        &self,
        key: &KeyRecord,
        validity: SigValidity,
    ) -> Result<SignedUpdate, UpdateError> {
        let private = match &key.private {
            Some(private) if key.kind == KeyKind::Sig0 && key.state == KeyState::Active => {
                private
            }
            _ => {
                debug!(
                    "Refusing to sign with {} in state {}",
                    key.handle(),
                    key.state
                );
                return Err(UpdateError::NoSigningKey(key.owner.clone()));
            }
        };
        let message = self.build()?;
        let message = sig0::sign_message(message, private, key.keyid, &key.owner, validity)?;
        Ok(SignedUpdate {
            message,
            signer: key.owner.clone(),
            keyid: key.keyid,
        })
    }
}

/// Build an update and sign it with the child's signing key.
pub fn build_signed_update(
    request: &UpdateRequest,
    keys: &KeyStore,
    validity: SigValidity,
) -> Result<SignedUpdate, UpdateError> {
    let key = keys.signing_key(&request.child).map_err(|error| match error {
        KeyStoreError::NoSigningKey(owner) => UpdateError::NoSigningKey(owner),
        other => UpdateError::KeyStore(other),
    })?;
    request.build_signed(&key, validity)
}

fn push_diff(
    msg: &mut AuthorityBuilder<Vec<u8>>,
    child: &Name<Vec<u8>>,
    diff: &DelegationDiff,
    ttl: Ttl,
) -> Result<(), PushError> {
    let none = Ttl::from_secs(0);
    for ns in &diff.ns_remove {
        msg.push(Record::new(child, Class::NONE, none, Ns::new(ns)))?;
    }
    for (name, addr) in &diff.a_remove {
        msg.push(Record::new(name, Class::NONE, none, A::new(*addr)))?;
    }
    for (name, addr) in &diff.aaaa_remove {
        msg.push(Record::new(name, Class::NONE, none, Aaaa::new(*addr)))?;
    }
    for ns in &diff.ns_add {
        msg.push(Record::new(child, Class::IN, ttl, Ns::new(ns)))?;
    }
    for (name, addr) in &diff.a_add {
        msg.push(Record::new(name, Class::IN, ttl, A::new(*addr)))?;
    }
    for (name, addr) in &diff.aaaa_add {
        msg.push(Record::new(name, Class::IN, ttl, Aaaa::new(*addr)))?;
    }
    Ok(())
}

fn push_key(
    msg: &mut AuthorityBuilder<Vec<u8>>,
    child: &Name<Vec<u8>>,
    key: &PublicKey,
    class: Class,
    ttl: Ttl,
) -> Result<(), UpdateError> {
    let data = UnknownRecordData::from_octets(Rtype::KEY, key.to_rdata())
        .map_err(|_| UpdateError::TooLarge)?;
    msg.push(Record::new(child, class, ttl, data))?;
    Ok(())
}

//----------- SignedUpdate -----------------------------------------------------

/// A signed update ready for sending.
#[derive(Clone, Debug, Serialize)]
pub struct SignedUpdate {
    /// The message in wire format.
    #[serde(skip)]
    pub message: Vec<u8>,

    /// The owner of the signing key.
    #[serde(serialize_with = "ser_name")]
    pub signer: Name<Vec<u8>>,

    /// The key tag of the signing key.
    pub keyid: u16,
}

fn ser_name<S: serde::Serializer>(name: &Name<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&name.fmt_with_dot())
}

//----------- UpdateError ------------------------------------------------------

/// An error in building a signed update.
#[derive(Clone, Debug)]
pub enum UpdateError {
    /// The zone has no usable signing key.
    NoSigningKey(Name<Vec<u8>>),

    /// The signing key could not be looked up.
    KeyStore(KeyStoreError),

    /// Signing failed.
    Signing(SignError),

    /// The records do not fit into a message.
    TooLarge,
}

impl From<PushError> for UpdateError {
    fn from(_: PushError) -> Self {
        Self::TooLarge
    }
}

impl From<SignError> for UpdateError {
    fn from(value: SignError) -> Self {
        Self::Signing(value)
    }
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSigningKey(owner) => write!(
                f,
                "no active SIG(0) key with a private key for '{}'",
                owner.fmt_with_dot()
            ),
            Self::KeyStore(error) => error.fmt(f),
            Self::Signing(error) => error.fmt(f),
            Self::TooLarge => f.write_str("update does not fit into a DNS message"),
        }
    }
}

impl std::error::Error for UpdateError {}

//============ Tests ===========================================================
