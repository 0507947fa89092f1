//! Synchronizing a delegation with the parent.
//!
//! This ties the pieces together: read both sides of the delegation, compare
//! them and, only if they differ, find the parent's UPDATE target, build and
//! sign the update and deliver it.  Key uploads and rollovers take the same
//! route from discovery onwards.

use std::{fmt, net::SocketAddr, sync::Arc};

use domain::base::{Name, Rtype};
use log::info;
use serde::Serialize;

use crate::delegation::{self, DelegationDiff};
use crate::dsync::{self, DiscoveryError, DiscoveryRequest, DsyncTarget, Scheme};
use crate::keystore::{KeyRecord, KeyStore};
use crate::net::{
    sender::{self, SendError},
    Exchange, ServerAddr,
};
use crate::sig0::SigValidity;
use crate::snapshot::{self, ResolutionError, ResolutionFailure, Side, Snapshot};
use crate::update::{self, SignedUpdate, UpdateError, UpdatePayload, UpdateRequest};

//----------- SyncRequest ------------------------------------------------------

/// The parameters of synchronizing one delegation.
#[derive(Clone, Debug)]
pub struct SyncRequest {
    /// The child zone.
    pub zone: Name<Vec<u8>>,

    /// The parent zone.
    pub parent: Name<Vec<u8>>,

    pub child_primary: ServerAddr,

    /// The parent's primary, also used for discovery.
    pub parent_primary: ServerAddr,

    /// The TTL of added records.
    pub ttl: u32,

    /// The validity of the signature.
    pub validity: SigValidity,
}

//----------- SyncOutcome ------------------------------------------------------

/// What synchronizing a delegation did.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case", tag = "status")]
pub enum SyncOutcome {
    /// Both sides agree; nothing was sent.
    InSync,

    /// The parent accepted an update.
    Applied {
        diff: DelegationDiff,
        delivery: Delivered,
    },
}

/// An update that was accepted by the parent.
#[derive(Clone, Debug, Serialize)]
pub struct Delivered {
    /// Where the update was sent.
    pub target: DsyncTarget,

    /// The accepting server.
    pub server: SocketAddr,

    /// How many servers were tried.
    pub attempts: usize,

    /// The signature used.
    pub signed: SignedUpdate,
}

/// Compare both sides of a delegation.
pub async fn status(
    exchange: &dyn Exchange,
    zone: &Name<Vec<u8>>,
    child_primary: &ServerAddr,
    parent_primary: &ServerAddr,
) -> Result<(Snapshot, DelegationDiff), SyncError> {
    let snapshot = snapshot::read(exchange, zone, child_primary, parent_primary).await?;
    let (_, diff) = delegation::diff(&snapshot.child, &snapshot.parent);
    Ok((snapshot, diff))
}

/// Bring the parent's delegation in line with the child's.
///
/// Nothing beyond reading both sides happens if they already agree.  Once
/// the parent has accepted the update, the result is final.
pub async fn sync(
    exchange: &dyn Exchange,
    keys: &KeyStore,
    request: &SyncRequest,
) -> Result<SyncOutcome, SyncError> {
    let (_, diff) = status(
        exchange,
        &request.zone,
        &request.child_primary,
        &request.parent_primary,
    )
    .await?;
    if !diff.changed() {
        info!("Delegation of '{}' is in sync", request.zone.fmt_with_dot());
        return Ok(SyncOutcome::InSync);
    }
    info!(
        "Delegation of '{}' differs in {} records",
        request.zone.fmt_with_dot(),
        diff.len()
    );

    let update = UpdateRequest {
        parent: request.parent.clone(),
        child: request.zone.clone(),
        payload: UpdatePayload::Delegation(diff.clone()),
        ttl: request.ttl,
    };
    let delivery = deliver(
        exchange,
        keys,
        &update,
        &request.parent_primary,
        Rtype::NS,
        None,
        request.validity,
    )
    .await?;
    Ok(SyncOutcome::Applied { diff, delivery })
}

/// Find the parent's target, sign an update and send it there.
///
/// The update is signed with `signer` if given, or else with the child's
/// current signing key.
pub async fn deliver(
    exchange: &dyn Exchange,
    keys: &KeyStore,
    update: &UpdateRequest,
    parent_primary: &ServerAddr,
    trigger: Rtype,
    signer: Option<&KeyRecord>,
    validity: SigValidity,
) -> Result<Delivered, SyncError> {
    let hint = parent_primary.resolve().await.map_err(|error| {
        SyncError::Resolution(ResolutionError {
            zone: update.child.clone(),
            server: parent_primary.clone(),
            side: Side::Parent,
            cause: ResolutionFailure::Address(Arc::new(error)),
        })
    })?;
    let target = dsync::lookup_target(
        exchange,
        &DiscoveryRequest {
            child: update.child.clone(),
            parent: update.parent.clone(),
            hint,
            trigger,
            scheme: Scheme::Update,
        },
    )
    .await?;

    let signed = match signer {
        Some(key) => update.build_signed(key, validity)?,
        None => update::build_signed_update(update, keys, validity)?,
    };

    let delivery = sender::send(exchange, &signed.message, &target.candidates()).await?;
    Ok(Delivered {
        target,
        server: delivery.server,
        attempts: delivery.attempts,
        signed,
    })
}

//----------- SyncError --------------------------------------------------------

/// An error in synchronizing a delegation.
#[derive(Clone, Debug)]
pub enum SyncError {
    Resolution(ResolutionError),
    Discovery(DiscoveryError),
    Update(UpdateError),
    Send(SendError),
}

impl From<ResolutionError> for SyncError {
    fn from(value: ResolutionError) -> Self {
        Self::Resolution(value)
    }
}

impl From<DiscoveryError> for SyncError {
    fn from(value: DiscoveryError) -> Self {
        Self::Discovery(value)
    }
}

impl From<UpdateError> for SyncError {
    fn from(value: UpdateError) -> Self {
        Self::Update(value)
    }
}

impl From<SendError> for SyncError {
    fn from(value: SendError) -> Self {
        Self::Send(value)
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolution(error) => error.fmt(f),
            Self::Discovery(error) => error.fmt(f),
            Self::Update(error) => error.fmt(f),
            Self::Send(error) => error.fmt(f),
        }
    }
}

impl std::error::Error for SyncError {}

//============ Tests ===========================================================
