//! Operations offered by delsync.
//!
//! Every request is an [`Operation`] carrying its parameters.  The
//! [`Engine`] executes it against the network and the key store and reports
//! a typed [`OperationResult`], which the command line client wraps into a
//! [`Response`] for printing.

use std::{fmt, sync::Arc};

use domain::base::{Name, Rtype, ToName};
use log::{info, warn};
use serde::Serialize;

use crate::config::Config;
use crate::delegation::DelegationDiff;
use crate::dsync::{self, DiscoveryError, DiscoveryRequest, DsyncTarget, Scheme};
use crate::keystore::{
    Evidence, KeyHandle, KeyInfo, KeyKind, KeySource, KeyState, KeyStore, KeyStoreError,
};
use crate::net::{Exchange, ServerAddr, UdpTcpTransport};
use crate::sig0::{bind, Algorithm, SigValidity};
use crate::snapshot::{ResolutionError, ResolutionFailure, Side};
use crate::sync::{self, Delivered, SyncError, SyncOutcome, SyncRequest};
use crate::update::{UpdatePayload, UpdateRequest};

//----------- Operation --------------------------------------------------------

/// A request to delsync.
#[derive(Clone, Debug)]
pub enum Operation {
    /// Compare the child's delegation with the parent's.
    DelegationStatus(ZoneParams),

    /// Send the parent an update if the delegation differs.
    DelegationSync(ZoneParams),

    /// Look up the parent's DSYNC target.
    DsyncQuery {
        zone: ZoneParams,
        trigger: Rtype,
        scheme: Scheme,
    },

    /// Publish a child's SIG(0) key at the parent.
    ///
    /// Without a key tag, the current signing key is uploaded.  The update
    /// is signed with the zone's active signing key, so a new key can be
    /// published before it becomes active.
    KeyUpload { zone: ZoneParams, keyid: Option<u16> },

    /// Replace the child's SIG(0) key at the parent.
    ///
    /// The update is signed with the old key, which must still be active.
    /// Once the parent accepted it, the new key becomes active and the old
    /// one retired.
    KeyRollover {
        zone: ZoneParams,
        old: u16,
        new: u16,
    },

    /// Generate a key pair.
    KeyGenerate {
        owner: Name<Vec<u8>>,
        algorithm: Algorithm,
        kind: KeyKind,
    },

    /// Import a key pair from BIND key files.
    KeyImport { public: String, private: String },

    /// List our own keys, optionally only those of one owner.
    KeyList { owner: Option<Name<Vec<u8>>> },

    KeyDelete(KeyHandle),

    KeySetState { key: KeyHandle, state: KeyState },

    /// Show the public record of a key for publication.
    KeyExport(KeyHandle),

    /// List the keys of others.
    TrustList,

    /// Trust a key, validating it first if a signed message is given.
    Trust {
        key: KeyHandle,
        evidence: Option<Vec<u8>>,
    },

    Untrust(KeyHandle),

    /// Add someone else's public key, validating it if a signed message is
    /// given.
    TrustImport {
        public: String,
        evidence: Option<Vec<u8>>,
    },
}

impl Operation {
    /// A short name for log messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::DelegationStatus(_) => "delegation status",
            Self::DelegationSync(_) => "delegation sync",
            Self::DsyncQuery { .. } => "DSYNC query",
            Self::KeyUpload { .. } => "key upload",
            Self::KeyRollover { .. } => "key rollover",
            Self::KeyGenerate { .. } => "key generation",
            Self::KeyImport { .. } => "key import",
            Self::KeyList { .. } => "key list",
            Self::KeyDelete(_) => "key deletion",
            Self::KeySetState { .. } => "key state change",
            Self::KeyExport(_) => "key export",
            Self::TrustList => "trust list",
            Self::Trust { .. } => "trust",
            Self::Untrust(_) => "untrust",
            Self::TrustImport { .. } => "trust import",
        }
    }
}

//----------- ZoneParams -------------------------------------------------------

/// The zone an operation works on.
///
/// Anything left out is taken from the zone's configuration.
#[derive(Clone, Debug)]
pub struct ZoneParams {
    pub zone: Name<Vec<u8>>,
    pub parent: Option<Name<Vec<u8>>>,
    pub child_primary: Option<ServerAddr>,
    pub parent_primary: Option<ServerAddr>,
}

impl ZoneParams {
    /// Parameters naming only the zone.
    pub fn new(zone: Name<Vec<u8>>) -> Self {
        Self {
            zone,
            parent: None,
            child_primary: None,
            parent_primary: None,
        }
    }
}

/// Zone parameters with the configuration applied.
struct Zone {
    name: Name<Vec<u8>>,
    parent: Name<Vec<u8>>,
    child_primary: Option<ServerAddr>,
    parent_primary: Option<ServerAddr>,
}

impl Zone {
    fn child_primary(&self) -> Result<&ServerAddr, OperationError> {
        self.child_primary
            .as_ref()
            .ok_or_else(|| OperationError::MissingSetting {
                zone: self.name.clone(),
                setting: "child primary",
            })
    }

    fn parent_primary(&self) -> Result<&ServerAddr, OperationError> {
        self.parent_primary
            .as_ref()
            .ok_or_else(|| OperationError::MissingSetting {
                zone: self.name.clone(),
                setting: "parent primary",
            })
    }
}

//----------- OperationResult --------------------------------------------------

/// What an operation produced.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationResult {
    /// The difference between both sides of a delegation.
    Status {
        zone: String,
        in_sync: bool,
        diff: DelegationDiff,
    },

    Sync(SyncOutcome),

    Dsync(DsyncTarget),

    Upload(Delivered),

    Rollover {
        delivery: Delivered,

        /// Whether the key states were switched after the parent accepted.
        states_updated: bool,
    },

    Key(KeyInfo),

    Keys(Vec<KeyInfo>),

    Exported {
        /// The base name of BIND key files for the key.
        stem: String,

        /// The public record in presentation format.
        record: String,
    },

    Deleted(KeyInfo),
}

//----------- Response ---------------------------------------------------------

/// The outcome of an operation as reported to the user.
#[derive(Clone, Debug, Serialize)]
pub struct Response {
    pub error: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<OperationResult>,
}

impl From<Result<OperationResult, OperationError>> for Response {
    fn from(value: Result<OperationResult, OperationError>) -> Self {
        match value {
            Ok(result) => Self {
                error: false,
                error_msg: None,
                result: Some(result),
            },
            Err(error) => Self {
                error: true,
                error_msg: Some(error.to_string()),
                result: None,
            },
        }
    }
}

//----------- Engine -----------------------------------------------------------

/// Executes operations.
pub struct Engine {
    exchange: Arc<dyn Exchange>,
    keys: KeyStore,
    config: Config,
}

impl Engine {
    pub fn new(config: Config, exchange: Arc<dyn Exchange>, keys: KeyStore) -> Self {
        Self {
            exchange,
            keys,
            config,
        }
    }

    /// Set up an engine talking to real name servers.
    pub fn launch(config: Config) -> Result<Self, OperationError> {
        let keys = KeyStore::open(config.keystore_path.value())?;
        let exchange = Arc::new(UdpTcpTransport::new(*config.network.query_timeout.value()));
        Ok(Self::new(config, exchange, keys))
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Execute an operation and wrap the outcome for reporting.
    pub async fn run(&self, operation: Operation) -> Response {
        let name = operation.name();
        let result = self.execute(operation).await;
        if let Err(error) = &result {
            warn!("The {name} failed: {error}");
        }
        result.into()
    }

    /// Execute an operation.
    pub async fn execute(&self, operation: Operation) -> Result<OperationResult, OperationError> {
        let exchange = &*self.exchange;
        match operation {
            Operation::DelegationStatus(params) => {
                let zone = self.zone(params);
                let (_, diff) = sync::status(
                    exchange,
                    &zone.name,
                    zone.child_primary()?,
                    zone.parent_primary()?,
                )
                .await?;
                let result = Ok(OperationResult::Status {
                    zone: zone.name.fmt_with_dot().to_string(),
                    in_sync: !diff.changed(),
                    diff,
                });
                result
            }

            Operation::DelegationSync(params) => {
                let zone = self.zone(params);
                let request = SyncRequest {
                    child_primary: zone.child_primary()?.clone(),
                    parent_primary: zone.parent_primary()?.clone(),
                    zone: zone.name,
                    parent: zone.parent,
                    ttl: *self.config.signer.update_ttl.value(),
                    validity: self.validity(),
                };
                let outcome = sync::sync(exchange, &self.keys, &request).await?;
                Ok(OperationResult::Sync(outcome))
            }

            Operation::DsyncQuery {
                zone,
                trigger,
                scheme,
            } => {
                let zone = self.zone(zone);
                let parent_primary = zone.parent_primary()?;
                let hint = parent_primary.resolve().await.map_err(|error| {
                    OperationError::Resolution(ResolutionError {
                        zone: zone.name.clone(),
                        server: parent_primary.clone(),
                        side: Side::Parent,
                        cause: ResolutionFailure::Address(Arc::new(error)),
                    })
                })?;
                let target = dsync::lookup_target(
                    exchange,
                    &DiscoveryRequest {
                        child: zone.name.clone(),
                        parent: zone.parent.clone(),
                        hint,
                        trigger,
                        scheme,
                    },
                )
                .await?;
                Ok(OperationResult::Dsync(target))
            }

            Operation::KeyUpload { zone, keyid } => {
                let zone = self.zone(zone);
                let key = match keyid {
                    Some(keyid) => self.keys.get(&KeyHandle::new(&zone.name, keyid))?,
                    None => self.keys.signing_key(&zone.name)?,
                };
                if key.kind != KeyKind::Sig0 {
                    return Err(OperationError::NotSig0(key.handle()));
                }
                let update = UpdateRequest {
                    parent: zone.parent.clone(),
                    child: zone.name.clone(),
                    payload: UpdatePayload::KeyUpload {
                        key: key.public.clone(),
                    },
                    ttl: *self.config.signer.update_ttl.value(),
                };
                let delivery = sync::deliver(
                    exchange,
                    &self.keys,
                    &update,
                    zone.parent_primary()?,
                    Rtype::KEY,
                    None,
                    self.validity(),
                )
                .await?;
                info!("Uploaded {} to '{}'", key.handle(), zone.parent.fmt_with_dot());
                Ok(OperationResult::Upload(delivery))
            }

            Operation::KeyRollover { zone, old, new } => {
                let zone = self.zone(zone);
                let old = self.keys.get(&KeyHandle::new(&zone.name, old))?;
                let new = self.keys.get(&KeyHandle::new(&zone.name, new))?;
                for key in [&old, &new] {
                    if key.kind != KeyKind::Sig0 {
                        return Err(OperationError::NotSig0(key.handle()));
                    }
                }
                let update = UpdateRequest {
                    parent: zone.parent.clone(),
                    child: zone.name.clone(),
                    payload: UpdatePayload::KeyRollover {
                        old: old.public.clone(),
                        new: new.public.clone(),
                    },
                    ttl: *self.config.signer.update_ttl.value(),
                };
                let delivery = sync::deliver(
                    exchange,
                    &self.keys,
                    &update,
                    zone.parent_primary()?,
                    Rtype::KEY,
                    Some(&old),
                    self.validity(),
                )
                .await?;

                // The parent has the new key now.  Failing to record that
                // locally must not turn the rollover into an error.
                let states_updated = match self
                    .keys
                    .set_state(&new.handle(), KeyState::Active)
                    .and_then(|()| self.keys.set_state(&old.handle(), KeyState::Retired))
                {
                    Ok(()) => true,
                    Err(error) => {
                        warn!("Rollover accepted but key states not updated: {error}");
                        false
                    }
                };
                Ok(OperationResult::Rollover {
                    delivery,
                    states_updated,
                })
            }

            Operation::KeyGenerate {
                owner,
                algorithm,
                kind,
            } => {
                let handle = self.keys.generate(&owner, algorithm, kind)?;
                self.keys.validate(&handle, Evidence::SelfTest)?;
                Ok(OperationResult::Key(self.keys.get(&handle)?.info()))
            }

            Operation::KeyImport { public, private } => {
                let handle = self.keys.import(&public, Some(&private))?;
                self.keys.validate(&handle, Evidence::SelfTest)?;
                Ok(OperationResult::Key(self.keys.get(&handle)?.info()))
            }

            Operation::KeyList { owner } => {
                let owner = owner.as_ref().map(crate::delegation::normalize);
                let keys = self
                    .keys
                    .list()
                    .into_iter()
                    .filter(|key| key.source != KeySource::Foreign)
                    .filter(|key| owner.as_ref().map_or(true, |owner| key.owner == *owner))
                    .map(|key| key.info())
                    .collect();
                Ok(OperationResult::Keys(keys))
            }

            Operation::KeyDelete(handle) => {
                let removed = self.keys.delete(&handle)?;
                Ok(OperationResult::Deleted(removed.info()))
            }

            Operation::KeySetState { key, state } => {
                self.keys.set_state(&key, state)?;
                Ok(OperationResult::Key(self.keys.get(&key)?.info()))
            }

            Operation::KeyExport(handle) => {
                let key = self.keys.get(&handle)?;
                Ok(OperationResult::Exported {
                    stem: bind::file_stem(&key.owner, key.algorithm(), key.keyid),
                    record: key.public_record().to_string(),
                })
            }

            Operation::TrustList => {
                let keys = self
                    .keys
                    .list()
                    .into_iter()
                    .filter(|key| key.source == KeySource::Foreign)
                    .map(|key| key.info())
                    .collect();
                Ok(OperationResult::Keys(keys))
            }

            Operation::Trust { key, evidence } => {
                if let Some(message) = &evidence {
                    self.keys.validate(
                        &key,
                        Evidence::SignedMessage {
                            message,
                            now: now(),
                        },
                    )?;
                }
                self.keys.set_trust(&key, true)?;
                Ok(OperationResult::Key(self.keys.get(&key)?.info()))
            }

            Operation::Untrust(key) => {
                self.keys.set_trust(&key, false)?;
                Ok(OperationResult::Key(self.keys.get(&key)?.info()))
            }

            Operation::TrustImport { public, evidence } => {
                let handle = self.keys.import(&public, None)?;
                if let Some(message) = &evidence {
                    self.keys.validate(
                        &handle,
                        Evidence::SignedMessage {
                            message,
                            now: now(),
                        },
                    )?;
                }
                Ok(OperationResult::Key(self.keys.get(&handle)?.info()))
            }
        }
    }

    /// Fill in zone parameters from the configuration.
    fn zone(&self, params: ZoneParams) -> Zone {
        let config = self.config.zone(&params.zone);
        let parent = params
            .parent
            .or_else(|| config.and_then(|zone| zone.parent.clone()))
            .unwrap_or_else(|| next_label_up(&params.zone));
        Zone {
            child_primary: params
                .child_primary
                .or_else(|| config.and_then(|zone| zone.child_primary.clone())),
            parent_primary: params
                .parent_primary
                .or_else(|| config.and_then(|zone| zone.parent_primary.clone())),
            name: params.zone,
            parent,
        }
    }

    /// The validity of signatures made now.
    fn validity(&self) -> SigValidity {
        let slack = self.config.signer.sig_validity.value();
        let slack = u32::try_from(slack.as_secs()).unwrap_or(u32::MAX);
        SigValidity::around(now(), slack)
    }
}

/// The current time in seconds since the epoch.
fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The zone one label up, or the root for the root.
fn next_label_up(zone: &Name<Vec<u8>>) -> Name<Vec<u8>> {
    match zone.parent() {
        Some(parent) => parent.to_name(),
        None => Name::root_vec(),
    }
}

//----------- OperationError ---------------------------------------------------

/// An error in executing an operation.
#[derive(Clone, Debug)]
pub enum OperationError {
    /// A setting needed for the zone was neither given nor configured.
    MissingSetting {
        zone: Name<Vec<u8>>,
        setting: &'static str,
    },

    /// The key is not a SIG(0) key.
    NotSig0(KeyHandle),

    Resolution(ResolutionError),
    Discovery(DiscoveryError),
    Sync(SyncError),
    KeyStore(KeyStoreError),
}

impl From<ResolutionError> for OperationError {
    fn from(value: ResolutionError) -> Self {
        Self::Resolution(value)
    }
}

impl From<DiscoveryError> for OperationError {
    fn from(value: DiscoveryError) -> Self {
        Self::Discovery(value)
    }
}

impl From<SyncError> for OperationError {
    fn from(value: SyncError) -> Self {
        Self::Sync(value)
    }
}

impl From<KeyStoreError> for OperationError {
    fn from(value: KeyStoreError) -> Self {
        Self::KeyStore(value)
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSetting { zone, setting } => write!(
                f,
                "no {setting} given or configured for '{}'",
                zone.fmt_with_dot()
            ),
            Self::NotSig0(handle) => write!(f, "{handle} is not a SIG(0) key"),
            Self::Resolution(error) => error.fmt(f),
            Self::Discovery(error) => error.fmt(f),
            Self::Sync(error) => error.fmt(f),
            Self::KeyStore(error) => error.fmt(f),
        }
    }
}

impl std::error::Error for OperationError {}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;

    use domain::base::iana::{Opcode, Rcode};

    use crate::config::ZoneConfig;

    use crate::dsync::{dsync_rtype, DsyncRecord};
    use crate::net::ExchangeError;
    use crate::sig0::{self, SecretKey, ZONE_KEY_FLAG};
    use crate::tests::util::{question, respond, MockExchange, Rr};

    use super::*;

    const CHILD: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 10);
    const PARENT: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 20);
    const TARGET: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 53);

    fn name(s: &str) -> Name<Vec<u8>> {
        s.parse().unwrap()
    }

    fn addr(ip: Ipv4Addr) -> ServerAddr {
        ServerAddr::from(SocketAddr::new(ip.into(), 53))
    }

    /// A configuration knowing the primaries of child.example.
    fn config() -> Config {
        let mut config = Config::default();
        config.zones.push(ZoneConfig {
            name: name("child.example."),
            parent: None,
            child_primary: Some(addr(CHILD)),
            parent_primary: Some(addr(PARENT)),
        });
        config
    }

    /// A child with ns1 and ns2, a parent delegating to ns1 only and
    /// announcing update.example as target for NS and KEY updates.
    fn network() -> Arc<MockExchange> {
        Arc::new(MockExchange::new(|server, req| {
            if req.header().opcode() == Opcode::UPDATE {
                return Ok(MockExchange::reply(req, Rcode::NOERROR));
            }
            let (qname, qtype) = question(req);
            let qname = qname.to_string();
            let glue = Rr::A("ns1.child.example.", Ipv4Addr::new(192, 0, 2, 1));
            match server.ip() {
                IpAddr::V4(ip) if ip == CHILD => {
                    let answer: Vec<Rr> = match (qname.as_str(), qtype) {
                        ("child.example", Rtype::NS) => vec![
                            Rr::Ns("child.example.", "ns1.child.example."),
                            Rr::Ns("child.example.", "ns2.example.net."),
                        ],
                        ("ns1.child.example", Rtype::A) => vec![glue],
                        _ => vec![],
                    };
                    Ok(respond(req, Rcode::NOERROR, true, &answer, &[], &[]))
                }
                IpAddr::V4(ip) if ip == PARENT => {
                    if qtype == Rtype::NS {
                        let authority = [Rr::Ns("child.example.", "ns1.child.example.")];
                        return Ok(respond(req, Rcode::NOERROR, false, &[], &authority, &[glue]));
                    }
                    let answer: Vec<Rr> = match (qname.as_str(), qtype) {
                        ("_dsync.example", _) => [Rtype::NS, Rtype::KEY]
                            .into_iter()
                            .map(|rrtype| {
                                Rr::Other(
                                    "_dsync.example.",
                                    dsync_rtype(),
                                    DsyncRecord {
                                        rrtype,
                                        scheme: 2,
                                        port: 53,
                                        target: name("update.example."),
                                    }
                                    .to_rdata(),
                                )
                            })
                            .collect(),
                        ("update.example", Rtype::A) => vec![Rr::A("update.example.", TARGET)],
                        _ => vec![],
                    };
                    Ok(respond(req, Rcode::NOERROR, true, &answer, &[], &[]))
                }
                _ => Err(ExchangeError::Timeout(Duration::from_secs(5))),
            }
        }))
    }

    fn engine(mock: &Arc<MockExchange>) -> Engine {
        Engine::new(config(), mock.clone(), KeyStore::in_memory())
    }

    /// Generate an active SIG(0) key for child.example.
    async fn active_key(engine: &Engine) -> KeyHandle {
        let Ok(OperationResult::Key(info)) = engine
            .execute(Operation::KeyGenerate {
                owner: name("child.example."),
                algorithm: Algorithm::Ed25519,
                kind: KeyKind::Sig0,
            })
            .await
        else {
            panic!("key generation failed");
        };
        assert!(info.validated);
        let handle = KeyHandle::new(&name("child.example."), info.keyid);
        engine
            .execute(Operation::KeySetState {
                key: handle.clone(),
                state: KeyState::Active,
            })
            .await
            .unwrap();
        handle
    }

    #[tokio::test]
    async fn status_uses_configured_primaries() {
        let mock = network();
        let engine = engine(&mock);

        let result = engine
            .execute(Operation::DelegationStatus(ZoneParams::new(name(
                "child.example.",
            ))))
            .await
            .unwrap();
        let OperationResult::Status { in_sync, diff, .. } = result else {
            panic!("unexpected result");
        };
        assert!(!in_sync);
        assert_eq!(diff.ns_add, vec![name("ns2.example.net.")]);
        assert_eq!(mock.count_opcode(Opcode::UPDATE), 0);
        assert_eq!(mock.count_qtype(dsync_rtype()), 0);
    }

    #[tokio::test]
    async fn missing_primary_is_reported() {
        let mock = network();
        let engine = engine(&mock);

        let response = engine
            .run(Operation::DelegationSync(ZoneParams::new(name(
                "other.example.",
            ))))
            .await;
        assert!(response.error);
        assert!(response.result.is_none());
        assert_eq!(
            response.error_msg.as_deref(),
            Some("no child primary given or configured for 'other.example.'")
        );
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn dsync_query_reports_the_target() {
        let mock = network();
        let engine = engine(&mock);

        let result = engine
            .execute(Operation::DsyncQuery {
                zone: ZoneParams::new(name("child.example.")),
                trigger: Rtype::KEY,
                scheme: Scheme::Update,
            })
            .await
            .unwrap();
        let OperationResult::Dsync(target) = result else {
            panic!("unexpected result");
        };
        assert_eq!(target.name, name("update.example."));
        assert_eq!(target.addrs, vec![IpAddr::from(TARGET)]);
    }

    #[tokio::test]
    async fn sync_sends_signed_update() {
        let mock = network();
        let engine = engine(&mock);
        let handle = active_key(&engine).await;

        let response = engine
            .run(Operation::DelegationSync(ZoneParams::new(name(
                "child.example.",
            ))))
            .await;
        assert!(!response.error);
        let Some(OperationResult::Sync(SyncOutcome::Applied { delivery, .. })) = response.result
        else {
            panic!("expected an update");
        };
        assert_eq!(delivery.signed.keyid, handle.keyid);
        assert_eq!(mock.count_opcode(Opcode::UPDATE), 1);

        let json = serde_json::to_value(
            &Response::from(Ok::<_, OperationError>(OperationResult::Sync(
                SyncOutcome::InSync,
            ))),
        )
        .unwrap();
        assert_eq!(json["error"], false);
        assert!(json.get("error_msg").is_none());
    }

    #[tokio::test]
    async fn rollover_switches_states() {
        let mock = network();
        let engine = engine(&mock);
        let old = active_key(&engine).await;
        let Ok(OperationResult::Key(new)) = engine
            .execute(Operation::KeyGenerate {
                owner: name("child.example."),
                algorithm: Algorithm::EcdsaP256Sha256,
                kind: KeyKind::Sig0,
            })
            .await
        else {
            panic!("key generation failed");
        };

        let result = engine
            .execute(Operation::KeyRollover {
                zone: ZoneParams::new(name("child.example.")),
                old: old.keyid,
                new: new.keyid,
            })
            .await
            .unwrap();
        let OperationResult::Rollover {
            delivery,
            states_updated,
        } = result
        else {
            panic!("unexpected result");
        };
        assert!(states_updated);
        assert_eq!(delivery.signed.keyid, old.keyid);

        let (_, sent) = mock.requests().pop().unwrap();
        let old_key = engine.keys().get(&old).unwrap();
        sig0::verify_message(&sent, &old_key.public, now()).unwrap();

        assert_eq!(old_key.state, KeyState::Retired);
        let new_handle = KeyHandle::new(&name("child.example."), new.keyid);
        assert_eq!(
            engine.keys().get(&new_handle).unwrap().state,
            KeyState::Active
        );
        assert_eq!(
            engine.keys().signing_key(&name("child.example.")).unwrap().keyid,
            new.keyid
        );
    }

    #[tokio::test]
    async fn upload_needs_a_signing_key() {
        let mock = network();
        let engine = engine(&mock);

        let response = engine
            .run(Operation::KeyUpload {
                zone: ZoneParams::new(name("child.example.")),
                keyid: None,
            })
            .await;
        assert!(response.error);
        assert!(mock.calls().is_empty());

        active_key(&engine).await;
        let result = engine
            .execute(Operation::KeyUpload {
                zone: ZoneParams::new(name("child.example.")),
                keyid: None,
            })
            .await
            .unwrap();
        assert!(matches!(result, OperationResult::Upload(_)));
        assert_eq!(mock.count_opcode(Opcode::UPDATE), 1);
    }

    #[tokio::test]
    async fn new_key_is_uploaded_under_the_active_key() {
        let mock = network();
        let engine = engine(&mock);
        let Ok(OperationResult::Key(new)) = engine
            .execute(Operation::KeyGenerate {
                owner: name("child.example."),
                algorithm: Algorithm::Ed25519,
                kind: KeyKind::Sig0,
            })
            .await
        else {
            panic!("key generation failed");
        };
        let upload = Operation::KeyUpload {
            zone: ZoneParams::new(name("child.example.")),
            keyid: Some(new.keyid),
        };

        // A created key cannot vouch for itself.
        let response = engine.run(upload.clone()).await;
        assert!(response.error);
        assert_eq!(mock.count_opcode(Opcode::UPDATE), 0);

        let active = active_key(&engine).await;
        let Ok(OperationResult::Upload(delivery)) = engine.execute(upload).await else {
            panic!("upload failed");
        };
        assert_eq!(delivery.signed.keyid, active.keyid);
        assert_eq!(mock.count_opcode(Opcode::UPDATE), 1);
    }

    #[tokio::test]
    async fn rollover_from_retired_key_is_refused() {
        let mock = network();
        let engine = engine(&mock);
        let old = active_key(&engine).await;
        let new = active_key(&engine).await;
        engine.keys().set_state(&old, KeyState::Retired).unwrap();

        let response = engine
            .run(Operation::KeyRollover {
                zone: ZoneParams::new(name("child.example.")),
                old: old.keyid,
                new: new.keyid,
            })
            .await;
        assert!(response.error);
        assert_eq!(mock.count_opcode(Opcode::UPDATE), 0);
        assert_eq!(engine.keys().get(&old).unwrap().state, KeyState::Retired);
    }

    #[tokio::test]
    async fn foreign_keys_need_evidence_for_trust() {
        let mock = network();
        let engine = engine(&mock);

        let secret = SecretKey::generate(Algorithm::Ed25519).unwrap();
        let record = bind::PublicRecord {
            owner: name("peer.example."),
            rtype: Rtype::KEY,
            key: secret.public_key(ZONE_KEY_FLAG),
        };
        let Ok(OperationResult::Key(info)) = engine
            .execute(Operation::TrustImport {
                public: record.to_string(),
                evidence: None,
            })
            .await
        else {
            panic!("import failed");
        };
        assert_eq!(info.source, KeySource::Foreign);
        assert!(!info.validated);
        let handle = KeyHandle::new(&name("peer.example."), info.keyid);

        let response = engine
            .run(Operation::Trust {
                key: handle.clone(),
                evidence: None,
            })
            .await;
        assert!(response.error);

        let signed = sig0::sign_message(
            MockExchange::update(),
            &secret,
            info.keyid,
            &name("peer.example."),
            SigValidity::around(now(), 300),
        )
        .unwrap();
        let Ok(OperationResult::Key(info)) = engine
            .execute(Operation::Trust {
                key: handle.clone(),
                evidence: Some(signed),
            })
            .await
        else {
            panic!("trust failed");
        };
        assert!(info.validated && info.trusted);

        let Ok(OperationResult::Keys(foreign)) = engine.execute(Operation::TrustList).await else {
            panic!("listing failed");
        };
        assert_eq!(foreign.len(), 1);
        let Ok(OperationResult::Keys(owned)) = engine
            .execute(Operation::KeyList { owner: None })
            .await
        else {
            panic!("listing failed");
        };
        assert!(owned.is_empty());

        let Ok(OperationResult::Key(info)) = engine.execute(Operation::Untrust(handle)).await
        else {
            panic!("untrust failed");
        };
        assert!(info.validated && !info.trusted);
    }

    #[tokio::test]
    async fn export_and_delete() {
        let mock = network();
        let engine = engine(&mock);
        let handle = active_key(&engine).await;

        let Ok(OperationResult::Exported { stem, record }) =
            engine.execute(Operation::KeyExport(handle.clone())).await
        else {
            panic!("export failed");
        };
        assert_eq!(stem, format!("Kchild.example.+015+{:05}", handle.keyid));
        assert!(record.starts_with("child.example. IN KEY 256 3 15 "));

        engine
            .execute(Operation::KeyDelete(handle.clone()))
            .await
            .unwrap();
        let response = engine.run(Operation::KeyDelete(handle.clone())).await;
        assert_eq!(
            response.error_msg,
            Some(format!("{handle} does not exist"))
        );
    }

    #[test]
    fn parent_defaults_to_next_label_up() {
        assert_eq!(next_label_up(&name("child.example.")), name("example."));
        assert_eq!(next_label_up(&name("example.")), Name::root_vec());
        assert_eq!(next_label_up(&Name::root_vec()), Name::root_vec());
    }
}
