//! Discovering where to send updates for a child zone.
//!
//! A parent announces the servers accepting NOTIFY or UPDATE messages from
//! its children in DSYNC records (RFC 9859).  They are published either for
//! a specific child at `<child labels>._dsync.<parent>` or for all children
//! at `_dsync.<parent>`.

use std::{
    fmt, io,
    net::{IpAddr, SocketAddr},
    str::FromStr,
};

use domain::base::{iana::Rcode, Message, Name, Rtype, ToName, UnknownRecordData};
use domain::rdata::{Aaaa, A};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::net::{query_message, Exchange, ExchangeError};

/// The record type number of DSYNC.
const DSYNC_TYPE: u16 = 66;

/// The DSYNC record type.
pub fn dsync_rtype() -> Rtype {
    Rtype::from_int(DSYNC_TYPE)
}

//----------- Scheme -----------------------------------------------------------

/// How a child reaches the parent.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Send a NOTIFY message.
    Notify,

    /// Send an UPDATE message.
    Update,
}

impl Scheme {
    pub const fn to_int(self) -> u8 {
        match self {
            Self::Notify => 1,
            Self::Update => 2,
        }
    }

    pub const fn from_int(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Notify),
            2 => Some(Self::Update),
            _ => None,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Notify => "NOTIFY",
            Self::Update => "UPDATE",
        })
    }
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(scheme) = s.parse::<u8>().ok().and_then(Self::from_int) {
            return Ok(scheme);
        }
        match s.to_ascii_lowercase().as_str() {
            "notify" => Ok(Self::Notify),
            "update" => Ok(Self::Update),
            _ => Err(format!("unknown scheme {s:?}, expected notify or update")),
        }
    }
}

//----------- DsyncRecord ------------------------------------------------------

/// The data of a DSYNC record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DsyncRecord {
    /// The record type whose change triggers a message.
    pub rrtype: Rtype,

    /// The raw scheme number.
    pub scheme: u8,

    pub port: u16,

    /// The server to send the message to.
    pub target: Name<Vec<u8>>,
}

impl DsyncRecord {
    /// Parse record data.
    ///
    /// The target name must not be compressed.
    pub fn parse(rdata: &[u8]) -> Option<Self> {
        if rdata.len() < 6 {
            return None;
        }
        Some(Self {
            rrtype: Rtype::from_int(u16::from_be_bytes([rdata[0], rdata[1]])),
            scheme: rdata[2],
            port: u16::from_be_bytes([rdata[3], rdata[4]]),
            target: Name::from_octets(rdata[5..].to_vec()).ok()?,
        })
    }

    /// Whether this record announces the given trigger and scheme.
    pub fn matches(&self, trigger: Rtype, scheme: Scheme) -> bool {
        self.rrtype == trigger && self.scheme == scheme.to_int()
    }

    /// Compose the record data.
    pub fn to_rdata(&self) -> Vec<u8> {
        let mut rdata = Vec::with_capacity(5 + self.target.as_slice().len());
        rdata.extend_from_slice(&self.rrtype.to_int().to_be_bytes());
        rdata.push(self.scheme);
        rdata.extend_from_slice(&self.port.to_be_bytes());
        rdata.extend_from_slice(self.target.as_slice());
        rdata
    }
}

//----------- DsyncTarget ------------------------------------------------------

/// Where to send messages for a child zone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DsyncTarget {
    /// The name of the target server.
    #[serde(serialize_with = "ser_name")]
    pub name: Name<Vec<u8>>,

    /// The addresses of the target, IPv4 first, in the order received.
    pub addrs: Vec<IpAddr>,

    pub port: u16,

    /// The triggers this target accepts for the requested scheme.
    #[serde(serialize_with = "ser_entries")]
    pub entries: Vec<(Rtype, Scheme)>,

    /// The owner the DSYNC records were found at.
    #[serde(serialize_with = "ser_name")]
    pub owner: Name<Vec<u8>>,
}

impl DsyncTarget {
    /// The socket addresses to try, in order.
    pub fn candidates(&self) -> Vec<SocketAddr> {
        self.addrs
            .iter()
            .map(|addr| SocketAddr::new(*addr, self.port))
            .collect()
    }
}

fn ser_name<S: serde::Serializer>(name: &Name<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&name.fmt_with_dot())
}

fn ser_entries<S: serde::Serializer>(entries: &[(Rtype, Scheme)], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(
        entries
            .iter()
            .map(|(rtype, scheme)| format!("{rtype} {scheme}")),
    )
}

//----------- DiscoveryRequest -------------------------------------------------

/// What to look up.
#[derive(Clone, Debug)]
pub struct DiscoveryRequest {
    /// The child zone.
    pub child: Name<Vec<u8>>,

    /// The parent zone publishing the DSYNC records.
    pub parent: Name<Vec<u8>>,

    /// The server to query.
    pub hint: SocketAddr,

    /// The record type the message is about.
    pub trigger: Rtype,

    pub scheme: Scheme,
}

impl DiscoveryRequest {
    /// The owners to look for DSYNC records at, most specific first.
    pub fn owners(&self) -> Vec<Name<Vec<u8>>> {
        let general = format!("_dsync.{}", self.parent.fmt_with_dot());
        let mut owners = Vec::with_capacity(2);
        if self.child.ends_with(&self.parent) && self.child != self.parent {
            if let Ok(relative) = self.child.clone().strip_suffix(&self.parent) {
                if let Ok(owner) = format!("{relative}.{general}").parse() {
                    owners.push(owner);
                }
            }
        }
        if let Ok(owner) = general.parse() {
            owners.push(owner);
        }
        owners
    }
}

/// Find the target for a child zone.
///
/// The first DSYNC record matching both trigger and scheme wins.  The
/// child-specific owner is consulted first; if it has no matching record,
/// the general owner is tried.
pub async fn lookup_target(
    exchange: &dyn Exchange,
    request: &DiscoveryRequest,
) -> Result<DsyncTarget, DiscoveryError> {
    for owner in request.owners() {
        let records = query_dsync(exchange, &owner, request.hint).await?;
        let Some(winner) = records
            .iter()
            .find(|record| record.matches(request.trigger, request.scheme))
        else {
            debug!(
                "No DSYNC record for {} {} at '{}'",
                request.trigger,
                request.scheme,
                owner.fmt_with_dot()
            );
            continue;
        };

        let entries = records
            .iter()
            .filter(|record| {
                record.scheme == request.scheme.to_int()
                    && record.target == winner.target
                    && record.port == winner.port
            })
            .map(|record| (record.rrtype, request.scheme))
            .collect();

        let addrs = resolve(exchange, request, &winner.target).await?;
        if addrs.is_empty() {
            return Err(DiscoveryError::NoTarget {
                zone: request.child.clone(),
                reason: NoTargetReason::NoAddresses(winner.target.clone()),
            });
        }

        info!(
            "Found {} target '{}' port {} for '{}' at '{}'",
            request.scheme,
            winner.target.fmt_with_dot(),
            winner.port,
            request.child.fmt_with_dot(),
            owner.fmt_with_dot()
        );
        return Ok(DsyncTarget {
            name: winner.target.clone(),
            addrs,
            port: winner.port,
            entries,
            owner,
        });
    }

    Err(DiscoveryError::NoTarget {
        zone: request.child.clone(),
        reason: NoTargetReason::NoMatchingEntry {
            trigger: request.trigger,
            scheme: request.scheme,
        },
    })
}

/// Query the DSYNC records at an owner.
///
/// A name without DSYNC records yields an empty list.
async fn query_dsync(
    exchange: &dyn Exchange,
    owner: &Name<Vec<u8>>,
    server: SocketAddr,
) -> Result<Vec<DsyncRecord>, DiscoveryError> {
    let response = query(exchange, owner, dsync_rtype(), server).await?;
    let mut records = Vec::new();
    for record in response
        .answer()
        .map_err(|_| query_error(owner, server, QueryFailure::Malformed))?
    {
        let record = record.map_err(|_| query_error(owner, server, QueryFailure::Malformed))?;
        if record.rtype() != dsync_rtype() {
            continue;
        }
        let Ok(Some(record)) = record.to_record::<UnknownRecordData<&[u8]>>() else {
            return Err(query_error(owner, server, QueryFailure::Malformed));
        };
        if record.owner().to_name::<Vec<u8>>() != *owner {
            continue;
        }
        let data: &[u8] = record.data().data();
        match DsyncRecord::parse(data) {
            Some(dsync) => records.push(dsync),
            None => return Err(query_error(owner, server, QueryFailure::Malformed)),
        }
    }
    Ok(records)
}

/// Resolve a target name to its addresses, IPv4 first.
///
/// The parent's server is asked first.  It need not answer for a target
/// outside the parent zone, so such a target is looked up with the system
/// resolver if the server fails or knows no addresses.
async fn resolve(
    exchange: &dyn Exchange,
    request: &DiscoveryRequest,
    target: &Name<Vec<u8>>,
) -> Result<Vec<IpAddr>, DiscoveryError> {
    let at_hint = resolve_at(exchange, target, request.hint).await;
    if target.ends_with(&request.parent) {
        return at_hint;
    }
    let hint_error = match at_hint {
        Ok(addrs) if !addrs.is_empty() => return Ok(addrs),
        Ok(_) => None,
        Err(error) => {
            debug!("{error}");
            Some(error)
        }
    };

    debug!(
        "Resolving out-of-zone target '{}' with the system resolver",
        target.fmt_with_dot()
    );
    match lookup_host(target).await {
        Ok(addrs) if !addrs.is_empty() => Ok(addrs),
        result => {
            if let Err(error) = result {
                debug!("System lookup of '{}' failed: {error}", target.fmt_with_dot());
            }
            hint_error.map_or(Ok(Vec::new()), Err)
        }
    }
}

/// Ask a server for the addresses of a name.
async fn resolve_at(
    exchange: &dyn Exchange,
    target: &Name<Vec<u8>>,
    server: SocketAddr,
) -> Result<Vec<IpAddr>, DiscoveryError> {
    let mut addrs = Vec::new();

    let response = query(exchange, target, Rtype::A, server).await?;
    let answer = response
        .answer()
        .map_err(|_| query_error(target, server, QueryFailure::Malformed))?;
    for record in answer.limit_to_in::<A>() {
        let record = record.map_err(|_| query_error(target, server, QueryFailure::Malformed))?;
        addrs.push(IpAddr::V4(record.data().addr()));
    }

    let response = query(exchange, target, Rtype::AAAA, server).await?;
    let answer = response
        .answer()
        .map_err(|_| query_error(target, server, QueryFailure::Malformed))?;
    for record in answer.limit_to_in::<Aaaa>() {
        let record = record.map_err(|_| query_error(target, server, QueryFailure::Malformed))?;
        addrs.push(IpAddr::V6(record.data().addr()));
    }

    Ok(addrs)
}

/// Look up the addresses of a name with the system resolver.
async fn lookup_host(target: &Name<Vec<u8>>) -> io::Result<Vec<IpAddr>> {
    let host = target.to_string();
    let mut addrs: Vec<IpAddr> = tokio::net::lookup_host((host.as_str(), 0))
        .await?
        .map(|addr| addr.ip())
        .collect();
    addrs.sort_by_key(IpAddr::is_ipv6);
    addrs.dedup();
    Ok(addrs)
}

/// Send a query and check the response code.
///
/// NXDOMAIN counts as an empty answer.
async fn query(
    exchange: &dyn Exchange,
    name: &Name<Vec<u8>>,
    rtype: Rtype,
    server: SocketAddr,
) -> Result<Message<Vec<u8>>, DiscoveryError> {
    debug!("Querying {rtype} for '{}' at {server}", name.fmt_with_dot());
    let response = exchange
        .exchange(server, &query_message(name, rtype))
        .await
        .map_err(|error| query_error(name, server, QueryFailure::Exchange(error)))?;
    match response.header().rcode() {
        Rcode::NOERROR | Rcode::NXDOMAIN => Ok(response),
        rcode => Err(query_error(name, server, QueryFailure::Rcode(rcode))),
    }
}

fn query_error(name: &Name<Vec<u8>>, server: SocketAddr, cause: QueryFailure) -> DiscoveryError {
    DiscoveryError::Query {
        name: name.clone(),
        server,
        cause,
    }
}

//----------- DiscoveryError ---------------------------------------------------

/// An error in discovering the target for a zone.
#[derive(Clone, Debug)]
pub enum DiscoveryError {
    /// No usable target is announced.
    NoTarget {
        zone: Name<Vec<u8>>,
        reason: NoTargetReason,
    },

    /// A query failed.
    Query {
        name: Name<Vec<u8>>,
        server: SocketAddr,
        cause: QueryFailure,
    },
}

/// Why there is no target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NoTargetReason {
    /// No DSYNC record announces the trigger and scheme.
    NoMatchingEntry { trigger: Rtype, scheme: Scheme },

    /// The target name has no addresses.
    NoAddresses(Name<Vec<u8>>),
}

/// Why a query failed.
#[derive(Clone, Debug)]
pub enum QueryFailure {
    Exchange(ExchangeError),
    Rcode(Rcode),
    Malformed,
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTarget { zone, reason } => {
                write!(f, "no target for '{}': ", zone.fmt_with_dot())?;
                match reason {
                    NoTargetReason::NoMatchingEntry { trigger, scheme } => {
                        write!(f, "no DSYNC record for {trigger} with scheme {scheme}")
                    }
                    NoTargetReason::NoAddresses(target) => {
                        write!(f, "target '{}' has no addresses", target.fmt_with_dot())
                    }
                }
            }
            Self::Query {
                name,
                server,
                cause,
            } => {
                write!(f, "query for '{}' at {server} failed: ", name.fmt_with_dot())?;
                match cause {
                    QueryFailure::Exchange(error) => error.fmt(f),
                    QueryFailure::Rcode(rcode) => write!(f, "server responded with {rcode}"),
                    QueryFailure::Malformed => f.write_str("malformed response"),
                }
            }
        }
    }
}

impl std::error::Error for DiscoveryError {}

//============ Tests ===========================================================
