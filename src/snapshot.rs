//! Reading a delegation from both sides.
//!
//! The child's view comes from an authoritative NS answer of the child's
//! primary, with glue for in-bailiwick name servers looked up there as well.
//! The parent's view is the referral (or authoritative answer) the parent's
//! primary gives for the child's apex.

use std::{fmt, io, net::IpAddr, net::SocketAddr, sync::Arc};

use domain::base::{iana::Rcode, Message, Name, Rtype, ToName};
use domain::rdata::{Aaaa, Ns, A};
use log::{debug, info};

use crate::delegation::DelegationRecordSet;
use crate::net::{query_message, Exchange, ExchangeError, ServerAddr};

//----------- Side -------------------------------------------------------------

/// Which side of a delegation is read.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Side {
    Child,
    Parent,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Child => "child",
            Self::Parent => "parent",
        })
    }
}

//----------- Snapshot ---------------------------------------------------------

/// The delegation of a zone as seen by the child and the parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub child: DelegationRecordSet,
    pub parent: DelegationRecordSet,
}

/// Read the delegation of `zone` from both sides.
pub async fn read(
    exchange: &dyn Exchange,
    zone: &Name<Vec<u8>>,
    child_primary: &ServerAddr,
    parent_primary: &ServerAddr,
) -> Result<Snapshot, ResolutionError> {
    let child = authoritative_delegation(exchange, zone, child_primary).await?;
    let parent = published_delegation(exchange, zone, parent_primary).await?;
    info!(
        "Read delegation of '{}': child has {} name servers, parent has {}",
        zone.fmt_with_dot(),
        child.ns().count(),
        parent.ns().count()
    );
    Ok(Snapshot { child, parent })
}

/// Read the delegation as the child's primary serves it.
pub async fn authoritative_delegation(
    exchange: &dyn Exchange,
    zone: &Name<Vec<u8>>,
    server: &ServerAddr,
) -> Result<DelegationRecordSet, ResolutionError> {
    let ctx = Context::new(zone, server, Side::Child);
    let addr = ctx.resolve().await?;

    let response = ctx.query(exchange, addr, zone, Rtype::NS).await?;
    if response.header().rcode() != Rcode::NOERROR {
        return Err(ctx.fail(ResolutionFailure::Rcode(response.header().rcode())));
    }
    if !response.header().aa() {
        return Err(ctx.fail(ResolutionFailure::NotAuthoritative));
    }

    let mut set = DelegationRecordSet::new(zone.clone());
    let answer = response.answer().map_err(|_| ctx.malformed())?;
    for record in answer.limit_to_in::<Ns<_>>() {
        let record = record.map_err(|_| ctx.malformed())?;
        if record.owner().to_name::<Vec<u8>>() == *zone {
            set.add_ns(&record.data().nsdname().to_name::<Vec<u8>>());
        }
    }
    if set.ns().next().is_none() {
        return Err(ctx.fail(ResolutionFailure::NoNameServers));
    }

    let glue_names: Vec<_> = set.ns().filter(|ns| set.needs_glue(ns)).cloned().collect();
    for ns in glue_names {
        for addr in ctx.addresses(exchange, addr, &ns).await? {
            set.add_glue(&ns, addr);
        }
    }
    Ok(set)
}

/// Read the delegation as the parent's primary publishes it.
///
/// Both a referral and an authoritative answer are accepted.  Glue is taken
/// from the additional section, for in-bailiwick name servers only.
pub async fn published_delegation(
    exchange: &dyn Exchange,
    zone: &Name<Vec<u8>>,
    server: &ServerAddr,
) -> Result<DelegationRecordSet, ResolutionError> {
    let ctx = Context::new(zone, server, Side::Parent);
    let addr = ctx.resolve().await?;

    let response = ctx.query(exchange, addr, zone, Rtype::NS).await?;
    if response.header().rcode() != Rcode::NOERROR {
        return Err(ctx.fail(ResolutionFailure::Rcode(response.header().rcode())));
    }

    let mut set = DelegationRecordSet::new(zone.clone());
    let section = if response.header().aa() {
        response.answer()
    } else {
        response.authority()
    };
    for record in section.map_err(|_| ctx.malformed())?.limit_to_in::<Ns<_>>() {
        let record = record.map_err(|_| ctx.malformed())?;
        if record.owner().to_name::<Vec<u8>>() == *zone {
            set.add_ns(&record.data().nsdname().to_name::<Vec<u8>>());
        }
    }
    if set.ns().next().is_none() {
        return Err(ctx.fail(ResolutionFailure::NoNameServers));
    }

    let mut glue = Vec::new();
    let additional = response.additional().map_err(|_| ctx.malformed())?;
    for record in additional.limit_to_in::<A>() {
        let record = record.map_err(|_| ctx.malformed())?;
        glue.push((record.owner().to_name::<Vec<u8>>(), IpAddr::V4(record.data().addr())));
    }
    let additional = response.additional().map_err(|_| ctx.malformed())?;
    for record in additional.limit_to_in::<Aaaa>() {
        let record = record.map_err(|_| ctx.malformed())?;
        glue.push((record.owner().to_name::<Vec<u8>>(), IpAddr::V6(record.data().addr())));
    }

    let names: Vec<_> = set.ns().cloned().collect();
    for (name, addr) in glue {
        if set.needs_glue(&name) && names.iter().any(|ns| *ns == name) {
            set.add_glue(&name, addr);
        }
    }
    Ok(set)
}

//----------- Context ----------------------------------------------------------

/// The zone and server being read, for error reporting.
struct Context<'a> {
    zone: &'a Name<Vec<u8>>,
    server: &'a ServerAddr,
    side: Side,
}

impl<'a> Context<'a> {
    fn new(zone: &'a Name<Vec<u8>>, server: &'a ServerAddr, side: Side) -> Self {
        Self { zone, server, side }
    }

    async fn resolve(&self) -> Result<SocketAddr, ResolutionError> {
        self.server
            .resolve()
            .await
            .map_err(|error| self.fail(ResolutionFailure::Address(Arc::new(error))))
    }

    async fn query(
        &self,
        exchange: &dyn Exchange,
        addr: SocketAddr,
        name: &Name<Vec<u8>>,
        rtype: Rtype,
    ) -> Result<Message<Vec<u8>>, ResolutionError> {
        debug!(
            "Querying {rtype} for '{}' at {} ({} side)",
            name.fmt_with_dot(),
            self.server,
            self.side
        );
        exchange
            .exchange(addr, &query_message(name, rtype))
            .await
            .map_err(|error| self.fail(ResolutionFailure::Exchange(error)))
    }

    /// Look up the addresses of a name server, IPv4 first.
    async fn addresses(
        &self,
        exchange: &dyn Exchange,
        addr: SocketAddr,
        ns: &Name<Vec<u8>>,
    ) -> Result<Vec<IpAddr>, ResolutionError> {
        let mut addrs = Vec::new();
        for rtype in [Rtype::A, Rtype::AAAA] {
            let response = self.query(exchange, addr, ns, rtype).await?;
            match response.header().rcode() {
                Rcode::NOERROR => {}
                Rcode::NXDOMAIN => continue,
                rcode => return Err(self.fail(ResolutionFailure::Rcode(rcode))),
            }
            let answer = response.answer().map_err(|_| self.malformed())?;
            if rtype == Rtype::A {
                for record in answer.limit_to_in::<A>() {
                    let record = record.map_err(|_| self.malformed())?;
                    if record.owner().to_name::<Vec<u8>>() == *ns {
                        addrs.push(IpAddr::V4(record.data().addr()));
                    }
                }
            } else {
                for record in answer.limit_to_in::<Aaaa>() {
                    let record = record.map_err(|_| self.malformed())?;
                    if record.owner().to_name::<Vec<u8>>() == *ns {
                        addrs.push(IpAddr::V6(record.data().addr()));
                    }
                }
            }
        }
        Ok(addrs)
    }

    fn fail(&self, cause: ResolutionFailure) -> ResolutionError {
        ResolutionError {
            zone: self.zone.clone(),
            server: self.server.clone(),
            side: self.side,
            cause,
        }
    }

    fn malformed(&self) -> ResolutionError {
        self.fail(ResolutionFailure::Malformed)
    }
}

//----------- ResolutionError --------------------------------------------------

/// A delegation could not be read.
#[derive(Clone, Debug)]
pub struct ResolutionError {
    /// The zone whose delegation was read.
    pub zone: Name<Vec<u8>>,

    /// The server that was asked.
    pub server: ServerAddr,

    pub side: Side,

    pub cause: ResolutionFailure,
}

/// Why a delegation could not be read.
#[derive(Clone, Debug)]
pub enum ResolutionFailure {
    /// The server's address could not be determined.
    Address(Arc<io::Error>),

    /// The server could not be reached.
    Exchange(ExchangeError),

    /// The server answered with an error.
    Rcode(Rcode),

    /// The child's primary is not authoritative for the zone.
    NotAuthoritative,

    /// The answer has no NS records for the zone.
    NoNameServers,

    /// The answer could not be parsed.
    Malformed,
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "could not read the {} side of '{}' from {}: ",
            self.side,
            self.zone.fmt_with_dot(),
            self.server
        )?;
        match &self.cause {
            ResolutionFailure::Address(error) => write!(f, "cannot resolve server: {error}"),
            ResolutionFailure::Exchange(error) => error.fmt(f),
            ResolutionFailure::Rcode(rcode) => write!(f, "server responded with {rcode}"),
            ResolutionFailure::NotAuthoritative => f.write_str("answer is not authoritative"),
            ResolutionFailure::NoNameServers => f.write_str("no NS records for the zone"),
            ResolutionFailure::Malformed => f.write_str("malformed response"),
        }
    }
}

impl std::error::Error for ResolutionError {}

//============ Tests ===========================================================
