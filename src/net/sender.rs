//! Sending a signed update to a list of candidate servers.

use std::{fmt, net::SocketAddr};

use domain::base::{iana::Rcode, Message};
use log::{debug, info, warn};

use super::{Exchange, ExchangeError};

//----------- Delivery ---------------------------------------------------------

/// A message that was accepted by one of the candidates.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// The server that accepted the message.
    pub server: SocketAddr,

    /// The response of that server.
    pub response: Message<Vec<u8>>,

    /// How many candidates were tried, including the accepting one.
    pub attempts: usize,
}

/// Send `message` to each candidate in turn until one accepts it.
///
/// Candidates are tried strictly in the given order, one attempt each.  A
/// candidate accepts the message if it answers with NOERROR; the first such
/// answer ends the process and no further candidates are contacted.  Only
/// once every candidate has failed is an error returned.
pub async fn send(
    exchange: &dyn Exchange,
    message: &[u8],
    candidates: &[SocketAddr],
) -> Result<Delivery, SendError> {
    let mut failures = Vec::new();

    for (index, &server) in candidates.iter().enumerate() {
        debug!("Sending update to {server}");
        let failure = match exchange.exchange(server, message).await {
            Ok(response) if response.header().rcode() == Rcode::NOERROR => {
                info!("Update accepted by {server}");
                return Ok(Delivery {
                    server,
                    response,
                    attempts: index + 1,
                });
            }
            Ok(response) => FailureReason::Rcode(response.header().rcode()),
            Err(error) => FailureReason::Exchange(error),
        };

        warn!("Update to {server} failed: {failure}");
        failures.push(FailedAttempt {
            server,
            reason: failure,
        });
    }

    Err(SendError::AllCandidatesExhausted { failures })
}

//----------- FailedAttempt ----------------------------------------------------

/// A candidate that did not accept the message.
#[derive(Clone, Debug)]
pub struct FailedAttempt {
    /// The candidate.
    pub server: SocketAddr,

    /// Why it failed.
    pub reason: FailureReason,
}

/// Why a candidate did not accept the message.
#[derive(Clone, Debug)]
pub enum FailureReason {
    /// No usable response was received.
    Exchange(ExchangeError),

    /// The server rejected the message.
    Rcode(Rcode),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exchange(error) => error.fmt(f),
            Self::Rcode(rcode) => write!(f, "server responded with {rcode}"),
        }
    }
}

//----------- SendError --------------------------------------------------------

/// An error in delivering a message.
#[derive(Clone, Debug)]
pub enum SendError {
    /// Every candidate was tried and none accepted the message.
    AllCandidatesExhausted {
        /// The failure of each candidate, in the order they were tried.
        failures: Vec<FailedAttempt>,
    },
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllCandidatesExhausted { failures } if failures.is_empty() => {
                f.write_str("no candidate servers to send the update to")
            }
            Self::AllCandidatesExhausted { failures } => {
                f.write_str("no candidate accepted the update:")?;
                for failure in failures {
                    write!(f, " {}: {};", failure.server, failure.reason)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for SendError {}

//============ Tests ===========================================================
