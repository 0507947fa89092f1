//! Talking to name servers.
//!
//! All DNS traffic goes through the [`Exchange`] trait so that the pipeline
//! can be driven by a mock in tests.  [`UdpTcpTransport`] is the real
//! implementation.

use std::{
    fmt, io,
    net::{IpAddr, SocketAddr},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use domain::base::{iana::Class, Message, MessageBuilder, Question, Rtype, ToName};

pub mod sender;
mod transport;

pub use self::transport::UdpTcpTransport;

/// The default DNS port.
pub const DEFAULT_PORT: u16 = 53;

//----------- Exchange ---------------------------------------------------------

/// Sending a DNS message to a server and waiting for its response.
#[async_trait::async_trait]
pub trait Exchange: Send + Sync {
    /// Send `request` to `server` and return the matching response.
    ///
    /// The request is sent exactly as given.  In particular its message ID
    /// is not rewritten, as that would invalidate a SIG(0) signature.
    async fn exchange(
        &self,
        server: SocketAddr,
        request: &[u8],
    ) -> Result<Message<Vec<u8>>, ExchangeError>;
}

#[async_trait::async_trait]
impl<T: Exchange + ?Sized> Exchange for Arc<T> {
    async fn exchange(
        &self,
        server: SocketAddr,
        request: &[u8],
    ) -> Result<Message<Vec<u8>>, ExchangeError> {
        (**self).exchange(server, request).await
    }
}

/// Build a plain query for the given name and record type.
pub fn query_message(name: &impl ToName, rtype: Rtype) -> Vec<u8> {
    let mut msg = MessageBuilder::new_vec();
    msg.header_mut().set_random_id();
    let mut msg = msg.question();
    // A single question always fits into a fresh message.
    let _ = msg.push(Question::new(name, rtype, Class::IN));
    msg.finish()
}

//----------- ServerAddr -------------------------------------------------------

/// The address of a name server, as given by the user.
///
/// This is a host name or IP address with an optional port.  Host names are
/// only resolved when the server is contacted.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServerAddr {
    /// The host name or IP address.
    pub host: Box<str>,

    /// The port.
    pub port: u16,
}

impl ServerAddr {
    /// Resolve the server into a socket address.
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }

        tokio::net::lookup_host((&*self.host, self.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("host '{}' has no addresses", self.host),
                )
            })
    }
}

impl From<SocketAddr> for ServerAddr {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string().into(),
            port: addr.port(),
        }
    }
}

impl FromStr for ServerAddr {
    type Err = ParseServerAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseServerAddrError::Empty);
        }

        // A bare IPv6 address contains colons but no port.
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Self {
                host: ip.to_string().into(),
                port: DEFAULT_PORT,
            });
        }

        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(addr.into());
        }

        if let Some(rest) = s.strip_prefix('[') {
            // An IPv6 address in brackets, without a port.
            let ip = rest
                .strip_suffix(']')
                .and_then(|ip| ip.parse::<IpAddr>().ok())
                .ok_or_else(|| ParseServerAddrError::Invalid(s.into()))?;
            return Ok(Self {
                host: ip.to_string().into(),
                port: DEFAULT_PORT,
            });
        }

        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| ParseServerAddrError::InvalidPort(port.into()))?;
                (host, port)
            }
            None => (s, DEFAULT_PORT),
        };

        if host.is_empty() || host.contains(':') {
            return Err(ParseServerAddrError::Invalid(s.into()));
        }

        Ok(Self {
            host: host.into(),
            port,
        })
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

//----------- ParseServerAddrError ---------------------------------------------

/// An error in parsing a [`ServerAddr`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseServerAddrError {
    /// The address was empty.
    Empty,

    /// The port was not a number.
    InvalidPort(Box<str>),

    /// The address could not be understood.
    Invalid(Box<str>),
}

impl fmt::Display for ParseServerAddrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty server address"),
            Self::InvalidPort(port) => write!(f, "invalid port {port:?}"),
            Self::Invalid(addr) => write!(f, "invalid server address {addr:?}"),
        }
    }
}

impl std::error::Error for ParseServerAddrError {}

//----------- ExchangeError ----------------------------------------------------

/// An error in exchanging messages with a server.
#[derive(Clone, Debug)]
pub enum ExchangeError {
    /// A network operation failed.
    Io(Arc<io::Error>),

    /// The server did not answer in time.
    Timeout(Duration),

    /// The response could not be parsed.
    Malformed,

    /// The response did not belong to the request.
    Mismatch,
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => error.fmt(f),
            Self::Timeout(after) => write!(f, "no response after {}s", after.as_secs_f32()),
            Self::Malformed => f.write_str("malformed response"),
            Self::Mismatch => f.write_str("response does not match the request"),
        }
    }
}

impl std::error::Error for ExchangeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for ExchangeError {
    fn from(value: io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

//============ Tests ===========================================================
