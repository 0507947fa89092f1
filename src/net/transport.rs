//! Plain DNS over UDP, falling back to TCP.

use std::{
    io,
    net::SocketAddr,
    time::Duration,
};

use domain::base::Message;
use log::{debug, trace};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UdpSocket},
    time::timeout,
};

use super::{Exchange, ExchangeError};

/// The largest UDP response we accept.
const MAX_UDP_SIZE: usize = 65535;

/// The largest request sent over UDP.
///
/// We do not send EDNS, so larger messages only fit over TCP.
const MAX_UDP_REQUEST: usize = 512;

//----------- UdpTcpTransport --------------------------------------------------

/// Exchanging messages over UDP, retrying over TCP on truncation.
///
/// Requests too large for UDP go straight to TCP.
#[derive(Clone, Debug)]
pub struct UdpTcpTransport {
    /// How long to wait for each exchange.
    timeout: Duration,
}

impl UdpTcpTransport {
    /// Create a transport with the given timeout for each exchange.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Perform an exchange over UDP.
    async fn udp(&self, server: SocketAddr, request: &[u8]) -> io::Result<Vec<u8>> {
        let local: SocketAddr = if server.is_ipv4() {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let sock = UdpSocket::bind(local).await?;
        sock.connect(server).await?;
        sock.send(request).await?;

        let mut buf = vec![0u8; MAX_UDP_SIZE];
        loop {
            let len = sock.recv(&mut buf).await?;
            // Stray datagrams with a different ID are dropped.
            if len >= 2 && request.len() >= 2 && buf[..2] == request[..2] {
                buf.truncate(len);
                return Ok(buf);
            }
            trace!("Dropping unrelated datagram from {server}");
        }
    }

    /// Perform an exchange over TCP.
    async fn tcp(&self, server: SocketAddr, request: &[u8]) -> io::Result<Vec<u8>> {
        let len = u16::try_from(request.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "message too long"))?;

        let mut stream = TcpStream::connect(server).await?;
        let mut framed = Vec::with_capacity(request.len() + 2);
        framed.extend_from_slice(&len.to_be_bytes());
        framed.extend_from_slice(request);
        stream.write_all(&framed).await?;

        let len = stream.read_u16().await?;
        let mut buf = vec![0u8; usize::from(len)];
        stream.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Parse a response and check it against the request.
    fn check(request: &[u8], response: Vec<u8>) -> Result<Message<Vec<u8>>, ExchangeError> {
        let response = Message::from_octets(response).map_err(|_| ExchangeError::Malformed)?;
        let request = Message::from_octets(request).map_err(|_| ExchangeError::Malformed)?;
        if !response.header().qr() || response.header().id() != request.header().id() {
            return Err(ExchangeError::Mismatch);
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl Exchange for UdpTcpTransport {
    async fn exchange(
        &self,
        server: SocketAddr,
        request: &[u8],
    ) -> Result<Message<Vec<u8>>, ExchangeError> {
        if request.len() > MAX_UDP_REQUEST {
            debug!(
                "Request of {} octets too large for UDP, sending to {server} over TCP",
                request.len()
            );
            let response = timeout(self.timeout, self.tcp(server, request))
                .await
                .map_err(|_| ExchangeError::Timeout(self.timeout))??;
            return Self::check(request, response);
        }

        let response = timeout(self.timeout, self.udp(server, request))
            .await
            .map_err(|_| ExchangeError::Timeout(self.timeout))??;

        let response = Self::check(request, response)?;
        if !response.header().tc() {
            return Ok(response);
        }

        debug!("Response from {server} was truncated, retrying over TCP");
        let response = timeout(self.timeout, self.tcp(server, request))
            .await
            .map_err(|_| ExchangeError::Timeout(self.timeout))??;
        Self::check(request, response)
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use domain::base::{
        iana::{Class, Rcode},
        MessageBuilder, Name, Question, Record, Rtype, Ttl,
    };
    use domain::rdata::Ns;
    use tokio::net::TcpListener;

    use crate::net::query_message;

    use super::*;

    fn answer_to(request: &[u8], truncated: bool) -> Vec<u8> {
        let request = Message::from_octets(request).unwrap();
        let mut answer = MessageBuilder::new_vec()
            .start_answer(&request, Rcode::NOERROR)
            .unwrap();
        answer.header_mut().set_tc(truncated);
        answer.finish()
    }

    #[tokio::test]
    async fn udp_exchange() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            let answer = answer_to(&buf[..len], false);
            server.send_to(&answer, peer).await.unwrap();
        });

        let name: Name<Vec<u8>> = "example.org".parse().unwrap();
        let request = query_message(&name, Rtype::SOA);
        let transport = UdpTcpTransport::new(Duration::from_secs(2));
        let response = transport.exchange(addr, &request).await.unwrap();
        assert_eq!(response.header().rcode(), Rcode::NOERROR);
        assert_eq!(response.header().id(), Message::from_octets(&request[..]).unwrap().header().id());
    }

    #[tokio::test]
    async fn truncated_udp_falls_back_to_tcp() {
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = udp.local_addr().unwrap();
        let tcp = TcpListener::bind(addr).await.unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, peer) = udp.recv_from(&mut buf).await.unwrap();
            udp.send_to(&answer_to(&buf[..len], true), peer).await.unwrap();
        });
        tokio::spawn(async move {
            let (mut stream, _) = tcp.accept().await.unwrap();
            let len = stream.read_u16().await.unwrap();
            let mut buf = vec![0u8; usize::from(len)];
            stream.read_exact(&mut buf).await.unwrap();
            let answer = answer_to(&buf, false);
            stream
                .write_all(&u16::try_from(answer.len()).unwrap().to_be_bytes())
                .await
                .unwrap();
            stream.write_all(&answer).await.unwrap();
        });

        let name: Name<Vec<u8>> = "example.org".parse().unwrap();
        let request = query_message(&name, Rtype::NS);
        let transport = UdpTcpTransport::new(Duration::from_secs(2));
        let response = transport.exchange(addr, &request).await.unwrap();
        assert!(!response.header().tc());
    }

    #[tokio::test]
    async fn large_request_goes_over_tcp() {
        // Only TCP is served.
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();

        let zone: Name<Vec<u8>> = "example.org".parse().unwrap();
        let mut msg = MessageBuilder::new_vec().question();
        msg.push(Question::new(&zone, Rtype::SOA, Class::IN)).unwrap();
        let mut msg = msg.authority();
        for i in 0..20 {
            let ns: Name<Vec<u8>> = format!("ns{i}.a-long-label-to-grow-the-request.example.org")
                .parse()
                .unwrap();
            msg.push(Record::new(&zone, Class::IN, Ttl::from_secs(3600), Ns::new(ns)))
                .unwrap();
        }
        let request = msg.finish();
        assert!(request.len() > MAX_UDP_REQUEST);

        let expected = request.len();
        tokio::spawn(async move {
            let (mut stream, _) = tcp.accept().await.unwrap();
            let len = stream.read_u16().await.unwrap();
            assert_eq!(usize::from(len), expected);
            let mut buf = vec![0u8; usize::from(len)];
            stream.read_exact(&mut buf).await.unwrap();
            let answer = answer_to(&buf, false);
            stream
                .write_all(&u16::try_from(answer.len()).unwrap().to_be_bytes())
                .await
                .unwrap();
            stream.write_all(&answer).await.unwrap();
        });

        let transport = UdpTcpTransport::new(Duration::from_secs(2));
        let response = transport.exchange(addr, &request).await.unwrap();
        assert_eq!(response.header().rcode(), Rcode::NOERROR);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let name: Name<Vec<u8>> = "example.org".parse().unwrap();
        let request = query_message(&name, Rtype::SOA);
        let transport = UdpTcpTransport::new(Duration::from_millis(100));
        let err = transport.exchange(addr, &request).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Timeout(_)));
        drop(server);
    }
}
