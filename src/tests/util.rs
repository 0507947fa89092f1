//! Mocks for the network seam.

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Mutex,
};

use domain::base::{
    iana::{Class, Opcode, Rcode},
    Message, MessageBuilder, Name, Question, Record, Rtype, ToName, Ttl, UnknownRecordData,
};
use domain::rdata::{Aaaa, Ns, A};

use crate::net::{Exchange, ExchangeError};

/// A callback answering a request sent to a server.
type Handler =
    dyn Fn(SocketAddr, &Message<&[u8]>) -> Result<Vec<u8>, ExchangeError> + Send + Sync;

//----------- MockExchange -----------------------------------------------------

/// An [`Exchange`] that answers through a callback supplied by the test and
/// records every request it sees.
pub struct MockExchange {
    handler: Box<Handler>,
    requests: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
}

impl MockExchange {
    pub fn new(
        handler: impl Fn(SocketAddr, &Message<&[u8]>) -> Result<Vec<u8>, ExchangeError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            requests: Mutex::default(),
        }
    }

    /// The servers contacted so far, in order.
    pub fn calls(&self) -> Vec<SocketAddr> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(server, _)| *server)
            .collect()
    }

    /// The requests sent so far, in order.
    pub fn requests(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.requests.lock().unwrap().clone()
    }

    /// The number of requests with the given opcode.
    pub fn count_opcode(&self, opcode: Opcode) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, req)| Message::from_octets(&req[..]).unwrap().header().opcode() == opcode)
            .count()
    }

    /// The number of queries for the given record type.
    pub fn count_qtype(&self, rtype: Rtype) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, req)| {
                let msg = Message::from_octets(&req[..]).unwrap();
                msg.header().opcode() == Opcode::QUERY
                    && msg.first_question().map(|q| q.qtype()) == Some(rtype)
            })
            .count()
    }

    /// An empty reply to `request`.
    pub fn reply(request: &Message<&[u8]>, rcode: Rcode) -> Vec<u8> {
        respond(request, rcode, false, &[], &[], &[])
    }

    /// A minimal UPDATE message.
    pub fn update() -> Vec<u8> {
        let zone: Name<Vec<u8>> = "example.".parse().unwrap();
        let mut msg = MessageBuilder::new_vec();
        msg.header_mut().set_opcode(Opcode::UPDATE);
        let mut msg = msg.question();
        msg.push(Question::new(&zone, Rtype::SOA, Class::IN)).unwrap();
        msg.finish()
    }
}

#[async_trait::async_trait]
impl Exchange for MockExchange {
    async fn exchange(
        &self,
        server: SocketAddr,
        request: &[u8],
    ) -> Result<Message<Vec<u8>>, ExchangeError> {
        self.requests
            .lock()
            .unwrap()
            .push((server, request.to_vec()));
        let parsed = Message::from_octets(request).map_err(|_| ExchangeError::Malformed)?;
        let response = (self.handler)(server, &parsed)?;
        Message::from_octets(response).map_err(|_| ExchangeError::Malformed)
    }
}

//----------- Building responses -----------------------------------------------

/// A record in a mocked response.
#[derive(Clone, Debug)]
pub enum Rr {
    Ns(&'static str, &'static str),
    A(&'static str, Ipv4Addr),
    Aaaa(&'static str, Ipv6Addr),
    Other(&'static str, Rtype, Vec<u8>),
}

/// The question of a request, as owned values.
pub fn question(request: &Message<&[u8]>) -> (Name<Vec<u8>>, Rtype) {
    let question = request.first_question().unwrap();
    (question.qname().to_name(), question.qtype())
}

/// Build a response to `request`.
pub fn respond(
    request: &Message<&[u8]>,
    rcode: Rcode,
    aa: bool,
    answer: &[Rr],
    authority: &[Rr],
    additional: &[Rr],
) -> Vec<u8> {
    let mut msg = MessageBuilder::new_vec().start_answer(request, rcode).unwrap();
    msg.header_mut().set_aa(aa);
    for rr in answer {
        push(&mut msg, rr);
    }
    let mut msg = msg.authority();
    for rr in authority {
        push(&mut msg, rr);
    }
    let mut msg = msg.additional();
    for rr in additional {
        push(&mut msg, rr);
    }
    msg.finish()
}

fn push<B>(builder: &mut B, rr: &Rr)
where
    B: PushRecord,
{
    let ttl = Ttl::from_secs(3600);
    match rr {
        Rr::Ns(owner, target) => {
            let owner: Name<Vec<u8>> = owner.parse().unwrap();
            let target: Name<Vec<u8>> = target.parse().unwrap();
            builder.push_record(Record::new(owner, Class::IN, ttl, Ns::new(target)));
        }
        Rr::A(owner, addr) => {
            let owner: Name<Vec<u8>> = owner.parse().unwrap();
            builder.push_record(Record::new(owner, Class::IN, ttl, A::new(*addr)));
        }
        Rr::Aaaa(owner, addr) => {
            let owner: Name<Vec<u8>> = owner.parse().unwrap();
            builder.push_record(Record::new(owner, Class::IN, ttl, Aaaa::new(*addr)));
        }
        Rr::Other(owner, rtype, data) => {
            let owner: Name<Vec<u8>> = owner.parse().unwrap();
            let data = UnknownRecordData::from_octets(*rtype, data.clone()).unwrap();
            builder.push_record(Record::new(owner, Class::IN, ttl, data));
        }
    }
}

/// The section builders share no trait for pushing, so bridge them here.
pub trait PushRecord {
    fn push_record<D>(&mut self, record: Record<Name<Vec<u8>>, D>)
    where
        D: domain::base::rdata::ComposeRecordData;
}

macro_rules! push_record {
    ($($ty:ident),*) => {
        $(
            impl PushRecord for domain::base::message_builder::$ty<Vec<u8>> {
                fn push_record<D>(&mut self, record: Record<Name<Vec<u8>>, D>)
                where
                    D: domain::base::rdata::ComposeRecordData,
                {
                    self.push(record).unwrap();
                }
            }
        )*
    };
}

push_record!(AnswerBuilder, AuthorityBuilder, AdditionalBuilder);
