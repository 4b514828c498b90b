use super::error::DhtError;
use super::node::{Contact, Key, NodeId};
use crate::constants::{ID_LEN, K, MAX_DATAGRAM_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub type TransactionId = u64;

/// kind (1) + transaction id (8) + sender id (20)
pub const HEADER_LEN: usize = 1 + 8 + ID_LEN;

const FAMILY_V4: u8 = 4;
const FAMILY_V6: u8 = 6;

const REPLY_NODES: u8 = 0;
const REPLY_VALUE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Ping = 0,
    Pong = 1,
    FindNode = 2,
    FindNodeResponse = 3,
    Store = 4,
    FindValue = 5,
    FindValueResponse = 6,
}

impl TryFrom<u8> for MessageKind {
    type Error = DhtError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageKind::Ping),
            1 => Ok(MessageKind::Pong),
            2 => Ok(MessageKind::FindNode),
            3 => Ok(MessageKind::FindNodeResponse),
            4 => Ok(MessageKind::Store),
            5 => Ok(MessageKind::FindValue),
            6 => Ok(MessageKind::FindValueResponse),
            _ => Err(DhtError::InvalidMessage(format!(
                "unknown message kind: {}",
                value
            ))),
        }
    }
}

/// Answer to FIND_VALUE: the value itself, or the nearest peers we know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueReply {
    Found(Bytes),
    Nodes(Vec<Contact>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhtBody {
    Ping,
    Pong,
    FindNode { target: NodeId },
    FindNodeResponse { nodes: Vec<Contact> },
    Store { key: Key, value: Bytes },
    FindValue { key: Key },
    FindValueResponse(ValueReply),
}

impl DhtBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            DhtBody::Ping => MessageKind::Ping,
            DhtBody::Pong => MessageKind::Pong,
            DhtBody::FindNode { .. } => MessageKind::FindNode,
            DhtBody::FindNodeResponse { .. } => MessageKind::FindNodeResponse,
            DhtBody::Store { .. } => MessageKind::Store,
            DhtBody::FindValue { .. } => MessageKind::FindValue,
            DhtBody::FindValueResponse(_) => MessageKind::FindValueResponse,
        }
    }

    /// Responses are routed to a pending request instead of being answered.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            DhtBody::Pong | DhtBody::FindNodeResponse { .. } | DhtBody::FindValueResponse(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhtMessage {
    pub transaction_id: TransactionId,
    pub sender_id: NodeId,
    pub body: DhtBody,
}

impl DhtMessage {
    pub fn new(transaction_id: TransactionId, sender_id: NodeId, body: DhtBody) -> Self {
        Self {
            transaction_id,
            sender_id,
            body,
        }
    }

    pub fn ping(transaction_id: TransactionId, our_id: &NodeId) -> Self {
        Self::new(transaction_id, *our_id, DhtBody::Ping)
    }

    pub fn find_node(transaction_id: TransactionId, our_id: &NodeId, target: NodeId) -> Self {
        Self::new(transaction_id, *our_id, DhtBody::FindNode { target })
    }

    pub fn find_value(transaction_id: TransactionId, our_id: &NodeId, key: Key) -> Self {
        Self::new(transaction_id, *our_id, DhtBody::FindValue { key })
    }

    pub fn store(transaction_id: TransactionId, our_id: &NodeId, key: Key, value: Bytes) -> Self {
        Self::new(transaction_id, *our_id, DhtBody::Store { key, value })
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    pub fn parse(data: &[u8]) -> Result<Self, DhtError> {
        let mut buf = data;

        ensure(&buf, HEADER_LEN, "header")?;
        let kind = MessageKind::try_from(buf.get_u8())?;
        let transaction_id = buf.get_u64();
        let sender_id = read_id(&mut buf)?;

        let body = match kind {
            MessageKind::Ping => DhtBody::Ping,
            MessageKind::Pong => DhtBody::Pong,
            MessageKind::FindNode => DhtBody::FindNode {
                target: read_id(&mut buf)?,
            },
            MessageKind::FindNodeResponse => DhtBody::FindNodeResponse {
                nodes: read_contacts(&mut buf)?,
            },
            MessageKind::Store => {
                let key = read_id(&mut buf)?;
                let value = read_value(&mut buf)?;
                DhtBody::Store { key, value }
            }
            MessageKind::FindValue => DhtBody::FindValue {
                key: read_id(&mut buf)?,
            },
            MessageKind::FindValueResponse => {
                ensure(&buf, 1, "reply tag")?;
                let reply = match buf.get_u8() {
                    REPLY_NODES => ValueReply::Nodes(read_contacts(&mut buf)?),
                    REPLY_VALUE => ValueReply::Found(read_value(&mut buf)?),
                    tag => {
                        return Err(DhtError::InvalidMessage(format!(
                            "unknown reply tag: {}",
                            tag
                        )))
                    }
                };
                DhtBody::FindValueResponse(reply)
            }
        };

        if buf.has_remaining() {
            return Err(DhtError::InvalidMessage(format!(
                "{} trailing bytes",
                buf.remaining()
            )));
        }

        Ok(Self {
            transaction_id,
            sender_id,
            body,
        })
    }

    pub fn encode(&self) -> Result<Bytes, DhtError> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + ID_LEN);
        buf.put_u8(self.kind() as u8);
        buf.put_u64(self.transaction_id);
        buf.put_slice(self.sender_id.as_bytes());

        match &self.body {
            DhtBody::Ping | DhtBody::Pong => {}
            DhtBody::FindNode { target } => buf.put_slice(target.as_bytes()),
            DhtBody::FindNodeResponse { nodes } => write_contacts(&mut buf, nodes)?,
            DhtBody::Store { key, value } => {
                buf.put_slice(key.as_bytes());
                write_value(&mut buf, value);
            }
            DhtBody::FindValue { key } => buf.put_slice(key.as_bytes()),
            DhtBody::FindValueResponse(ValueReply::Nodes(nodes)) => {
                buf.put_u8(REPLY_NODES);
                write_contacts(&mut buf, nodes)?;
            }
            DhtBody::FindValueResponse(ValueReply::Found(value)) => {
                buf.put_u8(REPLY_VALUE);
                write_value(&mut buf, value);
            }
        }

        if buf.len() > MAX_DATAGRAM_SIZE {
            return Err(DhtError::ValueTooLarge(buf.len()));
        }

        Ok(buf.freeze())
    }
}

/// Largest value that still fits a STORE datagram.
pub const MAX_VALUE_LEN: usize = MAX_DATAGRAM_SIZE - HEADER_LEN - ID_LEN - 4;

fn ensure(buf: &&[u8], len: usize, what: &str) -> Result<(), DhtError> {
    if buf.remaining() < len {
        return Err(DhtError::InvalidMessage(format!("truncated {}", what)));
    }
    Ok(())
}

fn read_id(buf: &mut &[u8]) -> Result<NodeId, DhtError> {
    ensure(buf, ID_LEN, "id")?;
    let id = NodeId::from_bytes(&buf[..ID_LEN])?;
    buf.advance(ID_LEN);
    Ok(id)
}

fn read_value(buf: &mut &[u8]) -> Result<Bytes, DhtError> {
    ensure(buf, 4, "value length")?;
    let len = buf.get_u32() as usize;
    ensure(buf, len, "value")?;
    Ok(buf.copy_to_bytes(len))
}

fn write_value(buf: &mut BytesMut, value: &Bytes) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

fn read_contacts(buf: &mut &[u8]) -> Result<Vec<Contact>, DhtError> {
    ensure(buf, 1, "contact count")?;
    let count = buf.get_u8() as usize;
    if count > K {
        return Err(DhtError::InvalidMessage(format!(
            "too many contacts: {}",
            count
        )));
    }

    let mut contacts = Vec::with_capacity(count);
    for _ in 0..count {
        let id = read_id(buf)?;

        ensure(buf, 1, "address family")?;
        let ip = match buf.get_u8() {
            FAMILY_V4 => {
                ensure(buf, 4, "ipv4 address")?;
                IpAddr::V4(Ipv4Addr::from(buf.get_u32()))
            }
            FAMILY_V6 => {
                ensure(buf, 16, "ipv6 address")?;
                IpAddr::V6(Ipv6Addr::from(buf.get_u128()))
            }
            family => {
                return Err(DhtError::InvalidMessage(format!(
                    "unknown address family: {}",
                    family
                )))
            }
        };

        ensure(buf, 2, "port")?;
        let port = buf.get_u16();

        contacts.push(Contact::new(id, SocketAddr::new(ip, port)));
    }

    Ok(contacts)
}

fn write_contacts(buf: &mut BytesMut, contacts: &[Contact]) -> Result<(), DhtError> {
    if contacts.len() > K {
        return Err(DhtError::InvalidMessage(format!(
            "too many contacts: {}",
            contacts.len()
        )));
    }

    buf.put_u8(contacts.len() as u8);
    for contact in contacts {
        buf.put_slice(contact.id.as_bytes());
        match contact.addr {
            SocketAddr::V4(v4) => {
                buf.put_u8(FAMILY_V4);
                buf.put_slice(&v4.ip().octets());
            }
            SocketAddr::V6(v6) => {
                buf.put_u8(FAMILY_V6);
                buf.put_slice(&v6.ip().octets());
            }
        }
        buf.put_u16(contact.addr.port());
    }

    Ok(())
}
