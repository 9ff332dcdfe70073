//! RFC2453 wire format.
//!
//! A message is a 4-byte header (command, version, two zero bytes) followed
//! by up to 25 fixed-size 20-byte records. All multi-byte fields are network
//! byte order. Parsing never reads past the validated buffer length; a bad
//! buffer is an `Err`, not a panic.

use std::net::Ipv4Addr;

pub const RIP_VERSION: u8 = 2;
pub const HEADER_LEN: usize = 4;
pub const RECORD_LEN: usize = 20;
/// UDP-MTU-driven record cap per message (RFC2453 3.6).
pub const MAX_RECORDS: usize = 25;

const AF_UNSPEC: u16 = 0;
const AF_INET: u16 = 2;

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum Command {
    Request,
    Response,
}

#[allow(clippy::from_over_into)]
impl Into<u8> for Command {
    fn into(self) -> u8 {
        match self {
            Command::Request => 1,
            Command::Response => 2,
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Command::Request),
            2 => Ok(Command::Response),
            _ => Err(ParseError::BadCommand(value)),
        }
    }
}

/// One advertised destination.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct RipEntry {
    pub address: Ipv4Addr,
    pub mask: Ipv4Addr,
    /// 0.0.0.0 means "route via the sender of this message".
    pub next_hop: Ipv4Addr,
    pub metric: u32,
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct RipMessage {
    pub command: Command,
    pub version: u8,
    pub entries: Vec<RipEntry>,
}

impl RipMessage {
    /// A request for the peer's full routing table (RFC2453 3.9.1).
    pub fn request() -> Self {
        Self {
            command: Command::Request,
            version: RIP_VERSION,
            entries: Vec::new(),
        }
    }

    pub fn response(entries: Vec<RipEntry>) -> Self {
        debug_assert!(entries.len() <= MAX_RECORDS);
        Self {
            command: Command::Response,
            version: RIP_VERSION,
            entries,
        }
    }

    /// Split a full advertisement into as many response messages as the
    /// per-message record cap requires.
    pub fn chunk_responses(entries: Vec<RipEntry>) -> Vec<RipMessage> {
        if entries.is_empty() {
            return Vec::new();
        }
        entries
            .chunks(MAX_RECORDS)
            .map(|chunk| RipMessage::response(chunk.to_vec()))
            .collect()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Shorter than the fixed message header.
    Truncated { len: usize },
    /// Body length is not a whole number of records.
    LengthMismatch { body_len: usize },
    TooManyRecords { count: usize },
    BadCommand(u8),
    BadAddressFamily(u16),
    MetricOutOfRange(u32),
}

/// Serialize one message. Chunking above [`MAX_RECORDS`] is the caller's
/// concern; see [`RipMessage::chunk_responses`].
pub fn assemble(message: &RipMessage) -> Vec<u8> {
    debug_assert!(message.entries.len() <= MAX_RECORDS);

    let mut buf = Vec::with_capacity(HEADER_LEN + message.entries.len() * RECORD_LEN);
    buf.push(message.command.into());
    buf.push(message.version);
    buf.extend_from_slice(&[0, 0]);

    for entry in &message.entries {
        encode_record(entry, &mut buf);
    }

    buf
}

/// Parse a received buffer into a message, validating every length and field
/// bound before any access.
pub fn disassemble(bytes: &[u8]) -> Result<RipMessage, ParseError> {
    if bytes.len() < HEADER_LEN {
        return Err(ParseError::Truncated { len: bytes.len() });
    }

    let command = Command::try_from(bytes[0])?;
    let version = bytes[1];

    let body = &bytes[HEADER_LEN..];
    if body.len() % RECORD_LEN != 0 {
        return Err(ParseError::LengthMismatch {
            body_len: body.len(),
        });
    }

    let count = body.len() / RECORD_LEN;
    if count > MAX_RECORDS {
        return Err(ParseError::TooManyRecords { count });
    }

    let mut entries = Vec::with_capacity(count);
    for record in body.chunks_exact(RECORD_LEN) {
        entries.push(decode_record(record)?);
    }

    Ok(RipMessage {
        command,
        version,
        entries,
    })
}

fn encode_record(entry: &RipEntry, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&AF_INET.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes()); // route tag
    buf.extend_from_slice(&entry.address.octets());
    buf.extend_from_slice(&entry.mask.octets());
    buf.extend_from_slice(&entry.next_hop.octets());
    buf.extend_from_slice(&entry.metric.to_be_bytes());
}

fn decode_record(record: &[u8]) -> Result<RipEntry, ParseError> {
    debug_assert_eq!(record.len(), RECORD_LEN);

    let family = read_u16(record, 0);
    if family != AF_INET && family != AF_UNSPEC {
        return Err(ParseError::BadAddressFamily(family));
    }
    // bytes 2..4 are the route tag; accepted and ignored.

    let address = read_addr(record, 4);
    let mask = read_addr(record, 8);
    let next_hop = read_addr(record, 12);

    let metric = read_u32(record, 16);
    if metric > 16 {
        return Err(ParseError::MetricOutOfRange(metric));
    }

    Ok(RipEntry {
        address,
        mask,
        next_hop,
        metric,
    })
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_addr(buf: &[u8], at: usize) -> Ipv4Addr {
    Ipv4Addr::from(read_u32(buf, at))
}
