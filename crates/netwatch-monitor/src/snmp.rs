//! Minimal SNMPv2c client.
//!
//! Only single-binding GET is spoken. Messages are BER encoded by hand:
//! `SEQUENCE { version, community, PDU { request-id, error-status,
//! error-index, SEQUENCE OF SEQUENCE { name, value } } }`.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::config::SnmpConfig;
use crate::error::{MonitorError, Result};

const VERSION_2C: i64 = 1;
const MAX_DATAGRAM: usize = 65_507;

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_OPAQUE: u8 = 0x44;
const TAG_COUNTER64: u8 = 0x46;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;

const PDU_GET_REQUEST: u8 = 0xa0;
const PDU_GET_RESPONSE: u8 = 0xa2;

/// Object identifier, e.g. `1.3.6.1.2.1.1.5.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    /// This OID with one more arc appended (a table column plus row index).
    pub fn child(&self, arc: u32) -> Oid {
        let mut arcs = self.0.clone();
        arcs.push(arc);
        Oid(arcs)
    }
}

impl From<&[u32]> for Oid {
    fn from(arcs: &[u32]) -> Self {
        Oid(arcs.to_vec())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arc in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{arc}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Oid {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        let arcs = s
            .trim()
            .trim_start_matches('.')
            .split('.')
            .map(|arc| arc.parse::<u32>())
            .collect::<std::result::Result<Vec<u32>, _>>()
            .map_err(|_| MonitorError::InvalidOid(s.to_string()))?;
        let valid_root = match arcs.as_slice() {
            [0 | 1, second, ..] => *second < 40,
            [2, _, ..] => true,
            _ => false,
        };
        if !valid_root {
            return Err(MonitorError::InvalidOid(s.to_string()));
        }
        Ok(Oid(arcs))
    }
}

/// A decoded SNMP value.
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl SnmpValue {
    /// False for `NULL` and the v2c exception values.
    pub fn is_present(&self) -> bool {
        !matches!(
            self,
            Self::Null | Self::NoSuchObject | Self::NoSuchInstance | Self::EndOfMibView
        )
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Counter32(v) | Self::Gauge32(v) | Self::TimeTicks(v) => Some(i64::from(*v)),
            Self::Counter64(v) => i64::try_from(*v).ok(),
            Self::OctetString(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Integer(v) => u64::try_from(*v).ok(),
            Self::Counter32(v) | Self::Gauge32(v) | Self::TimeTicks(v) => Some(u64::from(*v)),
            Self::Counter64(v) => Some(*v),
            Self::OctetString(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// Numeric value, also accepting numeric text. Non-finite results are
    /// rejected.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Self::Integer(v) => *v as f64,
            Self::Counter32(v) | Self::Gauge32(v) | Self::TimeTicks(v) => f64::from(*v),
            Self::Counter64(v) => *v as f64,
            Self::OctetString(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok()?,
            _ => return None,
        };
        value.is_finite().then_some(value)
    }

    /// Printable text of a string value, trailing NULs stripped.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::OctetString(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                Some(text.trim_end_matches('\0').trim().to_string())
            }
            Self::ObjectId(oid) => Some(oid.to_string()),
            _ => None,
        }
    }
}

/// One `name = value` pair of a PDU.
#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: SnmpValue,
}

/// A decoded GetResponse.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub community: Vec<u8>,
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub bindings: Vec<VarBind>,
}

impl Response {
    /// Value bound to `oid`, or an error if the agent flagged the request.
    pub fn value_of(&self, oid: &Oid) -> Result<SnmpValue> {
        if self.error_status != 0 {
            return Err(MonitorError::ErrorStatus {
                status: self.error_status,
                index: self.error_index,
            });
        }
        self.bindings
            .iter()
            .find(|b| &b.oid == oid)
            .map(|b| b.value.clone())
            .ok_or_else(|| MonitorError::Decode(format!("response carries no binding for {oid}")))
    }
}

/// SNMPv2c GetRequest for a single OID.
pub fn encode_get_request(community: &[u8], request_id: i32, oid: &Oid) -> Vec<u8> {
    let binding = VarBind {
        oid: oid.clone(),
        value: SnmpValue::Null,
    };
    encode_message(community, PDU_GET_REQUEST, request_id, 0, 0, &[binding])
}

fn encode_message(
    community: &[u8],
    pdu_tag: u8,
    request_id: i32,
    error_status: i64,
    error_index: i64,
    bindings: &[VarBind],
) -> Vec<u8> {
    let mut list = Vec::new();
    for binding in bindings {
        let mut pair = Vec::new();
        push_tlv(TAG_OID, &encode_oid(&binding.oid), &mut pair);
        encode_value(&binding.value, &mut pair);
        push_tlv(TAG_SEQUENCE, &pair, &mut list);
    }

    let mut pdu = Vec::new();
    push_signed(TAG_INTEGER, i64::from(request_id), &mut pdu);
    push_signed(TAG_INTEGER, error_status, &mut pdu);
    push_signed(TAG_INTEGER, error_index, &mut pdu);
    push_tlv(TAG_SEQUENCE, &list, &mut pdu);

    let mut message = Vec::new();
    push_signed(TAG_INTEGER, VERSION_2C, &mut message);
    push_tlv(TAG_OCTET_STRING, community, &mut message);
    push_tlv(pdu_tag, &pdu, &mut message);

    let mut packet = Vec::with_capacity(message.len() + 4);
    push_tlv(TAG_SEQUENCE, &message, &mut packet);
    packet
}

fn encode_value(value: &SnmpValue, out: &mut Vec<u8>) {
    match value {
        SnmpValue::Integer(v) => push_signed(TAG_INTEGER, *v, out),
        SnmpValue::OctetString(bytes) => push_tlv(TAG_OCTET_STRING, bytes, out),
        SnmpValue::Null => push_tlv(TAG_NULL, &[], out),
        SnmpValue::ObjectId(oid) => push_tlv(TAG_OID, &encode_oid(oid), out),
        SnmpValue::IpAddress(octets) => push_tlv(TAG_IP_ADDRESS, octets, out),
        SnmpValue::Counter32(v) => push_unsigned(TAG_COUNTER32, u64::from(*v), out),
        SnmpValue::Gauge32(v) => push_unsigned(TAG_GAUGE32, u64::from(*v), out),
        SnmpValue::TimeTicks(v) => push_unsigned(TAG_TIMETICKS, u64::from(*v), out),
        SnmpValue::Opaque(bytes) => push_tlv(TAG_OPAQUE, bytes, out),
        SnmpValue::Counter64(v) => push_unsigned(TAG_COUNTER64, *v, out),
        SnmpValue::NoSuchObject => push_tlv(TAG_NO_SUCH_OBJECT, &[], out),
        SnmpValue::NoSuchInstance => push_tlv(TAG_NO_SUCH_INSTANCE, &[], out),
        SnmpValue::EndOfMibView => push_tlv(TAG_END_OF_MIB_VIEW, &[], out),
    }
}

fn push_tlv(tag: u8, content: &[u8], out: &mut Vec<u8>) {
    out.push(tag);
    if content.len() < 0x80 {
        out.push(content.len() as u8);
    } else {
        let len = (content.len() as u32).to_be_bytes();
        let skip = len.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (len.len() - skip) as u8);
        out.extend_from_slice(&len[skip..]);
    }
    out.extend_from_slice(content);
}

/// Minimal two's-complement encoding.
fn push_signed(tag: u8, value: i64, out: &mut Vec<u8>) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let (lead, next) = (bytes[start], bytes[start + 1]);
        let redundant =
            (lead == 0x00 && next & 0x80 == 0) || (lead == 0xff && next & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    push_tlv(tag, &bytes[start..], out);
}

fn push_unsigned(tag: u8, value: u64, out: &mut Vec<u8>) {
    let bytes = value.to_be_bytes();
    let skip = bytes[..bytes.len() - 1].iter().take_while(|b| **b == 0).count();
    let mut content = Vec::with_capacity(9);
    if bytes[skip] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(&bytes[skip..]);
    push_tlv(tag, &content, out);
}

fn encode_oid(oid: &Oid) -> Vec<u8> {
    let arcs = oid.arcs();
    let first = u64::from(arcs.first().copied().unwrap_or(0));
    let second = u64::from(arcs.get(1).copied().unwrap_or(0));
    let mut out = Vec::with_capacity(arcs.len() + 4);
    push_base128(first * 40 + second, &mut out);
    for arc in arcs.iter().skip(2) {
        push_base128(u64::from(*arc), &mut out);
    }
    out
}

fn push_base128(mut value: u64, out: &mut Vec<u8>) {
    let mut groups = [0u8; 10];
    let mut i = groups.len();
    loop {
        i -= 1;
        groups[i] = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    let last = groups.len() - 1;
    for group in &mut groups[i..last] {
        *group |= 0x80;
    }
    out.extend_from_slice(&groups[i..]);
}

/// Decode a GetResponse message.
pub fn decode_response(packet: &[u8]) -> Result<Response> {
    let mut outer = Reader::new(packet);
    let mut message = Reader::new(outer.expect(TAG_SEQUENCE)?);
    let version = decode_signed(message.expect(TAG_INTEGER)?)?;
    if version != VERSION_2C {
        return Err(decode_error(format!("unsupported version {version}")));
    }
    let community = message.expect(TAG_OCTET_STRING)?.to_vec();

    let mut pdu = Reader::new(message.expect(PDU_GET_RESPONSE)?);
    let request_id = i32::try_from(decode_signed(pdu.expect(TAG_INTEGER)?)?)
        .map_err(|_| decode_error("request-id out of range"))?;
    let error_status = decode_signed(pdu.expect(TAG_INTEGER)?)?;
    let error_index = decode_signed(pdu.expect(TAG_INTEGER)?)?;

    let mut list = Reader::new(pdu.expect(TAG_SEQUENCE)?);
    let mut bindings = Vec::new();
    while !list.is_empty() {
        let mut pair = Reader::new(list.expect(TAG_SEQUENCE)?);
        let oid = decode_oid(pair.expect(TAG_OID)?)?;
        let (tag, content) = pair.read_tlv()?;
        bindings.push(VarBind {
            oid,
            value: decode_value(tag, content)?,
        });
    }

    Ok(Response {
        community,
        request_id,
        error_status,
        error_index,
        bindings,
    })
}

fn decode_error(reason: impl Into<String>) -> MonitorError {
    MonitorError::Decode(reason.into())
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn read_tlv(&mut self) -> Result<(u8, &'a [u8])> {
        let (&tag, rest) = self
            .buf
            .split_first()
            .ok_or_else(|| decode_error("truncated tag"))?;
        let (&first, mut rest) = rest
            .split_first()
            .ok_or_else(|| decode_error("truncated length"))?;

        let len = if first & 0x80 == 0 {
            usize::from(first)
        } else {
            let width = usize::from(first & 0x7f);
            if width == 0 || width > 4 || rest.len() < width {
                return Err(decode_error("unsupported length encoding"));
            }
            let len = rest[..width]
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
            rest = &rest[width..];
            len
        };

        if rest.len() < len {
            return Err(decode_error(format!(
                "tag {tag:#04x} claims {len} bytes, {} left",
                rest.len()
            )));
        }
        let (content, tail) = rest.split_at(len);
        self.buf = tail;
        Ok((tag, content))
    }

    fn expect(&mut self, tag: u8) -> Result<&'a [u8]> {
        let (found, content) = self.read_tlv()?;
        if found != tag {
            return Err(decode_error(format!(
                "expected tag {tag:#04x}, found {found:#04x}"
            )));
        }
        Ok(content)
    }
}

fn decode_signed(content: &[u8]) -> Result<i64> {
    let Some(first) = content.first() else {
        return Err(decode_error("empty integer"));
    };
    if content.len() > 8 {
        return Err(decode_error("integer wider than 64 bits"));
    }
    let seed: i64 = if first & 0x80 != 0 { -1 } else { 0 };
    Ok(content
        .iter()
        .fold(seed, |acc, b| (acc << 8) | i64::from(*b)))
}

fn decode_unsigned(content: &[u8]) -> Result<u64> {
    if content.is_empty() {
        return Err(decode_error("empty integer"));
    }
    let skip = content.iter().take_while(|b| **b == 0).count();
    let significant = &content[skip..];
    if significant.len() > 8 {
        return Err(decode_error("unsigned wider than 64 bits"));
    }
    Ok(significant
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn decode_u32(content: &[u8]) -> Result<u32> {
    u32::try_from(decode_unsigned(content)?).map_err(|_| decode_error("32-bit value out of range"))
}

fn decode_oid(content: &[u8]) -> Result<Oid> {
    let mut values = Vec::new();
    let mut current: u64 = 0;
    let mut pending = false;
    for byte in content {
        if current > (u64::MAX >> 7) {
            return Err(decode_error("object identifier arc overflow"));
        }
        current = (current << 7) | u64::from(byte & 0x7f);
        pending = byte & 0x80 != 0;
        if !pending {
            values.push(current);
            current = 0;
        }
    }
    if pending {
        return Err(decode_error("truncated object identifier"));
    }
    let Some((&head, tail)) = values.split_first() else {
        return Err(decode_error("empty object identifier"));
    };

    let (first, second) = match head {
        0..=39 => (0, head),
        40..=79 => (1, head - 40),
        _ => (2, head - 80),
    };
    let narrow = |v: u64| u32::try_from(v).map_err(|_| decode_error("arc exceeds 32 bits"));
    let mut arcs = Vec::with_capacity(values.len() + 1);
    arcs.push(first);
    arcs.push(narrow(second)?);
    for value in tail {
        arcs.push(narrow(*value)?);
    }
    Ok(Oid(arcs))
}

fn decode_value(tag: u8, content: &[u8]) -> Result<SnmpValue> {
    Ok(match tag {
        TAG_INTEGER => SnmpValue::Integer(decode_signed(content)?),
        TAG_OCTET_STRING => SnmpValue::OctetString(content.to_vec()),
        TAG_NULL => SnmpValue::Null,
        TAG_OID => SnmpValue::ObjectId(decode_oid(content)?),
        TAG_IP_ADDRESS => SnmpValue::IpAddress(
            <[u8; 4]>::try_from(content).map_err(|_| decode_error("IpAddress is not 4 bytes"))?,
        ),
        TAG_COUNTER32 => SnmpValue::Counter32(decode_u32(content)?),
        TAG_GAUGE32 => SnmpValue::Gauge32(decode_u32(content)?),
        TAG_TIMETICKS => SnmpValue::TimeTicks(decode_u32(content)?),
        TAG_OPAQUE => SnmpValue::Opaque(content.to_vec()),
        TAG_COUNTER64 => SnmpValue::Counter64(decode_unsigned(content)?),
        TAG_NO_SUCH_OBJECT => SnmpValue::NoSuchObject,
        TAG_NO_SUCH_INSTANCE => SnmpValue::NoSuchInstance,
        TAG_END_OF_MIB_VIEW => SnmpValue::EndOfMibView,
        other => return Err(decode_error(format!("unsupported value tag {other:#04x}"))),
    })
}

/// Management-protocol GET transport.
#[async_trait]
pub trait SnmpTransport: Send + Sync {
    /// Read one OID from `target`.
    async fn get(&self, target: IpAddr, oid: &Oid) -> Result<SnmpValue>;
}

/// SNMPv2c over UDP. One ephemeral socket per request.
#[derive(Debug, Clone)]
pub struct UdpSnmpClient {
    community: String,
    port: u16,
    timeout: Duration,
    retries: u32,
}

impl UdpSnmpClient {
    pub fn new(community: impl Into<String>, port: u16, timeout: Duration, retries: u32) -> Self {
        Self {
            community: community.into(),
            port,
            timeout,
            retries,
        }
    }

    pub fn from_config(config: &SnmpConfig) -> Self {
        Self::new(
            config.community.clone(),
            config.port,
            config.timeout(),
            config.retries,
        )
    }
}

#[async_trait]
impl SnmpTransport for UdpSnmpClient {
    async fn get(&self, target: IpAddr, oid: &Oid) -> Result<SnmpValue> {
        let bind = match target {
            IpAddr::V4(_) => "0.0.0.0:0",
            IpAddr::V6(_) => "[::]:0",
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect((target, self.port)).await?;

        let request_id = rand::random::<i32>() & i32::MAX;
        let packet = encode_get_request(self.community.as_bytes(), request_id, oid);

        for attempt in 0..=self.retries {
            socket.send(&packet).await?;
            match tokio::time::timeout(self.timeout, recv_response(&socket, request_id)).await {
                Ok(response) => return response?.value_of(oid),
                Err(_) => {
                    tracing::debug!(target = %target, oid = %oid, attempt, "SNMP request timed out");
                }
            }
        }

        Err(MonitorError::Timeout {
            target,
            oid: oid.to_string(),
        })
    }
}

/// Wait for the response matching `request_id`, skipping stale or
/// undecodable datagrams.
async fn recv_response(socket: &UdpSocket, request_id: i32) -> Result<Response> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let len = socket.recv(&mut buf).await?;
        match decode_response(&buf[..len]) {
            Ok(response) if response.request_id == request_id => return Ok(response),
            Ok(response) => {
                tracing::debug!(
                    expected = request_id,
                    received = response.request_id,
                    "Ignoring stale SNMP response"
                );
            }
            Err(e) => tracing::debug!(error = %e, "Ignoring undecodable datagram"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    #[test]
    fn test_oid_parse_and_display() {
        let sys_name = oid(".1.3.6.1.2.1.1.5.0");
        assert_eq!(sys_name.to_string(), "1.3.6.1.2.1.1.5.0");
        assert_eq!(sys_name.child(7).arcs().last(), Some(&7));
        assert!("1.3.x".parse::<Oid>().is_err());
        assert!("1".parse::<Oid>().is_err());
        assert!("1.40".parse::<Oid>().is_err());
    }

    #[test]
    fn test_get_request_bytes() {
        let packet = encode_get_request(b"public", 1, &oid("1.3.6.1.2.1.1.5.0"));
        let expected: &[u8] = &[
            0x30, 0x26, // message
            0x02, 0x01, 0x01, // version 2c
            0x04, 0x06, b'p', b'u', b'b', b'l', b'i', b'c', // community
            0xa0, 0x19, // GetRequest
            0x02, 0x01, 0x01, // request-id
            0x02, 0x01, 0x00, // error-status
            0x02, 0x01, 0x00, // error-index
            0x30, 0x0e, 0x30, 0x0c, // bindings
            0x06, 0x08, 0x2b, 0x06, 0x01, 0x02, 0x01, 0x01, 0x05, 0x00, // name
            0x05, 0x00, // NULL
        ];
        assert_eq!(packet, expected);
    }

    #[test]
    fn test_integer_encoding_is_minimal() {
        let encode = |v: i64| {
            let mut out = Vec::new();
            push_signed(TAG_INTEGER, v, &mut out);
            out
        };
        assert_eq!(encode(0), vec![0x02, 0x01, 0x00]);
        assert_eq!(encode(127), vec![0x02, 0x01, 0x7f]);
        assert_eq!(encode(128), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(encode(-1), vec![0x02, 0x01, 0xff]);
        assert_eq!(encode(-129), vec![0x02, 0x02, 0xff, 0x7f]);
        assert_eq!(decode_signed(&[0xff, 0x7f]).unwrap(), -129);
        assert_eq!(decode_signed(&[0x00, 0x80]).unwrap(), 128);
    }

    #[test]
    fn test_decode_response_values() {
        let bindings = vec![
            VarBind {
                oid: oid("1.3.6.1.2.1.1.3.0"),
                value: SnmpValue::TimeTicks(4_294_967_295),
            },
            VarBind {
                oid: oid("1.3.6.1.2.1.2.2.1.10.1"),
                value: SnmpValue::Counter32(3_000_000_000),
            },
            VarBind {
                oid: oid("1.3.6.1.2.1.1.5.0"),
                value: SnmpValue::OctetString(b"core-sw1".to_vec()),
            },
            VarBind {
                oid: oid("1.3.6.1.4.1.9.2.1.56.0"),
                value: SnmpValue::NoSuchObject,
            },
        ];
        let packet = encode_message(b"public", PDU_GET_RESPONSE, 77, 0, 0, &bindings);
        let response = decode_response(&packet).unwrap();

        assert_eq!(response.request_id, 77);
        assert_eq!(response.community, b"public");
        assert_eq!(response.bindings, bindings);

        let uptime = response.value_of(&oid("1.3.6.1.2.1.1.3.0")).unwrap();
        assert_eq!(uptime.as_u64(), Some(4_294_967_295));
        let name = response.value_of(&oid("1.3.6.1.2.1.1.5.0")).unwrap();
        assert_eq!(name.as_text().as_deref(), Some("core-sw1"));
        assert!(!response
            .value_of(&oid("1.3.6.1.4.1.9.2.1.56.0"))
            .unwrap()
            .is_present());
    }

    #[test]
    fn test_long_form_lengths() {
        let long = vec![b'x'; 300];
        let bindings = vec![VarBind {
            oid: oid("1.3.6.1.2.1.1.1.0"),
            value: SnmpValue::OctetString(long.clone()),
        }];
        let packet = encode_message(b"public", PDU_GET_RESPONSE, 5, 0, 0, &bindings);
        let response = decode_response(&packet).unwrap();
        assert_eq!(response.bindings[0].value, SnmpValue::OctetString(long));
    }

    #[test]
    fn test_error_status_surfaces() {
        let bindings = vec![VarBind {
            oid: oid("1.3.6.1.2.1.1.5.0"),
            value: SnmpValue::Null,
        }];
        let packet = encode_message(b"public", PDU_GET_RESPONSE, 9, 2, 1, &bindings);
        let response = decode_response(&packet).unwrap();
        assert!(matches!(
            response.value_of(&oid("1.3.6.1.2.1.1.5.0")),
            Err(MonitorError::ErrorStatus {
                status: 2,
                index: 1
            })
        ));
    }

    #[test]
    fn test_rejects_truncated_and_foreign_packets() {
        let packet = encode_get_request(b"public", 1, &oid("1.3.6.1.2.1.1.5.0"));
        assert!(decode_response(&packet[..packet.len() - 3]).is_err());
        // A request is not a response.
        assert!(decode_response(&packet).is_err());
        assert!(decode_response(&[]).is_err());
    }

    #[test]
    fn test_numeric_text_values() {
        assert_eq!(SnmpValue::OctetString(b" 42 ".to_vec()).as_f64(), Some(42.0));
        assert_eq!(SnmpValue::OctetString(b"n/a".to_vec()).as_f64(), None);
        assert_eq!(SnmpValue::Gauge32(7).as_f64(), Some(7.0));
        assert_eq!(SnmpValue::Integer(-3).as_u64(), None);
        assert_eq!(SnmpValue::Null.as_f64(), None);
    }

    /// Loopback agent answering every GET for `oid` with `value`, after
    /// first sending one datagram carrying the wrong request id.
    async fn spawn_agent(value: SnmpValue) -> u16 {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            loop {
                let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                let request = parse_request(&buf[..len]);
                let stale = encode_message(
                    b"public",
                    PDU_GET_RESPONSE,
                    request.0.wrapping_add(1),
                    0,
                    0,
                    &[],
                );
                let _ = socket.send_to(&stale, peer).await;
                let reply = encode_message(
                    b"public",
                    PDU_GET_RESPONSE,
                    request.0,
                    0,
                    0,
                    &[VarBind {
                        oid: request.1,
                        value: value.clone(),
                    }],
                );
                let _ = socket.send_to(&reply, peer).await;
            }
        });
        port
    }

    fn parse_request(packet: &[u8]) -> (i32, Oid) {
        let mut outer = Reader::new(packet);
        let mut message = Reader::new(outer.expect(TAG_SEQUENCE).unwrap());
        message.expect(TAG_INTEGER).unwrap();
        message.expect(TAG_OCTET_STRING).unwrap();
        let mut pdu = Reader::new(message.expect(PDU_GET_REQUEST).unwrap());
        let id = decode_signed(pdu.expect(TAG_INTEGER).unwrap()).unwrap() as i32;
        pdu.expect(TAG_INTEGER).unwrap();
        pdu.expect(TAG_INTEGER).unwrap();
        let mut list = Reader::new(pdu.expect(TAG_SEQUENCE).unwrap());
        let mut pair = Reader::new(list.expect(TAG_SEQUENCE).unwrap());
        (id, decode_oid(pair.expect(TAG_OID).unwrap()).unwrap())
    }

    #[tokio::test]
    async fn test_udp_client_against_loopback_agent() {
        let port = spawn_agent(SnmpValue::Gauge32(12)).await;
        let client = UdpSnmpClient::new("public", port, Duration::from_millis(500), 0);
        let value = client
            .get(IpAddr::V4(Ipv4Addr::LOCALHOST), &oid("1.3.6.1.4.1.9.2.1.56.0"))
            .await
            .unwrap();
        assert_eq!(value, SnmpValue::Gauge32(12));
    }

    #[tokio::test]
    async fn test_udp_client_times_out() {
        // Bound but silent.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();
        let client = UdpSnmpClient::new("public", port, Duration::from_millis(50), 1);
        let err = client
            .get(IpAddr::V4(Ipv4Addr::LOCALHOST), &oid("1.3.6.1.2.1.1.5.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::Timeout { .. }));
    }
}
