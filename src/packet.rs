//! # MQTT Packet Structures and Serialization
//!
//! The MQTT 3.1.1 control packets a device client needs, with encoding into
//! and decoding from caller-provided buffers. Nothing here allocates.
//!
//! Encoders write the variable header and payload at a fixed offset, then
//! prepend the fixed header once the remaining length is known and compact
//! the packet to the start of the buffer.

use heapless::Vec;

use crate::error::{CodecError, ConnectReasonCode, ProtocolError};
use crate::util::{self, read_u16, read_utf8_string, write_binary, write_utf8_string};

/// Room reserved for the fixed header: one type byte plus up to four length bytes.
const BODY_OFFSET: usize = 5;

/// Maximum number of topic filters carried by one SUBSCRIBE.
pub const MAX_SUBSCRIBE_TOPICS: usize = 8;

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    fn from_bits(bits: u8) -> Result<Self, CodecError> {
        match bits {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::MalformedPacket.into()),
        }
    }
}

/// A trait for packets that can be encoded into a byte buffer.
pub trait EncodePacket {
    /// Encodes the full packet at the start of `buf`, returning its length.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError>;
}

/// A trait for packets that can be decoded from a byte buffer holding exactly one packet.
pub trait DecodePacket<'a>: Sized {
    fn decode(buf: &'a [u8]) -> Result<Self, CodecError>;
}

/// The packets a client can receive from a broker.
#[derive(Debug)]
pub enum MqttPacket<'a> {
    ConnAck(ConnAck),
    Publish(Publish<'a>),
    PubAck(PubAck),
    SubAck(SubAck),
    PingResp,
}

/// Decodes one inbound packet.
///
/// Returns `Ok(None)` for an empty buffer. Packets that only a broker may
/// receive are reported as [`ProtocolError::UnexpectedPacket`].
pub fn decode(buf: &[u8]) -> Result<Option<MqttPacket<'_>>, CodecError> {
    let Some(first) = buf.first() else {
        return Ok(None);
    };

    let packet_type = first >> 4;
    let packet = match packet_type {
        2 => MqttPacket::ConnAck(ConnAck::decode(buf)?),
        3 => MqttPacket::Publish(Publish::decode(buf)?),
        4 => MqttPacket::PubAck(PubAck::decode(buf)?),
        9 => MqttPacket::SubAck(SubAck::decode(buf)?),
        13 => MqttPacket::PingResp,
        1 | 5..=8 | 10..=12 | 14 => {
            return Err(ProtocolError::UnexpectedPacket(packet_type).into());
        }
        _ => return Err(ProtocolError::InvalidPacketType(packet_type).into()),
    };

    Ok(Some(packet))
}

/// Splits the fixed header off `buf`, returning `(first byte, body start, body end)`.
fn split_header(buf: &[u8]) -> Result<(u8, usize, usize), CodecError> {
    let first = *buf.first().ok_or(ProtocolError::MalformedPacket)?;
    let mut cursor = 1;
    let remaining_len = util::read_variable_byte_integer(&mut cursor, buf)?;
    let end = cursor + remaining_len;
    if end > buf.len() {
        return Err(ProtocolError::MalformedPacket.into());
    }
    Ok((first, cursor, end))
}

fn put(buf: &mut [u8], cursor: &mut usize, bytes: &[u8]) -> Result<(), CodecError> {
    let end = *cursor + bytes.len();
    buf.get_mut(*cursor..end)
        .ok_or(CodecError::BufferTooSmall)?
        .copy_from_slice(bytes);
    *cursor = end;
    Ok(())
}

fn put_str(buf: &mut [u8], cursor: &mut usize, s: &str) -> Result<(), CodecError> {
    let rest = buf.get_mut(*cursor..).ok_or(CodecError::BufferTooSmall)?;
    *cursor += write_utf8_string(rest, s)?;
    Ok(())
}

/// Writes the fixed header in front of a body that spans `BODY_OFFSET..body_end`
/// and moves the body so the packet starts at offset 0.
fn frame(buf: &mut [u8], header: u8, body_end: usize) -> Result<usize, CodecError> {
    let remaining_len = body_end - BODY_OFFSET;
    let mut len_bytes = [0u8; 4];
    let len_count = util::write_variable_byte_integer(&mut len_bytes, remaining_len)?;
    let header_len = 1 + len_count;

    buf[0] = header;
    buf[1..header_len].copy_from_slice(&len_bytes[..len_count]);
    buf.copy_within(BODY_OFFSET..body_end, header_len);
    Ok(header_len + remaining_len)
}

fn ensure_header_room(buf: &[u8]) -> Result<(), CodecError> {
    if buf.len() < BODY_OFFSET {
        return Err(CodecError::BufferTooSmall);
    }
    Ok(())
}

// --- CONNECT Packet ---
#[derive(Debug, Clone)]
pub struct Connect<'a> {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: &'a str,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
}

impl<'a> Connect<'a> {
    pub fn new(client_id: &'a str, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            client_id,
            keep_alive,
            clean_session,
            username: None,
            password: None,
        }
    }

    /// Attaches username/password credentials.
    pub fn with_credentials(mut self, username: &'a str, password: &'a [u8]) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }
}

impl EncodePacket for Connect<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        ensure_header_room(buf)?;
        let mut cursor = BODY_OFFSET;

        put_str(buf, &mut cursor, "MQTT")?;
        let mut flags = 0u8;
        if self.clean_session {
            flags |= 0x02;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        // Protocol level 4 is MQTT 3.1.1.
        put(buf, &mut cursor, &[4, flags])?;
        put(buf, &mut cursor, &self.keep_alive.to_be_bytes())?;

        put_str(buf, &mut cursor, self.client_id)?;
        if let Some(username) = self.username {
            put_str(buf, &mut cursor, username)?;
        }
        if let Some(password) = self.password {
            let rest = buf.get_mut(cursor..).ok_or(CodecError::BufferTooSmall)?;
            cursor += write_binary(rest, password)?;
        }

        frame(buf, 0x10, cursor)
    }
}

// --- CONNACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: ConnectReasonCode,
}

impl<'a> DecodePacket<'a> for ConnAck {
    fn decode(buf: &'a [u8]) -> Result<Self, CodecError> {
        let (_, start, end) = split_header(buf)?;
        if end - start != 2 {
            return Err(ProtocolError::MalformedPacket.into());
        }
        Ok(Self {
            session_present: (buf[start] & 0x01) != 0,
            return_code: ConnectReasonCode::from(buf[start + 1]),
        })
    }
}

// --- PUBLISH Packet ---
#[derive(Debug, Clone)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub qos: QoS,
    pub payload: &'a [u8],
    pub packet_id: Option<u16>,
}

impl<'a> DecodePacket<'a> for Publish<'a> {
    fn decode(buf: &'a [u8]) -> Result<Self, CodecError> {
        let (first, start, end) = split_header(buf)?;
        let qos = QoS::from_bits((first >> 1) & 0x03)?;

        let body = &buf[..end];
        let mut cursor = start;
        let topic = read_utf8_string(&mut cursor, body)?;

        let packet_id = if qos != QoS::AtMostOnce {
            Some(read_u16(&mut cursor, body)?)
        } else {
            None
        };

        Ok(Publish {
            topic,
            qos,
            payload: &body[cursor..],
            packet_id,
        })
    }
}

impl EncodePacket for Publish<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        ensure_header_room(buf)?;
        let mut cursor = BODY_OFFSET;

        put_str(buf, &mut cursor, self.topic)?;

        if self.qos != QoS::AtMostOnce {
            let id = self.packet_id.ok_or(ProtocolError::MalformedPacket)?;
            put(buf, &mut cursor, &id.to_be_bytes())?;
        }

        put(buf, &mut cursor, self.payload)?;

        frame(buf, 0x30 | ((self.qos as u8) << 1), cursor)
    }
}

// --- PUBACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAck {
    pub packet_id: u16,
}

impl<'a> DecodePacket<'a> for PubAck {
    fn decode(buf: &'a [u8]) -> Result<Self, CodecError> {
        let (_, start, end) = split_header(buf)?;
        let mut cursor = start;
        let packet_id = read_u16(&mut cursor, &buf[..end])?;
        Ok(PubAck { packet_id })
    }
}

impl EncodePacket for PubAck {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let slice = buf.get_mut(0..4).ok_or(CodecError::BufferTooSmall)?;
        slice[0] = 0x40;
        slice[1] = 0x02;
        slice[2..4].copy_from_slice(&self.packet_id.to_be_bytes());
        Ok(4)
    }
}

// --- SUBSCRIBE Packet ---
#[derive(Debug)]
pub struct Subscribe<'a> {
    pub packet_id: u16,
    pub topics: Vec<(&'a str, QoS), MAX_SUBSCRIBE_TOPICS>,
}

impl<'a> Subscribe<'a> {
    /// Creates a new Subscribe packet with a single topic.
    pub fn new(packet_id: u16, topic: &'a str, qos: QoS) -> Self {
        let mut topics = Vec::new();
        let _ = topics.push((topic, qos));
        Self { packet_id, topics }
    }
}

impl EncodePacket for Subscribe<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        ensure_header_room(buf)?;
        let mut cursor = BODY_OFFSET;

        put(buf, &mut cursor, &self.packet_id.to_be_bytes())?;
        for (topic, qos) in &self.topics {
            put_str(buf, &mut cursor, topic)?;
            put(buf, &mut cursor, &[*qos as u8])?;
        }

        // SUBSCRIBE carries reserved flag bits 0b0010.
        frame(buf, 0x82, cursor)
    }
}

// --- SUBACK Packet ---
#[derive(Debug)]
pub struct SubAck {
    pub packet_id: u16,
    pub return_codes: Vec<u8, MAX_SUBSCRIBE_TOPICS>,
}

impl SubAck {
    /// Whether every filter of the matching SUBSCRIBE was granted.
    pub fn all_granted(&self) -> bool {
        self.return_codes.iter().all(|code| *code != 0x80)
    }
}

impl<'a> DecodePacket<'a> for SubAck {
    fn decode(buf: &'a [u8]) -> Result<Self, CodecError> {
        let (_, start, end) = split_header(buf)?;
        let mut cursor = start;
        let packet_id = read_u16(&mut cursor, &buf[..end])?;

        let mut return_codes = Vec::new();
        for code in &buf[cursor..end] {
            return_codes
                .push(*code)
                .map_err(|_| ProtocolError::MalformedPacket)?;
        }

        Ok(SubAck {
            packet_id,
            return_codes,
        })
    }
}

// --- PINGREQ Packet ---
#[derive(Debug)]
pub struct PingReq;

impl EncodePacket for PingReq {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let slice = buf.get_mut(0..2).ok_or(CodecError::BufferTooSmall)?;
        slice.copy_from_slice(&[0xC0, 0x00]);
        Ok(2)
    }
}

// --- DISCONNECT Packet ---
#[derive(Debug)]
pub struct Disconnect;

impl EncodePacket for Disconnect {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let slice = buf.get_mut(0..2).ok_or(CodecError::BufferTooSmall)?;
        slice.copy_from_slice(&[0xE0, 0x00]);
        Ok(2)
    }
}
