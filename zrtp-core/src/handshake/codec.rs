// Handshake message wire codec.
//
// Every message starts with a fixed 12-byte header (big-endian):
//
// ```text
// +-----------+-------------+------------------+
// | 0x505a    | length (2B) | type block (8B)  |
// +-----------+-------------+------------------+
// ```
//
// `length` counts the whole message, header and MAC included, in 32-bit
// words. Field layouts after the header:
//
// ```text
// Hello     version(4) client_id(16) h3(32) zid(12) flags(1) reserved(2)
//           ka_count(1) ka_types(4*n) mac(8)
// HelloACK  -
// Commit    h2(32) zid(12) hash_type(4) ka_type(4) hvi(32) mac(8)
// DHPart1/2 h1(32) public_value(32 | 384) mac(8)
// Confirm   confirm_mac(8) nonce(12) ciphertext(56)
// Conf2ACK  -
// ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::crypto::aead::NONCE_LEN;
use crate::crypto::agreement::KeyAgreementType;
use crate::crypto::hash::{truncated_mac, HASH_LEN, MAC_LEN};
use crate::error::{Result, ZrtpError};
use crate::handshake::messages::{
    Commit, Conf2Ack, Confirm, DhPart, Framed, Hello, HelloAck, MessageType, Part,
    CLIENT_ID_LEN, CONFIRM_CIPHERTEXT_LEN, PROTOCOL_VERSION,
};
use crate::zid::{Zid, ZID_LEN};

/// Magic preamble opening every handshake message.
pub const PREAMBLE: u16 = 0x505a;

/// Preamble, length and type block.
pub const HEADER_LEN: usize = 12;

/// Hash type advertised in Commit; the only one supported.
pub const HASH_TYPE_S256: &[u8; 4] = b"S256";

/// At most seven key agreement types fit the 3-bit count used on the wire.
pub const MAX_KEY_AGREEMENTS: usize = 7;

/// A message type with a field layout.
pub trait WireMessage: Sized {
    /// Whether the encoding ends in an 8-byte MAC keyed by a hash chain value.
    const TRAILING_MAC: bool;

    fn message_type(&self) -> MessageType;

    /// Append the fields (no header, no trailing MAC).
    fn encode_fields(&self, buf: &mut BytesMut);

    /// Parse the fields of a message of type `ty`.
    fn decode_fields(ty: MessageType, fields: &[u8]) -> Result<Self>;
}

/// A message whose trailing MAC is keyed by the pre-image of the hash chain
/// value it carries.
pub trait Authenticated: WireMessage {
    fn chain_value(&self) -> &[u8; HASH_LEN];
}

/// Encode `message` and append its MAC under `mac_key`.
pub fn seal<T: Authenticated>(message: T, mac_key: &[u8; HASH_LEN]) -> Result<Framed<T>> {
    let bytes = encode(&message, Some(mac_key))?;
    Ok(Framed::new(message, bytes))
}

/// Encode a message that carries no trailing MAC.
pub fn frame<T: WireMessage>(message: T) -> Result<Framed<T>> {
    if T::TRAILING_MAC {
        return Err(ZrtpError::Internal("MAC'd message framed without a key"));
    }
    let bytes = encode(&message, None)?;
    Ok(Framed::new(message, bytes))
}

fn encode<T: WireMessage>(message: &T, mac_key: Option<&[u8; HASH_LEN]>) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(128);
    buf.put_u16(PREAMBLE);
    buf.put_u16(0); // patched below
    buf.put_slice(message.message_type().type_block());
    message.encode_fields(&mut buf);

    let total = buf.len() + if T::TRAILING_MAC { MAC_LEN } else { 0 };
    if total % 4 != 0 {
        return Err(ZrtpError::Internal("encoded message is not word aligned"));
    }
    let words = u16::try_from(total / 4)
        .map_err(|_| ZrtpError::Internal("encoded message exceeds the length field"))?;
    buf[2..4].copy_from_slice(&words.to_be_bytes());

    if T::TRAILING_MAC {
        let key = mac_key.ok_or(ZrtpError::Internal("MAC'd message encoded without a key"))?;
        let mac = truncated_mac(key, &buf);
        buf.put_slice(&mac);
    }
    Ok(buf.freeze())
}

/// Any decoded handshake message.
#[derive(Debug, Clone)]
pub enum Packet {
    Hello(Framed<Hello>),
    HelloAck(Framed<HelloAck>),
    Commit(Framed<Commit>),
    DhPart1(Framed<DhPart>),
    DhPart2(Framed<DhPart>),
    Confirm1(Framed<Confirm>),
    Confirm2(Framed<Confirm>),
    Conf2Ack(Framed<Conf2Ack>),
}

impl Packet {
    /// Decode one handshake message. Header, length and field layout are
    /// checked; MACs are not, since their keys arrive later.
    pub fn decode(bytes: Bytes) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(ZrtpError::MessageTooShort {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let mut header = &bytes[..HEADER_LEN];
        let preamble = header.get_u16();
        if preamble != PREAMBLE {
            return Err(ZrtpError::BadPreamble(preamble));
        }
        let declared = usize::from(header.get_u16()) * 4;
        if declared != bytes.len() {
            return Err(ZrtpError::LengthMismatch {
                declared,
                actual: bytes.len(),
            });
        }
        let ty = MessageType::from_type_block(header).ok_or_else(|| {
            ZrtpError::UnknownMessageType(String::from_utf8_lossy(header).into_owned())
        })?;

        Ok(match ty {
            MessageType::Hello => Packet::Hello(open(ty, bytes)?),
            MessageType::HelloAck => Packet::HelloAck(open(ty, bytes)?),
            MessageType::Commit => Packet::Commit(open(ty, bytes)?),
            MessageType::DhPart1 => Packet::DhPart1(open(ty, bytes)?),
            MessageType::DhPart2 => Packet::DhPart2(open(ty, bytes)?),
            MessageType::Confirm1 => Packet::Confirm1(open(ty, bytes)?),
            MessageType::Confirm2 => Packet::Confirm2(open(ty, bytes)?),
            MessageType::Conf2Ack => Packet::Conf2Ack(open(ty, bytes)?),
        })
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Packet::Hello(_) => MessageType::Hello,
            Packet::HelloAck(_) => MessageType::HelloAck,
            Packet::Commit(_) => MessageType::Commit,
            Packet::DhPart1(_) => MessageType::DhPart1,
            Packet::DhPart2(_) => MessageType::DhPart2,
            Packet::Confirm1(_) => MessageType::Confirm1,
            Packet::Confirm2(_) => MessageType::Confirm2,
            Packet::Conf2Ack(_) => MessageType::Conf2Ack,
        }
    }

    /// The wire bytes this packet was decoded from.
    pub fn bytes(&self) -> &Bytes {
        match self {
            Packet::Hello(m) => m.bytes(),
            Packet::HelloAck(m) => m.bytes(),
            Packet::Commit(m) => m.bytes(),
            Packet::DhPart1(m) | Packet::DhPart2(m) => m.bytes(),
            Packet::Confirm1(m) | Packet::Confirm2(m) => m.bytes(),
            Packet::Conf2Ack(m) => m.bytes(),
        }
    }
}

fn open<T: WireMessage>(ty: MessageType, bytes: Bytes) -> Result<Framed<T>> {
    let end = if T::TRAILING_MAC {
        if bytes.len() < HEADER_LEN + MAC_LEN {
            return Err(ZrtpError::MessageTooShort {
                expected: HEADER_LEN + MAC_LEN,
                actual: bytes.len(),
            });
        }
        bytes.len() - MAC_LEN
    } else {
        bytes.len()
    };
    let message = T::decode_fields(ty, &bytes[HEADER_LEN..end])?;
    Ok(Framed::new(message, bytes))
}

/// Cursor over a message's fields that reports truncation against the
/// message type being parsed.
struct FieldReader<'a> {
    ty: MessageType,
    data: &'a [u8],
}

impl<'a> FieldReader<'a> {
    fn new(ty: MessageType, data: &'a [u8]) -> Self {
        Self { ty, data }
    }

    fn malformed(&self, reason: impl Into<String>) -> ZrtpError {
        ZrtpError::Malformed {
            message: self.ty,
            reason: reason.into(),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() < n {
            return Err(self.malformed(format!(
                "truncated: need {n} more bytes, have {}",
                self.data.len()
            )));
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.data)
    }

    fn finish(&self) -> Result<()> {
        if !self.data.is_empty() {
            return Err(self.malformed(format!("{} trailing bytes", self.data.len())));
        }
        Ok(())
    }
}

// ── Per-message layouts ──────────────────────────────────────────────────

impl WireMessage for Hello {
    const TRAILING_MAC: bool = true;

    fn message_type(&self) -> MessageType {
        MessageType::Hello
    }

    fn encode_fields(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.version);
        buf.put_slice(&self.client_id);
        buf.put_slice(&self.h3);
        buf.put_slice(self.zid.as_bytes());
        buf.put_u8(0); // flags
        buf.put_u16(0); // reserved
        let count = self.key_agreements.len().min(MAX_KEY_AGREEMENTS);
        buf.put_u8(count as u8);
        for kind in self.key_agreements.iter().take(count) {
            buf.put_slice(kind.wire_name());
        }
    }

    fn decode_fields(ty: MessageType, fields: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(ty, fields);
        let version: [u8; 4] = r.array()?;
        if &version != PROTOCOL_VERSION {
            return Err(ZrtpError::UnsupportedVersion(
                String::from_utf8_lossy(&version).into_owned(),
            ));
        }
        let client_id: [u8; CLIENT_ID_LEN] = r.array()?;
        let h3: [u8; HASH_LEN] = r.array()?;
        let zid = Zid::new(r.array::<ZID_LEN>()?);
        let _flags = r.u8()?;
        r.take(2)?;
        let count = usize::from(r.u8()?);
        if count > MAX_KEY_AGREEMENTS {
            return Err(r.malformed(format!("{count} key agreement types advertised")));
        }
        let mut key_agreements = Vec::with_capacity(count);
        for _ in 0..count {
            // Unknown algorithms are skipped, not rejected.
            if let Some(kind) = KeyAgreementType::from_wire_name(r.take(4)?) {
                if !key_agreements.contains(&kind) {
                    key_agreements.push(kind);
                }
            }
        }
        r.finish()?;
        Ok(Hello {
            version,
            client_id,
            h3,
            zid,
            key_agreements,
        })
    }
}

impl Authenticated for Hello {
    fn chain_value(&self) -> &[u8; HASH_LEN] {
        &self.h3
    }
}

impl WireMessage for Commit {
    const TRAILING_MAC: bool = true;

    fn message_type(&self) -> MessageType {
        MessageType::Commit
    }

    fn encode_fields(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.h2);
        buf.put_slice(self.zid.as_bytes());
        buf.put_slice(HASH_TYPE_S256);
        buf.put_slice(self.key_agreement.wire_name());
        buf.put_slice(&self.hvi);
    }

    fn decode_fields(ty: MessageType, fields: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(ty, fields);
        let h2: [u8; HASH_LEN] = r.array()?;
        let zid = Zid::new(r.array::<ZID_LEN>()?);
        let hash_type = r.take(4)?;
        if hash_type != HASH_TYPE_S256 {
            return Err(r.malformed(format!(
                "unsupported hash type {:?}",
                String::from_utf8_lossy(hash_type)
            )));
        }
        let ka_name = r.take(4)?;
        let key_agreement = KeyAgreementType::from_wire_name(ka_name).ok_or_else(|| {
            ZrtpError::UnsupportedKeyAgreement(String::from_utf8_lossy(ka_name).into_owned())
        })?;
        let hvi: [u8; HASH_LEN] = r.array()?;
        r.finish()?;
        Ok(Commit {
            h2,
            zid,
            key_agreement,
            hvi,
        })
    }
}

impl Authenticated for Commit {
    fn chain_value(&self) -> &[u8; HASH_LEN] {
        &self.h2
    }
}

impl WireMessage for DhPart {
    const TRAILING_MAC: bool = true;

    fn message_type(&self) -> MessageType {
        match self.part {
            Part::One => MessageType::DhPart1,
            Part::Two => MessageType::DhPart2,
        }
    }

    fn encode_fields(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.h1);
        buf.put_slice(&self.public_value);
    }

    fn decode_fields(ty: MessageType, fields: &[u8]) -> Result<Self> {
        let part = match ty {
            MessageType::DhPart1 => Part::One,
            MessageType::DhPart2 => Part::Two,
            _ => return Err(ZrtpError::Internal("DHPart layout used for another type")),
        };
        let mut r = FieldReader::new(ty, fields);
        let h1: [u8; HASH_LEN] = r.array()?;
        let public_value = r.rest().to_vec();
        if public_value.is_empty() {
            return Err(r.malformed("missing public value"));
        }
        Ok(DhPart {
            part,
            h1,
            public_value,
        })
    }
}

impl Authenticated for DhPart {
    fn chain_value(&self) -> &[u8; HASH_LEN] {
        &self.h1
    }
}

impl WireMessage for Confirm {
    const TRAILING_MAC: bool = false;

    fn message_type(&self) -> MessageType {
        Confirm::message_type(self)
    }

    fn encode_fields(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.confirm_mac);
        buf.put_slice(&self.nonce);
        buf.put_slice(&self.ciphertext);
    }

    fn decode_fields(ty: MessageType, fields: &[u8]) -> Result<Self> {
        let part = match ty {
            MessageType::Confirm1 => Part::One,
            MessageType::Confirm2 => Part::Two,
            _ => return Err(ZrtpError::Internal("Confirm layout used for another type")),
        };
        let mut r = FieldReader::new(ty, fields);
        let confirm_mac: [u8; MAC_LEN] = r.array()?;
        let nonce: [u8; NONCE_LEN] = r.array()?;
        let ciphertext = r.take(CONFIRM_CIPHERTEXT_LEN)?.to_vec();
        r.finish()?;
        Ok(Confirm {
            part,
            confirm_mac,
            nonce,
            ciphertext,
        })
    }
}

impl WireMessage for HelloAck {
    const TRAILING_MAC: bool = false;

    fn message_type(&self) -> MessageType {
        MessageType::HelloAck
    }

    fn encode_fields(&self, _buf: &mut BytesMut) {}

    fn decode_fields(ty: MessageType, fields: &[u8]) -> Result<Self> {
        FieldReader::new(ty, fields).finish()?;
        Ok(HelloAck)
    }
}

impl WireMessage for Conf2Ack {
    const TRAILING_MAC: bool = false;

    fn message_type(&self) -> MessageType {
        MessageType::Conf2Ack
    }

    fn encode_fields(&self, _buf: &mut BytesMut) {}

    fn decode_fields(ty: MessageType, fields: &[u8]) -> Result<Self> {
        FieldReader::new(ty, fields).finish()?;
        Ok(Conf2Ack)
    }
}
