//! Primitive AgentX encodings (RFC 2741 §5): byte order, object identifiers
//! and octet strings.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

use bytes::{Buf, BufMut, BytesMut};

use super::error::AgentXError;

/// Header flag selecting big-endian encoding of multi-byte fields.
pub const NETWORK_BYTE_ORDER: u8 = 0x10;

/// Maximum number of sub-identifiers in an AgentX OID (RFC 2741 §5.1).
pub const MAX_SUBIDS: usize = 128;

/// Common `1.3.6.1` prefix elided by the prefix byte.
const INTERNET: [u32; 4] = [1, 3, 6, 1];

/// Byte order of the multi-byte fields of one PDU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ByteOrder {
    #[default]
    Network,
    Little,
}

impl ByteOrder {
    /// Derives the byte order from the header flags.
    pub fn from_flags(flags: u8) -> Self {
        if flags & NETWORK_BYTE_ORDER != 0 {
            ByteOrder::Network
        } else {
            ByteOrder::Little
        }
    }

    /// Returns the header flag bit for this byte order.
    pub fn flag(self) -> u8 {
        match self {
            ByteOrder::Network => NETWORK_BYTE_ORDER,
            ByteOrder::Little => 0,
        }
    }
}

/// Append-only buffer writing fields in a fixed byte order.
pub struct Encoder {
    buf: BytesMut,
    order: ByteOrder,
}

impl Encoder {
    pub fn new(order: ByteOrder) -> Self {
        Encoder {
            buf: BytesMut::with_capacity(64),
            order,
        }
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn u16(&mut self, v: u16) {
        match self.order {
            ByteOrder::Network => self.buf.put_u16(v),
            ByteOrder::Little => self.buf.put_u16_le(v),
        }
    }

    pub fn u32(&mut self, v: u32) {
        match self.order {
            ByteOrder::Network => self.buf.put_u32(v),
            ByteOrder::Little => self.buf.put_u32_le(v),
        }
    }

    pub fn u64(&mut self, v: u64) {
        match self.order {
            ByteOrder::Network => self.buf.put_u64(v),
            ByteOrder::Little => self.buf.put_u64_le(v),
        }
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.put_slice(v);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Bounds-checked reader over a received buffer.
///
/// Every read fails with [`AgentXError::MalformedPdu`] instead of panicking
/// when the buffer is shorter than the field.
pub struct Decoder<'a> {
    buf: &'a [u8],
    order: ByteOrder,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8], order: ByteOrder) -> Self {
        Decoder { buf, order }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn need(&self, n: usize, what: &str) -> Result<(), AgentXError> {
        if self.buf.remaining() < n {
            return Err(AgentXError::malformed(format!(
                "{} truncated: need {} have {}",
                what,
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, AgentXError> {
        self.need(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self) -> Result<u16, AgentXError> {
        self.need(2, "u16")?;
        Ok(match self.order {
            ByteOrder::Network => self.buf.get_u16(),
            ByteOrder::Little => self.buf.get_u16_le(),
        })
    }

    pub fn u32(&mut self) -> Result<u32, AgentXError> {
        self.need(4, "u32")?;
        Ok(match self.order {
            ByteOrder::Network => self.buf.get_u32(),
            ByteOrder::Little => self.buf.get_u32_le(),
        })
    }

    pub fn u64(&mut self) -> Result<u64, AgentXError> {
        self.need(8, "u64")?;
        Ok(match self.order {
            ByteOrder::Network => self.buf.get_u64(),
            ByteOrder::Little => self.buf.get_u64_le(),
        })
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], AgentXError> {
        self.need(n, "octets")?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }
}

/// An SNMP Object Identifier.
///
/// Sub-identifiers are always stored fully expanded; the prefix byte is an
/// encoding detail. Ordering is lexicographic over the sub-identifiers, so a
/// proper prefix sorts before its descendants. Equality, ordering and
/// hashing ignore the include flag.
#[derive(Clone, Debug, Default)]
pub struct ObjectIdentifier {
    subids: Vec<u32>,
    include: bool,
}

impl ObjectIdentifier {
    pub fn new(subids: Vec<u32>) -> Self {
        ObjectIdentifier {
            subids,
            include: false,
        }
    }

    /// Creates a new OID from a slice of sub-identifiers.
    pub fn from_slice(subs: &[u32]) -> Self {
        Self::new(subs.to_vec())
    }

    /// The null OID (no sub-identifiers).
    pub fn null() -> Self {
        Self::default()
    }

    pub fn with_include(mut self, include: bool) -> Self {
        self.include = include;
        self
    }

    /// The `include` flag; on a GetNext start OID it makes the OID itself eligible.
    pub fn include(&self) -> bool {
        self.include
    }

    pub fn subids(&self) -> &[u32] {
        &self.subids
    }

    pub fn len(&self) -> usize {
        self.subids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subids.is_empty()
    }

    /// Returns true if this OID starts with `prefix` (equal counts as a prefix).
    pub fn starts_with(&self, prefix: &ObjectIdentifier) -> bool {
        self.subids.starts_with(&prefix.subids)
    }

    /// Returns true if `self` is a proper or equal leading subsequence of `other`.
    pub fn is_prefix_of(&self, other: &ObjectIdentifier) -> bool {
        other.starts_with(self)
    }

    /// Sub-identifiers following `prefix`, if `prefix` is a prefix of `self`.
    pub fn suffix_after(&self, prefix: &ObjectIdentifier) -> Option<&[u32]> {
        self.subids.strip_prefix(prefix.subids.as_slice())
    }

    /// Builds a descendant OID by appending `suffix`.
    pub fn child(&self, suffix: &[u32]) -> Self {
        let mut subids = Vec::with_capacity(self.subids.len() + suffix.len());
        subids.extend_from_slice(&self.subids);
        subids.extend_from_slice(suffix);
        Self::new(subids)
    }

    /// The prefix byte the encoder uses for this OID (0 when not compressible).
    pub fn prefix(&self) -> u8 {
        match self.subids.as_slice() {
            [a, b, c, d, p, ..] if [*a, *b, *c, *d] == INTERNET && (1..=255).contains(p) => {
                *p as u8
            }
            _ => 0,
        }
    }

    /// Sub-identifiers carried after the prefix byte.
    fn encoded_subids(&self) -> &[u32] {
        if self.prefix() > 0 {
            &self.subids[5..]
        } else {
            &self.subids[..]
        }
    }

    /// Encoded size in bytes.
    pub fn wire_len(&self) -> usize {
        4 + 4 * self.encoded_subids().len()
    }

    /// Encodes the OID per RFC 2741 §5.1.
    ///
    /// Format: n_subid(1) + prefix(1) + include(1) + reserved(1) + sub-identifiers(4 each).
    /// Fails when more than [`MAX_SUBIDS`] sub-identifiers remain after the prefix.
    pub fn encode(&self, enc: &mut Encoder) -> Result<(), AgentXError> {
        self.encode_with_include(enc, self.include)
    }

    /// Encodes the OID with an explicit include flag (VarBind names always clear it).
    pub(crate) fn encode_with_include(
        &self,
        enc: &mut Encoder,
        include: bool,
    ) -> Result<(), AgentXError> {
        let rest = self.encoded_subids();
        if rest.len() > MAX_SUBIDS {
            return Err(AgentXError::OidTooLong(self.subids.len()));
        }

        enc.u8(rest.len() as u8);
        enc.u8(self.prefix());
        enc.u8(u8::from(include));
        enc.u8(0); // reserved
        for &sub in rest {
            enc.u32(sub);
        }
        Ok(())
    }

    /// Decodes an OID, expanding the prefix byte.
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, AgentXError> {
        let n_subid = dec.u8()? as usize;
        let prefix = dec.u8()?;
        let include = dec.u8()? != 0;
        let _reserved = dec.u8()?;

        if n_subid > MAX_SUBIDS {
            return Err(AgentXError::malformed(format!(
                "OID has {} sub-identifiers (max {})",
                n_subid, MAX_SUBIDS
            )));
        }
        if dec.remaining() < n_subid * 4 {
            return Err(AgentXError::malformed(format!(
                "OID buffer too short: need {} have {}",
                n_subid * 4,
                dec.remaining()
            )));
        }

        let mut subids = Vec::with_capacity(if prefix > 0 { 5 + n_subid } else { n_subid });
        if prefix > 0 {
            subids.extend_from_slice(&INTERNET);
            subids.push(prefix as u32);
        }
        for _ in 0..n_subid {
            subids.push(dec.u32()?);
        }

        Ok(ObjectIdentifier { subids, include })
    }

    /// Encodes the OID on its own.
    pub fn to_bytes(&self, order: ByteOrder) -> Result<Vec<u8>, AgentXError> {
        let mut enc = Encoder::new(order);
        self.encode(&mut enc)?;
        Ok(enc.into_vec())
    }

    /// Decodes an OID from the front of `buf`, returning it with the number of bytes consumed.
    pub fn from_bytes(buf: &[u8], order: ByteOrder) -> Result<(Self, usize), AgentXError> {
        let mut dec = Decoder::new(buf, order);
        let oid = Self::decode(&mut dec)?;
        Ok((oid, buf.len() - dec.remaining()))
    }
}

// The include flag is request metadata, not part of the name.
impl PartialEq for ObjectIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.subids == other.subids
    }
}

impl Eq for ObjectIdentifier {}

impl PartialOrd for ObjectIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.subids.cmp(&other.subids)
    }
}

impl Hash for ObjectIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.subids.hash(state);
    }
}

impl From<&[u32]> for ObjectIdentifier {
    fn from(subs: &[u32]) -> Self {
        Self::from_slice(subs)
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for sub in &self.subids {
            write!(f, ".{}", sub)?;
        }
        Ok(())
    }
}

/// Encodes an octet string per RFC 2741 §5.3: length(4) + data + padding.
pub fn encode_octet_string(enc: &mut Encoder, s: &[u8]) {
    enc.u32(s.len() as u32);
    enc.bytes(s);
    let pad = (4 - (s.len() % 4)) % 4;
    enc.bytes(&[0u8; 3][..pad]);
}

/// Encoded size of an octet string of `len` bytes, padding included.
pub fn octet_string_len(len: usize) -> usize {
    4 + len.div_ceil(4) * 4
}

/// Decodes a padded octet string.
pub fn decode_octet_string(dec: &mut Decoder<'_>) -> Result<Vec<u8>, AgentXError> {
    let len = dec.u32()? as usize;
    if dec.remaining() < len {
        return Err(AgentXError::malformed(format!(
            "octet string truncated: need {} have {}",
            len,
            dec.remaining()
        )));
    }
    let data = dec.take(len)?.to_vec();
    let pad = (4 - (len % 4)) % 4;
    dec.take(pad)?;
    Ok(data)
}
