//! AgentX PDUs (RFC 2741 §6): header, typed payloads and the request →
//! response bridge into the MIB table.

use super::{
    encodings::{
        decode_octet_string, encode_octet_string, octet_string_len, ByteOrder, Decoder, Encoder,
        ObjectIdentifier,
    },
    error::AgentXError,
    mib::{MibTable, MibView},
    value::{VarBind, VarBindValue},
};

/// AgentX protocol version.
pub const AGENTX_VERSION: u8 = 1;

/// PDU header size in bytes.
pub const PDU_HEADER_SIZE: usize = 20;

// --- Header flags (RFC 2741 §6.1) ---

pub const FLAG_NON_DEFAULT_CONTEXT: u8 = 0x08;

// --- Response errors (RFC 2741 §6.2.16) ---

pub const RES_NO_ERROR: u16 = 0;
pub const RES_GEN_ERR: u16 = 5;
pub const RES_NOT_WRITABLE: u16 = 17;
pub const RES_PARSE_ERROR: u16 = 266;

// --- Close reasons (RFC 2741 §6.2.2) ---

pub const REASON_PARSE_ERROR: u8 = 2;
pub const REASON_SHUTDOWN: u8 = 5;

/// PDU type numbers (RFC 2741 §6.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PduType {
    Open = 1,
    Close = 2,
    Register = 3,
    Unregister = 4,
    Get = 5,
    GetNext = 6,
    GetBulk = 7,
    TestSet = 8,
    CommitSet = 9,
    UndoSet = 10,
    CleanupSet = 11,
    Notify = 12,
    Ping = 13,
    IndexAllocate = 14,
    IndexDeallocate = 15,
    AddAgentCaps = 16,
    RemoveAgentCaps = 17,
    Response = 18,
}

impl TryFrom<u8> for PduType {
    type Error = AgentXError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Ok(match v {
            1 => PduType::Open,
            2 => PduType::Close,
            3 => PduType::Register,
            4 => PduType::Unregister,
            5 => PduType::Get,
            6 => PduType::GetNext,
            7 => PduType::GetBulk,
            8 => PduType::TestSet,
            9 => PduType::CommitSet,
            10 => PduType::UndoSet,
            11 => PduType::CleanupSet,
            12 => PduType::Notify,
            13 => PduType::Ping,
            14 => PduType::IndexAllocate,
            15 => PduType::IndexDeallocate,
            16 => PduType::AddAgentCaps,
            17 => PduType::RemoveAgentCaps,
            18 => PduType::Response,
            other => return Err(AgentXError::UnknownPduType(other)),
        })
    }
}

// --- PDU header ---

/// Decoded AgentX PDU header (20 bytes).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PduHeader {
    pub version: u8,
    pub pdu_type: PduType,
    pub flags: u8,
    pub reserved: u8,
    pub session_id: u32,
    pub transaction_id: u32,
    pub packet_id: u32,
    pub payload_length: u32,
}

impl PduHeader {
    /// Creates a header for an outgoing PDU.
    ///
    /// The payload length stays zero until the PDU is sealed.
    pub fn new(
        pdu_type: PduType,
        flags: u8,
        session_id: u32,
        transaction_id: u32,
        packet_id: u32,
    ) -> Self {
        PduHeader {
            version: AGENTX_VERSION,
            pdu_type,
            flags,
            reserved: 0,
            session_id,
            transaction_id,
            packet_id,
            payload_length: 0,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        ByteOrder::from_flags(self.flags)
    }

    pub fn has_context(&self) -> bool {
        self.flags & FLAG_NON_DEFAULT_CONTEXT != 0
    }

    /// Header of the Response answering this PDU: same ids, same byte order.
    pub fn response_header(&self) -> PduHeader {
        PduHeader::new(
            PduType::Response,
            self.byte_order().flag(),
            self.session_id,
            self.transaction_id,
            self.packet_id,
        )
    }

    /// Decodes an AgentX PDU header from the first 20 bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<PduHeader, AgentXError> {
        if buf.len() < PDU_HEADER_SIZE {
            return Err(AgentXError::malformed(format!(
                "Header too short: {} bytes",
                buf.len()
            )));
        }
        let version = buf[0];
        if version != AGENTX_VERSION {
            return Err(AgentXError::UnsupportedVersion(version));
        }
        let pdu_type = PduType::try_from(buf[1])?;
        let flags = buf[2];

        let mut dec = Decoder::new(&buf[4..PDU_HEADER_SIZE], ByteOrder::from_flags(flags));
        Ok(PduHeader {
            version,
            pdu_type,
            flags,
            reserved: buf[3],
            session_id: dec.u32()?,
            transaction_id: dec.u32()?,
            packet_id: dec.u32()?,
            payload_length: dec.u32()?,
        })
    }

    fn encode(&self, enc: &mut Encoder, flags: u8, payload_length: usize) {
        enc.u8(self.version);
        enc.u8(self.pdu_type as u8);
        enc.u8(flags);
        enc.u8(self.reserved);
        enc.u32(self.session_id);
        enc.u32(self.transaction_id);
        enc.u32(self.packet_id);
        enc.u32(payload_length as u32);
    }
}

/// Payload length declared by a header, read without validating the rest of it.
///
/// Lets a reader skip a message whose header it cannot otherwise accept.
pub fn declared_payload_length(buf: &[u8]) -> Option<u32> {
    if buf.len() < PDU_HEADER_SIZE {
        return None;
    }
    Decoder::new(&buf[16..PDU_HEADER_SIZE], ByteOrder::from_flags(buf[2]))
        .u32()
        .ok()
}

/// A start/end pair bounding a GetNext search (RFC 2741 §5.2).
///
/// A null `end` means unbounded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchRange {
    pub start: ObjectIdentifier,
    pub end: ObjectIdentifier,
}

impl SearchRange {
    pub fn new(start: ObjectIdentifier, end: ObjectIdentifier) -> Self {
        SearchRange { start, end }
    }

    /// Range starting at `start` with no upper bound.
    pub fn unbounded(start: ObjectIdentifier) -> Self {
        SearchRange {
            start,
            end: ObjectIdentifier::null(),
        }
    }

    fn wire_len(&self) -> usize {
        self.start.wire_len() + self.end.wire_len()
    }

    fn encode(&self, enc: &mut Encoder) -> Result<(), AgentXError> {
        self.start.encode(enc)?;
        self.end.encode(enc)
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self, AgentXError> {
        let start = ObjectIdentifier::decode(dec)?;
        let end = ObjectIdentifier::decode(dec)?;
        Ok(SearchRange { start, end })
    }
}

// --- Typed PDUs ---

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenPdu {
    pub header: PduHeader,
    pub timeout: u8,
    pub id: ObjectIdentifier,
    pub description: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClosePdu {
    pub header: PduHeader,
    pub reason: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterPdu {
    pub header: PduHeader,
    pub context: Option<Vec<u8>>,
    pub timeout: u8,
    pub priority: u8,
    pub range_subid: u8,
    pub subtree: ObjectIdentifier,
    /// Present when `range_subid` is non-zero.
    pub upper_bound: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetPdu {
    pub header: PduHeader,
    pub context: Option<Vec<u8>>,
    pub oids: Vec<ObjectIdentifier>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetNextPdu {
    pub header: PduHeader,
    pub context: Option<Vec<u8>>,
    pub ranges: Vec<SearchRange>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetBulkPdu {
    pub header: PduHeader,
    pub context: Option<Vec<u8>>,
    pub non_repeaters: u16,
    pub max_repetitions: u16,
    pub ranges: Vec<SearchRange>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponsePdu {
    pub header: PduHeader,
    pub sys_up_time: u32,
    pub error: u16,
    pub index: u16,
    pub varbinds: Vec<VarBind>,
}

/// Any AgentX PDU this sub-agent sends or receives.
///
/// PDU types the sub-agent never acts on are carried as [`Pdu::Other`]
/// with their raw payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pdu {
    Open(OpenPdu),
    Close(ClosePdu),
    Register(RegisterPdu),
    Get(GetPdu),
    GetNext(GetNextPdu),
    GetBulk(GetBulkPdu),
    Response(ResponsePdu),
    Other { header: PduHeader, payload: Vec<u8> },
}

fn encode_context(enc: &mut Encoder, context: &Option<Vec<u8>>) {
    if let Some(ctx) = context {
        encode_octet_string(enc, ctx);
    }
}

fn decode_context(
    header: &PduHeader,
    dec: &mut Decoder<'_>,
) -> Result<Option<Vec<u8>>, AgentXError> {
    if header.has_context() {
        Ok(Some(decode_octet_string(dec)?))
    } else {
        Ok(None)
    }
}

fn context_flags(flags: u8, context: &Option<Vec<u8>>) -> u8 {
    if context.is_some() {
        flags | FLAG_NON_DEFAULT_CONTEXT
    } else {
        flags & !FLAG_NON_DEFAULT_CONTEXT
    }
}

impl Pdu {
    pub fn header(&self) -> &PduHeader {
        match self {
            Pdu::Open(p) => &p.header,
            Pdu::Close(p) => &p.header,
            Pdu::Register(p) => &p.header,
            Pdu::Get(p) => &p.header,
            Pdu::GetNext(p) => &p.header,
            Pdu::GetBulk(p) => &p.header,
            Pdu::Response(p) => &p.header,
            Pdu::Other { header, .. } => header,
        }
    }

    fn header_mut(&mut self) -> &mut PduHeader {
        match self {
            Pdu::Open(p) => &mut p.header,
            Pdu::Close(p) => &mut p.header,
            Pdu::Register(p) => &mut p.header,
            Pdu::Get(p) => &mut p.header,
            Pdu::GetNext(p) => &mut p.header,
            Pdu::GetBulk(p) => &mut p.header,
            Pdu::Response(p) => &mut p.header,
            Pdu::Other { header, .. } => header,
        }
    }

    /// Header flags as sent: NON_DEFAULT_CONTEXT follows the context field.
    fn wire_flags(&self) -> u8 {
        let flags = self.header().flags;
        match self {
            Pdu::Register(p) => context_flags(flags, &p.context),
            Pdu::Get(p) => context_flags(flags, &p.context),
            Pdu::GetNext(p) => context_flags(flags, &p.context),
            Pdu::GetBulk(p) => context_flags(flags, &p.context),
            _ => flags,
        }
    }

    /// Encoded payload size in bytes.
    pub fn payload_len(&self) -> usize {
        let context_len = |c: &Option<Vec<u8>>| c.as_ref().map_or(0, |c| octet_string_len(c.len()));
        let ranges_len = |r: &[SearchRange]| r.iter().map(SearchRange::wire_len).sum::<usize>();

        match self {
            Pdu::Open(p) => 4 + p.id.wire_len() + octet_string_len(p.description.len()),
            Pdu::Close(_) => 4,
            Pdu::Register(p) => {
                let upper_bound = if p.range_subid != 0 { 4 } else { 0 };
                context_len(&p.context) + 4 + p.subtree.wire_len() + upper_bound
            }
            Pdu::Get(p) => {
                // Each OID goes out as a range with a null end
                let null_end = ObjectIdentifier::null().wire_len();
                context_len(&p.context)
                    + p.oids.iter().map(|o| o.wire_len() + null_end).sum::<usize>()
            }
            Pdu::GetNext(p) => context_len(&p.context) + ranges_len(&p.ranges),
            Pdu::GetBulk(p) => context_len(&p.context) + 4 + ranges_len(&p.ranges),
            Pdu::Response(p) => p.payload_len(),
            Pdu::Other { payload, .. } => payload.len(),
        }
    }

    /// Makes the header describe the payload as it will be encoded:
    /// `payload_length` and the NON_DEFAULT_CONTEXT flag.
    ///
    /// A sealed PDU decodes back to itself.
    pub fn seal(&mut self) {
        let flags = self.wire_flags();
        let payload_length = self.payload_len() as u32;
        let header = self.header_mut();
        header.flags = flags;
        header.payload_length = payload_length;
    }

    pub fn sealed(mut self) -> Self {
        self.seal();
        self
    }

    /// Encodes a complete AgentX PDU (header + payload).
    ///
    /// The payload length and the NON_DEFAULT_CONTEXT flag are derived from
    /// the payload, whatever the header struct says. Fails only for an OID
    /// too long for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, AgentXError> {
        let header = self.header();
        let mut payload = Encoder::new(header.byte_order());

        match self {
            Pdu::Open(p) => {
                payload.u8(p.timeout);
                payload.bytes(&[0, 0, 0]); // reserved
                p.id.encode(&mut payload)?;
                encode_octet_string(&mut payload, &p.description);
            }
            Pdu::Close(p) => {
                payload.u8(p.reason);
                payload.bytes(&[0, 0, 0]);
            }
            Pdu::Register(p) => {
                encode_context(&mut payload, &p.context);
                payload.u8(p.timeout);
                payload.u8(p.priority);
                payload.u8(p.range_subid);
                payload.u8(0);
                p.subtree.encode(&mut payload)?;
                if p.range_subid != 0 {
                    payload.u32(p.upper_bound.unwrap_or(0));
                }
            }
            Pdu::Get(p) => {
                encode_context(&mut payload, &p.context);
                for oid in &p.oids {
                    SearchRange::unbounded(oid.clone()).encode(&mut payload)?;
                }
            }
            Pdu::GetNext(p) => {
                encode_context(&mut payload, &p.context);
                for range in &p.ranges {
                    range.encode(&mut payload)?;
                }
            }
            Pdu::GetBulk(p) => {
                encode_context(&mut payload, &p.context);
                payload.u16(p.non_repeaters);
                payload.u16(p.max_repetitions);
                for range in &p.ranges {
                    range.encode(&mut payload)?;
                }
            }
            Pdu::Response(p) => {
                payload.u32(p.sys_up_time);
                payload.u16(p.error);
                payload.u16(p.index);
                for vb in &p.varbinds {
                    vb.encode(&mut payload)?;
                }
            }
            Pdu::Other { payload: raw, .. } => payload.bytes(raw),
        }

        let mut enc = Encoder::new(header.byte_order());
        header.encode(&mut enc, self.wire_flags(), payload.len());
        enc.bytes(&payload.into_vec());
        Ok(enc.into_vec())
    }

    /// Decodes one complete PDU, checking the declared payload length against the buffer.
    pub fn decode(buf: &[u8]) -> Result<Pdu, AgentXError> {
        let header = PduHeader::decode(buf)?;
        let payload = &buf[PDU_HEADER_SIZE..];
        if payload.len() != header.payload_length as usize {
            return Err(AgentXError::malformed(format!(
                "declared payload length {} but {} bytes follow the header",
                header.payload_length,
                payload.len()
            )));
        }
        Self::decode_payload(header, payload)
    }

    /// Decodes the payload belonging to an already decoded header.
    pub fn decode_payload(header: PduHeader, payload: &[u8]) -> Result<Pdu, AgentXError> {
        if payload.len() != header.payload_length as usize {
            return Err(AgentXError::malformed(format!(
                "declared payload length {} but got {}",
                header.payload_length,
                payload.len()
            )));
        }
        let mut dec = Decoder::new(payload, header.byte_order());

        let pdu = match header.pdu_type {
            PduType::Open => {
                let timeout = dec.u8()?;
                dec.take(3)?;
                let id = ObjectIdentifier::decode(&mut dec)?;
                let description = decode_octet_string(&mut dec)?;
                Pdu::Open(OpenPdu {
                    header,
                    timeout,
                    id,
                    description,
                })
            }
            PduType::Close => {
                let reason = dec.u8()?;
                dec.take(3)?;
                Pdu::Close(ClosePdu { header, reason })
            }
            PduType::Register => {
                let context = decode_context(&header, &mut dec)?;
                let timeout = dec.u8()?;
                let priority = dec.u8()?;
                let range_subid = dec.u8()?;
                dec.u8()?;
                let subtree = ObjectIdentifier::decode(&mut dec)?;
                let upper_bound = if range_subid != 0 {
                    Some(dec.u32()?)
                } else {
                    None
                };
                Pdu::Register(RegisterPdu {
                    header,
                    context,
                    timeout,
                    priority,
                    range_subid,
                    subtree,
                    upper_bound,
                })
            }
            PduType::Get => {
                let context = decode_context(&header, &mut dec)?;
                let mut oids = Vec::new();
                while !dec.is_empty() {
                    oids.push(SearchRange::decode(&mut dec)?.start);
                }
                Pdu::Get(GetPdu {
                    header,
                    context,
                    oids,
                })
            }
            PduType::GetNext => {
                let context = decode_context(&header, &mut dec)?;
                let mut ranges = Vec::new();
                while !dec.is_empty() {
                    ranges.push(SearchRange::decode(&mut dec)?);
                }
                Pdu::GetNext(GetNextPdu {
                    header,
                    context,
                    ranges,
                })
            }
            PduType::GetBulk => {
                let context = decode_context(&header, &mut dec)?;
                let non_repeaters = dec.u16()?;
                let max_repetitions = dec.u16()?;
                let mut ranges = Vec::new();
                while !dec.is_empty() {
                    ranges.push(SearchRange::decode(&mut dec)?);
                }
                Pdu::GetBulk(GetBulkPdu {
                    header,
                    context,
                    non_repeaters,
                    max_repetitions,
                    ranges,
                })
            }
            PduType::Response => {
                let sys_up_time = dec.u32()?;
                let error = dec.u16()?;
                let index = dec.u16()?;
                let mut varbinds = Vec::new();
                while !dec.is_empty() {
                    varbinds.push(VarBind::decode(&mut dec)?);
                }
                Pdu::Response(ResponsePdu {
                    header,
                    sys_up_time,
                    error,
                    index,
                    varbinds,
                })
            }
            _ => {
                let raw = dec.take(dec.remaining())?.to_vec();
                Pdu::Other {
                    header,
                    payload: raw,
                }
            }
        };

        if !dec.is_empty() {
            return Err(AgentXError::malformed(format!(
                "{} trailing bytes after {:?} payload",
                dec.remaining(),
                pdu.header().pdu_type
            )));
        }
        Ok(pdu)
    }

    /// Answers a request PDU from the MIB table.
    ///
    /// Returns `None` for PDUs that are not requests for data.
    pub fn make_response(&self, table: &MibTable) -> Option<ResponsePdu> {
        match self {
            Pdu::Get(p) => Some(p.make_response(table)),
            Pdu::GetNext(p) => Some(p.make_response(table)),
            Pdu::GetBulk(p) => Some(p.make_response(table)),
            _ => None,
        }
    }
}

impl GetPdu {
    /// Resolves every requested OID exactly, preserving request order.
    pub fn make_response(&self, table: &MibTable) -> ResponsePdu {
        let view = table.view();
        let varbinds = self.oids.iter().map(|oid| view.lookup(oid)).collect();
        ResponsePdu::answering(&self.header, table.sys_up_time(), varbinds)
    }
}

impl GetNextPdu {
    /// Resolves the successor of every search range, preserving request order.
    pub fn make_response(&self, table: &MibTable) -> ResponsePdu {
        let view = table.view();
        let varbinds = self
            .ranges
            .iter()
            .map(|range| view.next_in_range(range))
            .collect();
        ResponsePdu::answering(&self.header, table.sys_up_time(), varbinds)
    }
}

impl GetBulkPdu {
    /// Non-repeaters get a single GetNext; the remaining ranges are walked
    /// up to `max_repetitions` times each.
    pub fn make_response(&self, table: &MibTable) -> ResponsePdu {
        let view = table.view();
        let non_repeaters = (self.non_repeaters as usize).min(self.ranges.len());

        let mut varbinds: Vec<VarBind> = self.ranges[..non_repeaters]
            .iter()
            .map(|range| view.next_in_range(range))
            .collect();

        for range in &self.ranges[non_repeaters..] {
            walk_range(&view, range, self.max_repetitions, &mut varbinds);
        }

        ResponsePdu::answering(&self.header, table.sys_up_time(), varbinds)
    }
}

fn walk_range(view: &MibView, range: &SearchRange, max_repetitions: u16, out: &mut Vec<VarBind>) {
    let mut current = range.clone();
    for _ in 0..max_repetitions {
        let vb = view.next_in_range(&current);
        let is_end = matches!(vb.value, VarBindValue::EndOfMibView);
        current = SearchRange::new(vb.oid.clone(), range.end.clone());
        out.push(vb);
        if is_end {
            break;
        }
    }
}

impl ResponsePdu {
    fn with_error(
        request: &PduHeader,
        sys_up_time: u32,
        error: u16,
        index: u16,
        varbinds: Vec<VarBind>,
    ) -> Self {
        let mut response = ResponsePdu {
            header: request.response_header(),
            sys_up_time,
            error,
            index,
            varbinds,
        };
        response.header.payload_length = response.payload_len() as u32;
        response
    }

    /// Builds a Response echoing the request's session, transaction and packet ids.
    pub fn answering(request: &PduHeader, sys_up_time: u32, varbinds: Vec<VarBind>) -> Self {
        Self::with_error(request, sys_up_time, RES_NO_ERROR, 0, varbinds)
    }

    /// Response to a request whose payload could not be parsed.
    pub fn parse_error(request: &PduHeader, sys_up_time: u32) -> Self {
        Self::with_error(request, sys_up_time, RES_PARSE_ERROR, 0, Vec::new())
    }

    /// Response refusing a TestSet: nothing here is writable.
    pub fn not_writable(request: &PduHeader, sys_up_time: u32) -> Self {
        Self::with_error(request, sys_up_time, RES_NOT_WRITABLE, 1, Vec::new())
    }

    /// Response to a request whose answer could not be encoded.
    pub fn gen_err(request: &PduHeader, sys_up_time: u32) -> Self {
        Self::with_error(request, sys_up_time, RES_GEN_ERR, 0, Vec::new())
    }

    fn payload_len(&self) -> usize {
        8 + self.varbinds.iter().map(VarBind::wire_len).sum::<usize>()
    }

    pub fn encode(&self) -> Result<Vec<u8>, AgentXError> {
        Pdu::Response(self.clone()).encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snmp::encodings::NETWORK_BYTE_ORDER;
    use crate::snmp::mib::testing::static_table;

    fn get_header(pdu_type: PduType) -> PduHeader {
        PduHeader::new(pdu_type, NETWORK_BYTE_ORDER, 42, 7, 99)
    }

    fn oid(subs: &[u32]) -> ObjectIdentifier {
        ObjectIdentifier::from_slice(subs)
    }

    #[test]
    fn test_pdu_header_encode_decode() {
        let pdu = Pdu::Close(ClosePdu {
            header: get_header(PduType::Close),
            reason: REASON_SHUTDOWN,
        });
        let bytes = pdu.encode().unwrap();
        assert_eq!(bytes.len(), PDU_HEADER_SIZE + 4);
        let header = PduHeader::decode(&bytes).unwrap();
        assert_eq!(header.version, AGENTX_VERSION);
        assert_eq!(header.pdu_type, PduType::Close);
        assert_eq!(header.session_id, 42);
        assert_eq!(header.transaction_id, 7);
        assert_eq!(header.packet_id, 99);
        assert_eq!(header.payload_length, 4);
    }

    #[test]
    fn test_header_little_endian() {
        let header = PduHeader::new(PduType::Get, 0, 0x01020304, 0, 0);
        let bytes = Pdu::Get(GetPdu {
            header,
            context: None,
            oids: vec![],
        })
        .encode()
        .unwrap();
        assert_eq!(&bytes[4..8], &[4, 3, 2, 1]);
        assert_eq!(PduHeader::decode(&bytes).unwrap().session_id, 0x01020304);
    }

    #[test]
    fn test_get_pdu_decode_roundtrip() {
        let pdu = Pdu::Get(GetPdu {
            header: get_header(PduType::Get),
            context: None,
            oids: vec![oid(&[1, 3, 6, 1, 4, 1, 9, 1]), oid(&[1, 3, 6, 1, 2, 1, 1, 3, 0])],
        });
        let bytes = pdu.encode().unwrap();
        let decoded = Pdu::decode(&bytes).unwrap();
        assert_eq!(decoded.encode().unwrap(), bytes);
        match decoded {
            Pdu::Get(get) => {
                assert_eq!(get.oids.len(), 2);
                assert_eq!(get.oids[1], oid(&[1, 3, 6, 1, 2, 1, 1, 3, 0]));
                assert_eq!(get.header.payload_length as usize, bytes.len() - PDU_HEADER_SIZE);
            }
            other => panic!("Expected Get, got {:?}", other),
        }
    }

    #[test]
    fn test_get_pdu_with_context() {
        let pdu = Pdu::GetNext(GetNextPdu {
            header: get_header(PduType::GetNext),
            context: Some(b"asic0".to_vec()),
            ranges: vec![SearchRange::unbounded(oid(&[1, 3, 6, 1]))],
        });
        let bytes = pdu.encode().unwrap();
        assert_ne!(bytes[2] & FLAG_NON_DEFAULT_CONTEXT, 0);
        match Pdu::decode(&bytes).unwrap() {
            Pdu::GetNext(p) => assert_eq!(p.context.as_deref(), Some(&b"asic0"[..])),
            other => panic!("Expected GetNext, got {:?}", other),
        }
    }

    #[test]
    fn test_payload_length_mismatch() {
        let mut bytes = Pdu::Get(GetPdu {
            header: get_header(PduType::Get),
            context: None,
            oids: vec![oid(&[1, 3, 6, 1, 4, 1])],
        })
        .encode()
        .unwrap();
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(
            Pdu::decode(&bytes),
            Err(AgentXError::MalformedPdu(_))
        ));
    }

    #[test]
    fn test_truncated_search_range() {
        let full = Pdu::Get(GetPdu {
            header: get_header(PduType::Get),
            context: None,
            oids: vec![oid(&[1, 3, 6, 1, 4, 1])],
        })
        .encode()
        .unwrap();
        // Claim a shorter payload so the length check passes but the OID is cut
        let mut header = PduHeader::decode(&full).unwrap();
        header.payload_length = 6;
        let cut = &full[PDU_HEADER_SIZE..PDU_HEADER_SIZE + 6];
        let err = Pdu::decode_payload(header, cut).unwrap_err();
        assert!(matches!(err, AgentXError::MalformedPdu(_)));
        assert!(!err.is_header_error());
    }

    #[test]
    fn test_header_errors() {
        let mut bytes = Pdu::Close(ClosePdu {
            header: get_header(PduType::Close),
            reason: REASON_SHUTDOWN,
        })
        .encode()
        .unwrap();
        bytes[1] = 99;
        let err = Pdu::decode(&bytes).unwrap_err();
        assert!(matches!(err, AgentXError::UnknownPduType(99)));
        assert!(err.is_header_error());

        bytes[0] = 2;
        assert!(matches!(
            Pdu::decode(&bytes),
            Err(AgentXError::UnsupportedVersion(2))
        ));
        assert!(matches!(
            PduHeader::decode(&bytes[..12]),
            Err(AgentXError::MalformedPdu(_))
        ));
    }

    #[test]
    fn test_open_register_response_decode() {
        let open = Pdu::Open(OpenPdu {
            header: get_header(PduType::Open),
            timeout: 5,
            id: ObjectIdentifier::null(),
            description: b"qos-subagent".to_vec(),
        });
        let register = Pdu::Register(RegisterPdu {
            header: get_header(PduType::Register),
            context: None,
            timeout: 5,
            priority: 127,
            range_subid: 0,
            subtree: oid(&[1, 3, 6, 1, 4, 1, 9, 9, 580, 1, 5, 5, 1, 4]),
            upper_bound: None,
        });
        let response = Pdu::Response(ResponsePdu {
            header: get_header(PduType::Response),
            sys_up_time: 1234,
            error: RES_NO_ERROR,
            index: 0,
            varbinds: vec![VarBind::new(oid(&[1, 3, 6, 1, 4, 1, 9]), VarBindValue::Counter64(7))],
        });
        for pdu in [open, register, response] {
            let bytes = pdu.encode().unwrap();
            let decoded = Pdu::decode(&bytes).unwrap();
            assert_eq!(decoded.encode().unwrap(), bytes);
        }
    }

    #[test]
    fn test_unhandled_pdu_type_kept_raw() {
        let ping = Pdu::Other {
            header: get_header(PduType::Ping),
            payload: vec![],
        };
        let decoded = Pdu::decode(&ping.encode().unwrap()).unwrap();
        assert!(
            matches!(decoded, Pdu::Other { ref header, .. } if header.pdu_type == PduType::Ping)
        );
        assert!(decoded.make_response(&static_table()).is_none());
    }

    #[test]
    fn test_get_response_preserves_order_and_ids() {
        let table = static_table();
        let request = GetPdu {
            header: get_header(PduType::Get),
            context: None,
            oids: vec![
                oid(&[1, 3, 6, 1, 4, 1, 99999, 1, 2]),
                oid(&[1, 3, 6, 1, 4, 1, 12345]),
                oid(&[1, 3, 6, 1, 4, 1, 99999, 1, 1]),
            ],
        };
        let response = request.make_response(&table);
        assert_eq!(response.header.pdu_type, PduType::Response);
        assert_eq!(response.header.session_id, 42);
        assert_eq!(response.header.transaction_id, 7);
        assert_eq!(response.header.packet_id, 99);
        assert_eq!(response.varbinds.len(), 3);
        assert_eq!(response.varbinds[0].value, VarBindValue::Counter32(2));
        assert_eq!(response.varbinds[1].value, VarBindValue::NoSuchObject);
        assert_eq!(response.varbinds[2].value, VarBindValue::Counter32(1));
        for (vb, requested) in response.varbinds.iter().zip(&request.oids) {
            assert_eq!(&vb.oid, requested);
        }
    }

    #[test]
    fn test_get_bulk_walks_repeaters() {
        let table = static_table();
        let request = GetBulkPdu {
            header: get_header(PduType::GetBulk),
            context: None,
            non_repeaters: 1,
            max_repetitions: 5,
            ranges: vec![
                SearchRange::unbounded(oid(&[1, 3, 6, 1, 4, 1, 99999])),
                SearchRange::unbounded(oid(&[1, 3, 6, 1, 4, 1, 99999, 1, 1])),
            ],
        };
        let response = request.make_response(&table);
        let oids: Vec<_> = response.varbinds.iter().map(|vb| vb.oid.clone()).collect();
        assert_eq!(
            oids,
            vec![
                oid(&[1, 3, 6, 1, 4, 1, 99999, 1, 1]),
                oid(&[1, 3, 6, 1, 4, 1, 99999, 1, 2]),
                oid(&[1, 3, 6, 1, 4, 1, 99999, 1, 3]),
                oid(&[1, 3, 6, 1, 4, 1, 99999, 1, 3]),
            ]
        );
        assert_eq!(response.varbinds[3].value, VarBindValue::EndOfMibView);
    }

    #[test]
    fn test_declared_payload_length_ignores_bad_type() {
        let mut bytes = Pdu::Close(ClosePdu {
            header: PduHeader::new(PduType::Close, 0, 1, 2, 3),
            reason: REASON_SHUTDOWN,
        })
        .encode()
        .unwrap();
        bytes[1] = 200;
        assert_eq!(declared_payload_length(&bytes), Some(4));
        assert_eq!(declared_payload_length(&bytes[..10]), None);
    }

    #[test]
    fn test_parse_error_response() {
        let request = get_header(PduType::Get);
        let bytes = ResponsePdu::parse_error(&request, 10).encode().unwrap();
        match Pdu::decode(&bytes).unwrap() {
            Pdu::Response(r) => {
                assert_eq!(r.error, RES_PARSE_ERROR);
                assert!(r.varbinds.is_empty());
                assert_eq!(r.header.packet_id, 99);
            }
            other => panic!("Expected Response, got {:?}", other),
        }
    }

    #[test]
    fn test_sealed_pdus_decode_to_themselves() {
        let get = Pdu::Get(GetPdu {
            header: get_header(PduType::Get),
            context: Some(b"asic1".to_vec()),
            oids: vec![oid(&[1, 3, 6, 1, 4, 1, 9, 1]), oid(&[2, 5])],
        })
        .sealed();
        assert_ne!(get.header().flags & FLAG_NON_DEFAULT_CONTEXT, 0);

        let bulk = Pdu::GetBulk(GetBulkPdu {
            // A stale context flag is cleared when there is no context
            header: PduHeader::new(PduType::GetBulk, FLAG_NON_DEFAULT_CONTEXT, 1, 2, 3),
            context: None,
            non_repeaters: 0,
            max_repetitions: 10,
            ranges: vec![SearchRange {
                start: oid(&[1, 3, 6, 1, 4, 1]).with_include(true),
                end: oid(&[1, 3, 6, 1, 5]),
            }],
        })
        .sealed();
        assert_eq!(bulk.header().flags, 0);

        let register = Pdu::Register(RegisterPdu {
            header: get_header(PduType::Register),
            context: None,
            timeout: 0,
            priority: 127,
            range_subid: 14,
            subtree: oid(&[1, 3, 6, 1, 4, 1, 9, 9, 580, 1, 5, 5, 1, 4, 1]),
            upper_bound: Some(64),
        })
        .sealed();

        for pdu in [get, bulk, register] {
            let bytes = pdu.encode().unwrap();
            assert_eq!(pdu.header().payload_length as usize, bytes.len() - PDU_HEADER_SIZE);
            assert_eq!(pdu.payload_len(), bytes.len() - PDU_HEADER_SIZE);
            assert_eq!(Pdu::decode(&bytes).unwrap(), pdu);
        }
    }

    #[test]
    fn test_answering_matches_wire() {
        let request = get_header(PduType::GetNext);
        let response = ResponsePdu::answering(
            &request,
            77,
            vec![
                VarBind::new(oid(&[1, 3, 6, 1, 4, 1, 9]), VarBindValue::Counter64(u64::MAX)),
                VarBind::new(oid(&[1, 3, 6, 1, 2]), VarBindValue::OctetString(b"abc".to_vec())),
                VarBind::new(oid(&[1, 3, 6, 1, 9]), VarBindValue::EndOfMibView),
            ],
        );
        let bytes = response.encode().unwrap();
        assert_eq!(response.header.payload_length as usize, bytes.len() - PDU_HEADER_SIZE);
        assert_eq!(Pdu::decode(&bytes).unwrap(), Pdu::Response(response));

        let refused = ResponsePdu::not_writable(&request, 0);
        let bytes = refused.encode().unwrap();
        assert_eq!(Pdu::decode(&bytes).unwrap(), Pdu::Response(refused));
    }

    #[test]
    fn test_encode_rejects_oversized_oid() {
        let response = ResponsePdu::answering(
            &get_header(PduType::Get),
            0,
            vec![VarBind::new(
                ObjectIdentifier::new(vec![7; 200]),
                VarBindValue::Integer(1),
            )],
        );
        assert!(matches!(response.encode(), Err(AgentXError::OidTooLong(200))));

        let gen_err = ResponsePdu::gen_err(&response.header, 0);
        match Pdu::decode(&gen_err.encode().unwrap()).unwrap() {
            Pdu::Response(r) => assert_eq!(r.error, RES_GEN_ERR),
            other => panic!("Expected Response, got {:?}", other),
        }
    }
}
