//! Typed VarBind values (RFC 2741 §5.4).

use super::{
    encodings::{
        decode_octet_string, encode_octet_string, octet_string_len, Decoder, Encoder,
        ObjectIdentifier,
    },
    error::AgentXError,
};

/// VarBind type discriminants as carried on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ValueType {
    Integer = 2,
    OctetString = 4,
    Null = 5,
    ObjectIdentifier = 6,
    IpAddress = 64,
    Counter32 = 65,
    Gauge32 = 66,
    TimeTicks = 67,
    Opaque = 68,
    Counter64 = 70,
    NoSuchObject = 128,
    NoSuchInstance = 129,
    EndOfMibView = 130,
}

impl TryFrom<u16> for ValueType {
    type Error = AgentXError;

    fn try_from(tag: u16) -> Result<Self, Self::Error> {
        Ok(match tag {
            2 => ValueType::Integer,
            4 => ValueType::OctetString,
            5 => ValueType::Null,
            6 => ValueType::ObjectIdentifier,
            64 => ValueType::IpAddress,
            65 => ValueType::Counter32,
            66 => ValueType::Gauge32,
            67 => ValueType::TimeTicks,
            68 => ValueType::Opaque,
            70 => ValueType::Counter64,
            128 => ValueType::NoSuchObject,
            129 => ValueType::NoSuchInstance,
            130 => ValueType::EndOfMibView,
            other => {
                return Err(AgentXError::malformed(format!(
                    "invalid VarBind type tag {}",
                    other
                )))
            }
        })
    }
}

/// An SNMP variable binding value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VarBindValue {
    Integer(i32),
    OctetString(Vec<u8>),
    Null,
    ObjectIdentifier(ObjectIdentifier),
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

impl VarBindValue {
    /// Builds a Counter64 from a possibly wider raw counter.
    ///
    /// Inputs above `u64::MAX` wrap modulo 2^64, the same way the hardware
    /// counter would have.
    pub fn counter64_wrapping(raw: u128) -> Self {
        VarBindValue::Counter64(raw as u64)
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            VarBindValue::Integer(_) => ValueType::Integer,
            VarBindValue::OctetString(_) => ValueType::OctetString,
            VarBindValue::Null => ValueType::Null,
            VarBindValue::ObjectIdentifier(_) => ValueType::ObjectIdentifier,
            VarBindValue::IpAddress(_) => ValueType::IpAddress,
            VarBindValue::Counter32(_) => ValueType::Counter32,
            VarBindValue::Gauge32(_) => ValueType::Gauge32,
            VarBindValue::TimeTicks(_) => ValueType::TimeTicks,
            VarBindValue::Opaque(_) => ValueType::Opaque,
            VarBindValue::Counter64(_) => ValueType::Counter64,
            VarBindValue::NoSuchObject => ValueType::NoSuchObject,
            VarBindValue::NoSuchInstance => ValueType::NoSuchInstance,
            VarBindValue::EndOfMibView => ValueType::EndOfMibView,
        }
    }

    /// Encoded size of the data field.
    pub fn wire_len(&self) -> usize {
        match self {
            VarBindValue::Integer(_)
            | VarBindValue::Counter32(_)
            | VarBindValue::Gauge32(_)
            | VarBindValue::TimeTicks(_) => 4,
            VarBindValue::Counter64(_) => 8,
            VarBindValue::OctetString(v) | VarBindValue::Opaque(v) => octet_string_len(v.len()),
            VarBindValue::IpAddress(v) => octet_string_len(v.len()),
            VarBindValue::ObjectIdentifier(v) => v.wire_len(),
            VarBindValue::Null
            | VarBindValue::NoSuchObject
            | VarBindValue::NoSuchInstance
            | VarBindValue::EndOfMibView => 0,
        }
    }

    /// True for the NoSuchObject / NoSuchInstance / EndOfMibView pseudo-values.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            VarBindValue::NoSuchObject | VarBindValue::NoSuchInstance | VarBindValue::EndOfMibView
        )
    }
}

/// A variable binding (OID + value).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VarBind {
    pub oid: ObjectIdentifier,
    pub value: VarBindValue,
}

impl VarBind {
    pub fn new(oid: ObjectIdentifier, value: VarBindValue) -> Self {
        VarBind { oid, value }
    }

    /// Encoded size in bytes.
    pub fn wire_len(&self) -> usize {
        4 + self.oid.wire_len() + self.value.wire_len()
    }

    /// Encodes a VarBind: type(2) + reserved(2) + name + data.
    pub fn encode(&self, enc: &mut Encoder) -> Result<(), AgentXError> {
        enc.u16(self.value.value_type() as u16);
        enc.u16(0); // reserved
        self.oid.encode_with_include(enc, false)?;

        match &self.value {
            VarBindValue::Integer(v) => enc.u32(*v as u32),
            VarBindValue::OctetString(v) | VarBindValue::Opaque(v) => encode_octet_string(enc, v),
            VarBindValue::IpAddress(v) => encode_octet_string(enc, v),
            VarBindValue::ObjectIdentifier(v) => v.encode(enc)?,
            VarBindValue::Counter32(v) | VarBindValue::Gauge32(v) | VarBindValue::TimeTicks(v) => {
                enc.u32(*v)
            }
            VarBindValue::Counter64(v) => enc.u64(*v),
            VarBindValue::Null
            | VarBindValue::NoSuchObject
            | VarBindValue::NoSuchInstance
            | VarBindValue::EndOfMibView => {}
        }
        Ok(())
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, AgentXError> {
        let value_type = ValueType::try_from(dec.u16()?)?;
        let _reserved = dec.u16()?;
        let oid = ObjectIdentifier::decode(dec)?;

        let value = match value_type {
            ValueType::Integer => VarBindValue::Integer(dec.u32()? as i32),
            ValueType::OctetString => VarBindValue::OctetString(decode_octet_string(dec)?),
            ValueType::Opaque => VarBindValue::Opaque(decode_octet_string(dec)?),
            ValueType::IpAddress => {
                let raw = decode_octet_string(dec)?;
                let addr: [u8; 4] = raw.as_slice().try_into().map_err(|_| {
                    AgentXError::malformed(format!("IpAddress of {} octets", raw.len()))
                })?;
                VarBindValue::IpAddress(addr)
            }
            ValueType::ObjectIdentifier => {
                VarBindValue::ObjectIdentifier(ObjectIdentifier::decode(dec)?)
            }
            ValueType::Counter32 => VarBindValue::Counter32(dec.u32()?),
            ValueType::Gauge32 => VarBindValue::Gauge32(dec.u32()?),
            ValueType::TimeTicks => VarBindValue::TimeTicks(dec.u32()?),
            ValueType::Counter64 => VarBindValue::Counter64(dec.u64()?),
            ValueType::Null => VarBindValue::Null,
            ValueType::NoSuchObject => VarBindValue::NoSuchObject,
            ValueType::NoSuchInstance => VarBindValue::NoSuchInstance,
            ValueType::EndOfMibView => VarBindValue::EndOfMibView,
        };

        Ok(VarBind { oid, value })
    }
}
