//! Struct marshaling between native fixed-layout records and domain types
//!
//! Every native record is declared once as a [`Schema`]: an ordered list of
//! typed fields, each tagged with the first [`Capability`] level that carries
//! it. Offsets follow the RAS headers' 4-byte packing. Decoding and encoding
//! skip the fields that are newer than the capability tag, so a record laid out
//! for an older level is never read past its allocation.
//!
//! Domain types implement [`NativeRecord`] to convert to and from the
//! [`FieldValues`] a schema produces.

use crate::capability::Capability;
use crate::error::{RasError, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use uuid::Uuid;

/// Newtype over a native `DWORD` bit mask with named flags
macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $( $flag:ident = $value:expr ),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(pub u32);

        impl $name {
            $( pub const $flag: $name = $name($value); )*

            pub fn bits(self) -> u32 {
                self.0
            }

            pub fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn insert(&mut self, other: $name) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: $name) {
                self.0 &= !other.0;
            }

            pub fn set(&mut self, other: $name, on: bool) {
                if on {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;

            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }
    };
}

pub mod connection;
pub mod credentials;
pub mod dial_params;
pub mod entry;
pub mod projection;
pub mod status;

pub use connection::{ConnectionFlags, EntryName, RasConnection, RasDevice};
pub use credentials::{Credentials, PskRole};
pub use dial_params::{DialExtensions, DialOptions, DialParams};
pub use entry::{
    DialMode, EncryptionType, Entry, EntryOptions, EntryOptions2, EntryType, FramingProtocol,
    NetworkProtocols, VpnStrategy,
};
pub use projection::{
    CcpProjection, Ikev2Projection, IpProjection, IpxProjection, Ipv6Projection, LcpProjection,
    NbfProjection, PppProjection, Projection, ProjectionInfo, ProjectionInfoEx,
};
pub use status::{ConnectionState, ConnectionStatus, ConnectionSubState, LinkStatistics};

/// Maximum member alignment in the native headers (`#pragma pack(4)`)
pub const PACK: usize = 4;

/// Name of the leading size/version field every record carries
pub const SIZE_FIELD: &str = "dwSize";

/// Native field types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    U8,
    U16,
    U32,
    I32,
    /// Native `DWORD` counter widened to `i64`
    Counter,
    /// Native `BOOL`
    Bool,
    /// Pointer-sized handle or `ULONG_PTR`
    Handle,
    Guid,
    Luid,
    /// Fixed array of `n` UTF-16 units, terminator included
    WStr(usize),
    Bytes(usize),
    Ipv4,
    Ipv6,
    /// `RASTUNNELENDPOINT`: `DWORD` tag followed by a 16-byte address union
    Endpoint,
}

impl FieldType {
    pub fn size(self) -> usize {
        match self {
            FieldType::U8 => 1,
            FieldType::U16 => 2,
            FieldType::U32 | FieldType::I32 | FieldType::Counter | FieldType::Bool => 4,
            FieldType::Handle => std::mem::size_of::<usize>(),
            FieldType::Guid => 16,
            FieldType::Luid => 8,
            FieldType::WStr(n) => n * 2,
            FieldType::Bytes(n) => n,
            FieldType::Ipv4 => 4,
            FieldType::Ipv6 => 16,
            FieldType::Endpoint => 20,
        }
    }

    pub fn align(self) -> usize {
        let natural = match self {
            FieldType::U8 | FieldType::Bytes(_) => 1,
            FieldType::U16 | FieldType::WStr(_) | FieldType::Ipv6 => 2,
            FieldType::Handle => std::mem::size_of::<usize>(),
            FieldType::Luid | FieldType::Guid => 4,
            _ => 4,
        };
        natural.min(PACK)
    }
}

/// One declared field of a native record
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub since: Capability,
}

impl FieldSpec {
    pub const fn new(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            since: Capability::Legacy,
        }
    }

    pub const fn since(mut self, since: Capability) -> Self {
        self.since = since;
        self
    }
}

/// Decoded field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    U8(u8),
    U16(u16),
    U32(u32),
    I32(i32),
    Int(i64),
    Bool(bool),
    Handle(usize),
    Guid(Uuid),
    Luid(u64),
    Str(String),
    Bytes(Vec<u8>),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Endpoint(Option<IpAddr>),
}

/// Named field values of one record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldValues {
    values: Vec<(&'static str, FieldValue)>,
}

macro_rules! typed_getters {
    ($( $get:ident, $opt:ident, $variant:ident, $ty:ty );* $(;)?) => {
        $(
            pub fn $opt(&self, name: &str) -> Option<$ty> {
                match self.get(name) {
                    Some(FieldValue::$variant(v)) => Some(v.clone()),
                    _ => None,
                }
            }

            pub fn $get(&self, name: &str) -> Result<$ty> {
                self.$opt(name).ok_or_else(|| {
                    RasError::MalformedRecord(format!(
                        "field '{name}' missing or not {}",
                        stringify!($variant)
                    ))
                })
            }
        )*
    };
}

impl FieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: FieldValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &'static str, value: FieldValue) {
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    typed_getters! {
        u8, opt_u8, U8, u8;
        u16, opt_u16, U16, u16;
        u32, opt_u32, U32, u32;
        i32, opt_i32, I32, i32;
        int, opt_int, Int, i64;
        bool, opt_bool, Bool, bool;
        handle, opt_handle, Handle, usize;
        guid, opt_guid, Guid, Uuid;
        luid, opt_luid, Luid, u64;
        string, opt_string, Str, String;
        bytes, opt_bytes, Bytes, Vec<u8>;
        ipv4, opt_ipv4, Ipv4, Ipv4Addr;
        ipv6, opt_ipv6, Ipv6, Ipv6Addr;
    }

    /// Tunnel endpoint; absent fields and unknown tags both read as `None`
    pub fn endpoint(&self, name: &str) -> Option<IpAddr> {
        match self.get(name) {
            Some(FieldValue::Endpoint(addr)) => *addr,
            _ => None,
        }
    }
}

/// Declared layout of a native record
#[derive(Debug)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) / align * align
}

impl Schema {
    /// Fields present at capability `cap`
    pub fn active(&self, cap: Capability) -> impl Iterator<Item = &FieldSpec> + '_ {
        self.fields.iter().filter(move |f| f.since <= cap)
    }

    /// Record alignment at capability `cap`
    pub fn align(&self, cap: Capability) -> usize {
        self.active(cap).map(|f| f.ty.align()).max().unwrap_or(1)
    }

    /// Offset of `name` at capability `cap`, if present
    pub fn offset_of(&self, name: &str, cap: Capability) -> Option<usize> {
        let mut offset = 0;
        for field in self.active(cap) {
            offset = align_up(offset, field.ty.align());
            if field.name == name {
                return Some(offset);
            }
            offset += field.ty.size();
        }
        None
    }

    /// Native record size (`sizeof`) at capability `cap`
    pub fn size(&self, cap: Capability) -> usize {
        let mut offset = 0;
        for field in self.active(cap) {
            offset = align_up(offset, field.ty.align()) + field.ty.size();
        }
        align_up(offset, self.align(cap))
    }

    pub fn decode(&self, bytes: &[u8], cap: Capability) -> Result<FieldValues> {
        let size = self.size(cap);
        if bytes.len() < size {
            return Err(RasError::MalformedRecord(format!(
                "{} needs {} bytes at capability {}, got {}",
                self.name,
                size,
                cap,
                bytes.len()
            )));
        }

        let mut cur = &bytes[..size];
        let mut offset = 0;
        let mut values = FieldValues::new();
        for field in self.active(cap) {
            let aligned = align_up(offset, field.ty.align());
            cur.advance(aligned - offset);
            let value = decode_field(&mut cur, field.ty);
            offset = aligned + field.ty.size();
            values.values.push((field.name, value));
        }
        Ok(values)
    }

    /// Encode `values` at capability `cap`. Missing fields are zero; the size
    /// field is always stamped with the record size.
    pub fn encode(&self, values: &FieldValues, cap: Capability) -> Result<Vec<u8>> {
        let size = self.size(cap);
        let mut buf = BytesMut::with_capacity(size);
        for field in self.active(cap) {
            let aligned = align_up(buf.len(), field.ty.align());
            buf.put_bytes(0, aligned - buf.len());
            if field.name == SIZE_FIELD {
                buf.put_u32_le(size as u32);
                continue;
            }
            match values.get(field.name) {
                Some(value) => encode_field(&mut buf, self.name, field, value)?,
                None => buf.put_bytes(0, field.ty.size()),
            }
        }
        buf.put_bytes(0, size - buf.len());
        Ok(buf.to_vec())
    }

    /// Zeroed record buffer with the size field stamped, for fixed-size out calls
    pub fn empty(&self, cap: Capability) -> Vec<u8> {
        let size = self.size(cap);
        let mut buf = vec![0u8; size];
        crate::buffer::stamp_record_size(&mut buf, size);
        buf
    }
}

fn decode_field(cur: &mut &[u8], ty: FieldType) -> FieldValue {
    match ty {
        FieldType::U8 => FieldValue::U8(cur.get_u8()),
        FieldType::U16 => FieldValue::U16(cur.get_u16_le()),
        FieldType::U32 => FieldValue::U32(cur.get_u32_le()),
        FieldType::I32 => FieldValue::I32(cur.get_i32_le()),
        FieldType::Counter => FieldValue::Int(i64::from(cur.get_u32_le())),
        FieldType::Bool => FieldValue::Bool(cur.get_u32_le() != 0),
        FieldType::Handle => {
            let raw = if std::mem::size_of::<usize>() == 8 {
                cur.get_u64_le() as usize
            } else {
                cur.get_u32_le() as usize
            };
            FieldValue::Handle(raw)
        }
        FieldType::Guid => {
            let mut raw = [0u8; 16];
            cur.copy_to_slice(&mut raw);
            FieldValue::Guid(Uuid::from_bytes_le(raw))
        }
        FieldType::Luid => {
            let low = cur.get_u32_le() as u64;
            let high = cur.get_i32_le() as u32 as u64;
            FieldValue::Luid(high << 32 | low)
        }
        FieldType::WStr(n) => {
            let value = decode_wstr(&cur[..n * 2]);
            cur.advance(n * 2);
            FieldValue::Str(value)
        }
        FieldType::Bytes(n) => {
            let value = cur[..n].to_vec();
            cur.advance(n);
            FieldValue::Bytes(value)
        }
        FieldType::Ipv4 => {
            let mut raw = [0u8; 4];
            cur.copy_to_slice(&mut raw);
            FieldValue::Ipv4(Ipv4Addr::from(raw))
        }
        FieldType::Ipv6 => {
            let mut raw = [0u8; 16];
            cur.copy_to_slice(&mut raw);
            FieldValue::Ipv6(Ipv6Addr::from(raw))
        }
        FieldType::Endpoint => {
            let tag = cur.get_u32_le();
            let mut raw = [0u8; 16];
            cur.copy_to_slice(&mut raw);
            let addr = match tag {
                crate::native::codes::RASTUNNELENDPOINT_IPV4 => Some(IpAddr::V4(Ipv4Addr::new(
                    raw[0], raw[1], raw[2], raw[3],
                ))),
                crate::native::codes::RASTUNNELENDPOINT_IPV6 => {
                    Some(IpAddr::V6(Ipv6Addr::from(raw)))
                }
                _ => None,
            };
            FieldValue::Endpoint(addr)
        }
    }
}

fn mismatch(record: &str, field: &FieldSpec, value: &FieldValue) -> RasError {
    RasError::MalformedRecord(format!(
        "{record}.{} is {:?}, cannot hold {value:?}",
        field.name, field.ty
    ))
}

fn encode_field(
    buf: &mut BytesMut,
    record: &str,
    field: &FieldSpec,
    value: &FieldValue,
) -> Result<()> {
    match (field.ty, value) {
        (FieldType::U8, FieldValue::U8(v)) => buf.put_u8(*v),
        (FieldType::U16, FieldValue::U16(v)) => buf.put_u16_le(*v),
        (FieldType::U32, FieldValue::U32(v)) => buf.put_u32_le(*v),
        (FieldType::I32, FieldValue::I32(v)) => buf.put_i32_le(*v),
        (FieldType::Counter, FieldValue::Int(v)) => {
            let raw = u32::try_from(*v).map_err(|_| {
                RasError::MalformedRecord(format!(
                    "{record}.{} value {v} does not fit a native counter",
                    field.name
                ))
            })?;
            buf.put_u32_le(raw);
        }
        (FieldType::Bool, FieldValue::Bool(v)) => buf.put_u32_le(u32::from(*v)),
        (FieldType::Handle, FieldValue::Handle(v)) => {
            if std::mem::size_of::<usize>() == 8 {
                buf.put_u64_le(*v as u64);
            } else {
                buf.put_u32_le(*v as u32);
            }
        }
        (FieldType::Guid, FieldValue::Guid(v)) => buf.put_slice(&v.to_bytes_le()),
        (FieldType::Luid, FieldValue::Luid(v)) => {
            buf.put_u32_le(*v as u32);
            buf.put_u32_le((*v >> 32) as u32);
        }
        (FieldType::WStr(n), FieldValue::Str(s)) => {
            let units: Vec<u16> = s.encode_utf16().collect();
            if units.len() >= n {
                return Err(RasError::InvalidConfiguration(format!(
                    "{record}.{} holds at most {} characters, got {}",
                    field.name,
                    n - 1,
                    units.len()
                )));
            }
            for unit in &units {
                buf.put_u16_le(*unit);
            }
            buf.put_bytes(0, (n - units.len()) * 2);
        }
        (FieldType::Bytes(n), FieldValue::Bytes(v)) => {
            if v.len() > n {
                return Err(RasError::InvalidConfiguration(format!(
                    "{record}.{} holds at most {n} bytes, got {}",
                    field.name,
                    v.len()
                )));
            }
            buf.put_slice(v);
            buf.put_bytes(0, n - v.len());
        }
        (FieldType::Ipv4, FieldValue::Ipv4(v)) => buf.put_slice(&v.octets()),
        (FieldType::Ipv6, FieldValue::Ipv6(v)) => buf.put_slice(&v.octets()),
        (FieldType::Endpoint, FieldValue::Endpoint(addr)) => match addr {
            Some(IpAddr::V4(v4)) => {
                buf.put_u32_le(crate::native::codes::RASTUNNELENDPOINT_IPV4);
                buf.put_slice(&v4.octets());
                buf.put_bytes(0, 12);
            }
            Some(IpAddr::V6(v6)) => {
                buf.put_u32_le(crate::native::codes::RASTUNNELENDPOINT_IPV6);
                buf.put_slice(&v6.octets());
            }
            None => buf.put_bytes(0, 20),
        },
        _ => return Err(mismatch(record, field, value)),
    }
    Ok(())
}

/// Decode a fixed UTF-16 field, trimming at the first terminator
pub fn decode_wstr(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|u| *u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// NUL-terminated UTF-16LE encoding
pub fn encode_wstr(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity((s.len() + 1) * 2);
    for unit in s.encode_utf16().chain(std::iter::once(0)) {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Decode a double-NUL terminated UTF-16 string list
pub fn decode_multi_sz(bytes: &[u8]) -> Vec<String> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    units
        .split(|u| *u == 0)
        .take_while(|s| !s.is_empty())
        .map(String::from_utf16_lossy)
        .collect()
}

/// Encode a double-NUL terminated UTF-16 string list
pub fn encode_multi_sz<S: AsRef<str>>(items: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for item in items {
        out.extend(encode_wstr(item.as_ref()));
    }
    out.extend_from_slice(&[0, 0]);
    out
}

/// Domain type with a native record layout
pub trait NativeRecord: Sized {
    fn schema() -> &'static Schema;
    fn from_fields(fields: &FieldValues) -> Result<Self>;
    fn to_fields(&self) -> FieldValues;

    fn native_size(cap: Capability) -> usize {
        Self::schema().size(cap)
    }

    fn decode(bytes: &[u8], cap: Capability) -> Result<Self> {
        if log::log_enabled!(log::Level::Trace) {
            let size = Self::schema().size(cap).min(bytes.len());
            log::trace!("{} <- {}", Self::schema().name, hex::encode(&bytes[..size]));
        }
        Self::from_fields(&Self::schema().decode(bytes, cap)?)
    }

    fn encode(&self, cap: Capability) -> Result<Vec<u8>> {
        Self::schema().encode(&self.to_fields(), cap)
    }

    /// Decode `count` consecutive records
    fn decode_array(bytes: &[u8], count: usize, cap: Capability) -> Result<Vec<Self>> {
        let stride = Self::native_size(cap);
        let needed = stride.checked_mul(count).ok_or_else(|| {
            RasError::MalformedRecord(format!("{count} records overflow the address space"))
        })?;
        if bytes.len() < needed {
            return Err(RasError::MalformedRecord(format!(
                "{} x{} needs {} bytes, got {}",
                Self::schema().name,
                count,
                needed,
                bytes.len()
            )));
        }
        bytes
            .chunks_exact(stride)
            .take(count)
            .map(|chunk| Self::decode(chunk, cap))
            .collect()
    }

    /// Encode records back-to-back, as a list-returning entry point writes them
    fn encode_array(items: &[Self], cap: Capability) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(items.len() * Self::native_size(cap));
        for item in items {
            out.extend(item.encode(cap)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static SAMPLE: Schema = Schema {
        name: "SAMPLE",
        fields: &[
            FieldSpec::new("dwSize", FieldType::U32),
            FieldSpec::new("bFlag", FieldType::U8),
            FieldSpec::new("szName", FieldType::WStr(5)),
            FieldSpec::new("dwBytes", FieldType::Counter),
            FieldSpec::new("endpoint", FieldType::Endpoint).since(Capability::Win7),
        ],
    };

    #[test]
    fn test_layout_offsets_follow_packing() {
        assert_eq!(SAMPLE.offset_of("bFlag", Capability::Legacy), Some(4));
        assert_eq!(SAMPLE.offset_of("szName", Capability::Legacy), Some(6));
        assert_eq!(SAMPLE.offset_of("dwBytes", Capability::Legacy), Some(16));
        assert_eq!(SAMPLE.size(Capability::Legacy), 20);
        assert_eq!(SAMPLE.offset_of("endpoint", Capability::Legacy), None);
        assert_eq!(SAMPLE.size(Capability::Win7), 40);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let bytes = vec![0u8; SAMPLE.size(Capability::Legacy)];
        assert!(SAMPLE.decode(&bytes, Capability::Legacy).is_ok());
        let err = SAMPLE.decode(&bytes, Capability::Win7).unwrap_err();
        assert!(matches!(err, RasError::MalformedRecord(_)));
    }

    #[test]
    fn test_counter_widening() {
        let values = FieldValues::new().with("dwBytes", FieldValue::Int(u32::MAX as i64));
        let bytes = SAMPLE.encode(&values, Capability::Legacy).unwrap();
        let decoded = SAMPLE.decode(&bytes, Capability::Legacy).unwrap();
        assert_eq!(decoded.int("dwBytes").unwrap(), 4_294_967_295);
        assert_eq!(decoded.u32("dwSize").unwrap(), 20);

        let too_big = FieldValues::new().with("dwBytes", FieldValue::Int(1 << 33));
        assert!(SAMPLE.encode(&too_big, Capability::Legacy).is_err());
    }

    #[test]
    fn test_string_trimmed_at_terminator() {
        let mut bytes = SAMPLE.empty(Capability::Legacy);
        // "ab\0zz" with garbage after the terminator
        let raw: [u16; 5] = [b'a' as u16, b'b' as u16, 0, b'z' as u16, b'z' as u16];
        for (i, unit) in raw.iter().enumerate() {
            bytes[6 + i * 2..8 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        let decoded = SAMPLE.decode(&bytes, Capability::Legacy).unwrap();
        assert_eq!(decoded.string("szName").unwrap(), "ab");
    }

    #[test]
    fn test_overlong_string_rejected() {
        let values = FieldValues::new().with("szName", FieldValue::Str("toolong".into()));
        let err = SAMPLE.encode(&values, Capability::Legacy).unwrap_err();
        assert!(matches!(err, RasError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_endpoint_unknown_tag_is_absent() {
        let mut bytes = SAMPLE.empty(Capability::Win7);
        let offset = SAMPLE.offset_of("endpoint", Capability::Win7).unwrap();
        bytes[offset..offset + 4].copy_from_slice(&7u32.to_le_bytes());
        bytes[offset + 4] = 10;
        let decoded = SAMPLE.decode(&bytes, Capability::Win7).unwrap();
        assert_eq!(decoded.get("endpoint"), Some(&FieldValue::Endpoint(None)));

        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        let values = FieldValues::new().with("endpoint", FieldValue::Endpoint(Some(v4)));
        let bytes = SAMPLE.encode(&values, Capability::Win7).unwrap();
        let decoded = SAMPLE.decode(&bytes, Capability::Win7).unwrap();
        assert_eq!(decoded.endpoint("endpoint"), Some(v4));
    }

    #[test]
    fn test_type_mismatch() {
        let values = FieldValues::new().with("bFlag", FieldValue::U32(1));
        assert!(SAMPLE.encode(&values, Capability::Legacy).is_err());
    }

    #[test]
    fn test_multi_sz() {
        let bytes = encode_multi_sz(&["vpn.example.com", "10.1.2.3"]);
        assert_eq!(
            decode_multi_sz(&bytes),
            vec!["vpn.example.com".to_string(), "10.1.2.3".to_string()]
        );
        assert!(decode_multi_sz(&[0, 0]).is_empty());
    }
}
