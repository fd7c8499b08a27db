//! Negotiated protocol projections
//!
//! Legacy per-protocol records (`RASPPPIP`, `RASPPPLCP`, ...) are queried one
//! protocol at a time. From Windows 7 on a single extended record describes the
//! whole PPP or IKEv2 negotiation.

use super::{FieldSpec, FieldType, FieldValue, FieldValues, NativeRecord, Schema};
use crate::capability::Capability;
use crate::error::{RasError, Result};
use crate::native::codes::*;
use std::net::{Ipv4Addr, Ipv6Addr};

pub static RASPPPIP: Schema = Schema {
    name: "RASPPPIP",
    fields: &[
        FieldSpec::new("dwSize", FieldType::U32),
        FieldSpec::new("dwError", FieldType::U32),
        FieldSpec::new("szIpAddress", FieldType::WStr(RAS_MAX_IP_ADDRESS + 1)),
        FieldSpec::new("szServerIpAddress", FieldType::WStr(RAS_MAX_IP_ADDRESS + 1)),
        FieldSpec::new("dwOptions", FieldType::U32),
        FieldSpec::new("dwServerOptions", FieldType::U32),
    ],
};

pub static RASPPPIPV6: Schema = Schema {
    name: "RASPPPIPV6",
    fields: &[
        FieldSpec::new("dwSize", FieldType::U32),
        FieldSpec::new("dwError", FieldType::U32),
        FieldSpec::new("bLocalInterfaceIdentifier", FieldType::Bytes(8)),
        FieldSpec::new("bPeerInterfaceIdentifier", FieldType::Bytes(8)),
        FieldSpec::new("bLocalCompressionProtocol", FieldType::Bytes(2)),
        FieldSpec::new("bPeerCompressionProtocol", FieldType::Bytes(2)),
    ],
};

pub static RASPPPCCP: Schema = Schema {
    name: "RASPPPCCP",
    fields: &[
        FieldSpec::new("dwSize", FieldType::U32),
        FieldSpec::new("dwError", FieldType::U32),
        FieldSpec::new("dwCompressionAlgorithm", FieldType::U32),
        FieldSpec::new("dwOptions", FieldType::U32),
        FieldSpec::new("dwServerCompressionAlgorithm", FieldType::U32),
        FieldSpec::new("dwServerOptions", FieldType::U32),
    ],
};

pub static RASPPPLCP: Schema = Schema {
    name: "RASPPPLCP",
    fields: &[
        FieldSpec::new("dwSize", FieldType::U32),
        FieldSpec::new("fBundled", FieldType::Bool),
        FieldSpec::new("dwError", FieldType::U32),
        FieldSpec::new("dwAuthenticationProtocol", FieldType::U32),
        FieldSpec::new("dwAuthenticationData", FieldType::U32),
        FieldSpec::new("dwEapTypeId", FieldType::U32),
        FieldSpec::new("dwServerAuthenticationProtocol", FieldType::U32),
        FieldSpec::new("dwServerAuthenticationData", FieldType::U32),
        FieldSpec::new("dwServerEapTypeId", FieldType::U32),
        FieldSpec::new("fMultilink", FieldType::Bool),
        FieldSpec::new("dwTerminateReason", FieldType::U32),
        FieldSpec::new("dwServerTerminateReason", FieldType::U32),
        FieldSpec::new("szReplyMessage", FieldType::WStr(RAS_MAX_REPLY_MESSAGE + 1)),
        FieldSpec::new("dwOptions", FieldType::U32),
        FieldSpec::new("dwServerOptions", FieldType::U32),
    ],
};

pub static RASPPPNBF: Schema = Schema {
    name: "RASPPPNBF",
    fields: &[
        FieldSpec::new("dwSize", FieldType::U32),
        FieldSpec::new("dwError", FieldType::U32),
        FieldSpec::new("dwNetBiosError", FieldType::U32),
        FieldSpec::new("szNetBiosError", FieldType::WStr(NETBIOS_NAME_LEN + 1)),
        FieldSpec::new("szWorkstationName", FieldType::WStr(NETBIOS_NAME_LEN + 1)),
        FieldSpec::new("bLana", FieldType::U8),
    ],
};

pub static RASPPPIPX: Schema = Schema {
    name: "RASPPPIPX",
    fields: &[
        FieldSpec::new("dwSize", FieldType::U32),
        FieldSpec::new("dwError", FieldType::U32),
        FieldSpec::new("szIpxAddress", FieldType::WStr(RAS_MAX_IPX_ADDRESS + 1)),
    ],
};

/// `RAS_PROJECTION_INFO` with the PPP arm of the union
pub static RAS_PROJECTION_INFO_PPP: Schema = Schema {
    name: "RAS_PROJECTION_INFO(PPP)",
    fields: &[
        FieldSpec::new("version", FieldType::U32),
        FieldSpec::new("type", FieldType::U32),
        FieldSpec::new("dwIPv4NegotiationError", FieldType::U32),
        FieldSpec::new("ipv4Address", FieldType::Ipv4),
        FieldSpec::new("ipv4ServerAddress", FieldType::Ipv4),
        FieldSpec::new("dwIPv4Options", FieldType::U32),
        FieldSpec::new("dwIPv4ServerOptions", FieldType::U32),
        FieldSpec::new("dwIPv6NegotiationError", FieldType::U32),
        FieldSpec::new("bInterfaceIdentifier", FieldType::Bytes(8)),
        FieldSpec::new("bServerInterfaceIdentifier", FieldType::Bytes(8)),
        FieldSpec::new("fBundled", FieldType::Bool),
        FieldSpec::new("fMultilink", FieldType::Bool),
        FieldSpec::new("dwAuthenticationProtocol", FieldType::U32),
        FieldSpec::new("dwAuthenticationData", FieldType::U32),
        FieldSpec::new("dwServerAuthenticationProtocol", FieldType::U32),
        FieldSpec::new("dwServerAuthenticationData", FieldType::U32),
        FieldSpec::new("dwEapTypeId", FieldType::U32),
        FieldSpec::new("dwServerEapTypeId", FieldType::U32),
        FieldSpec::new("dwLcpOptions", FieldType::U32),
        FieldSpec::new("dwLcpServerOptions", FieldType::U32),
        FieldSpec::new("dwCcpError", FieldType::U32),
        FieldSpec::new("dwCcpCompressionAlgorithm", FieldType::U32),
        FieldSpec::new("dwCcpServerCompressionAlgorithm", FieldType::U32),
        FieldSpec::new("dwCcpOptions", FieldType::U32),
        FieldSpec::new("dwCcpServerOptions", FieldType::U32),
    ],
};

/// `RAS_PROJECTION_INFO` with the IKEv2 arm of the union
pub static RAS_PROJECTION_INFO_IKEV2: Schema = Schema {
    name: "RAS_PROJECTION_INFO(IKEv2)",
    fields: &[
        FieldSpec::new("version", FieldType::U32),
        FieldSpec::new("type", FieldType::U32),
        FieldSpec::new("dwIPv4NegotiationError", FieldType::U32),
        FieldSpec::new("ipv4Address", FieldType::Ipv4),
        FieldSpec::new("ipv4ServerAddress", FieldType::Ipv4),
        FieldSpec::new("dwIPv6NegotiationError", FieldType::U32),
        FieldSpec::new("ipv6Address", FieldType::Ipv6),
        FieldSpec::new("ipv6ServerAddress", FieldType::Ipv6),
        FieldSpec::new("dwPrefixLength", FieldType::U32),
        FieldSpec::new("dwAuthenticationProtocol", FieldType::U32),
        FieldSpec::new("dwEapTypeId", FieldType::U32),
        FieldSpec::new("dwFlags", FieldType::U32),
        FieldSpec::new("dwEncryptionMethod", FieldType::U32),
        FieldSpec::new("numIPv4ServerAddresses", FieldType::U32),
        FieldSpec::new("ipv4ServerAddresses", FieldType::Handle),
        FieldSpec::new("numIPv6ServerAddresses", FieldType::U32),
        FieldSpec::new("ipv6ServerAddresses", FieldType::Handle),
    ],
};

/// Version stamped into `RAS_PROJECTION_INFO`
pub const PROJECTION_INFO_VERSION: u32 = 1;

/// Protocols with a legacy projection record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Projection {
    Ip,
    Ipv6,
    Ccp,
    Lcp,
    Nbf,
    Ipx,
}

impl Projection {
    pub const ALL: [Projection; 6] = [
        Projection::Ip,
        Projection::Ipv6,
        Projection::Ccp,
        Projection::Lcp,
        Projection::Nbf,
        Projection::Ipx,
    ];

    /// `RASPROJECTION` selector
    pub fn selector(self) -> u32 {
        match self {
            Projection::Ip => RASP_PPP_IP,
            Projection::Ipv6 => RASP_PPP_IPV6,
            Projection::Ccp => RASP_PPP_CCP,
            Projection::Lcp => RASP_PPP_LCP,
            Projection::Nbf => RASP_PPP_NBF,
            Projection::Ipx => RASP_PPP_IPX,
        }
    }

    pub fn from_selector(selector: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.selector() == selector)
    }

    pub fn schema(self) -> &'static Schema {
        match self {
            Projection::Ip => &RASPPPIP,
            Projection::Ipv6 => &RASPPPIPV6,
            Projection::Ccp => &RASPPPCCP,
            Projection::Lcp => &RASPPPLCP,
            Projection::Nbf => &RASPPPNBF,
            Projection::Ipx => &RASPPPIPX,
        }
    }

    pub fn min_capability(self) -> Capability {
        match self {
            Projection::Ipv6 => Capability::Vista,
            _ => Capability::Legacy,
        }
    }
}

fn error_code(fields: &FieldValues, name: &str) -> Result<Option<i32>> {
    let raw = fields.u32(name)?;
    Ok((raw != 0).then_some(raw as i32))
}

fn raw_error(code: Option<i32>) -> FieldValue {
    FieldValue::U32(code.unwrap_or(0) as u32)
}

fn parse_v4(text: &str) -> Option<Ipv4Addr> {
    text.parse().ok()
}

fn interface_id(fields: &FieldValues, name: &str) -> Result<[u8; 8]> {
    let bytes = fields.bytes(name)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| RasError::MalformedRecord(format!("{name} is {} bytes", bytes.len())))
}

fn protocol_id(fields: &FieldValues, name: &str) -> Result<u16> {
    let bytes = fields.bytes(name)?;
    match bytes.as_slice() {
        [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(RasError::MalformedRecord(format!("{name} is {} bytes", bytes.len()))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IpProjection {
    pub error_code: Option<i32>,
    pub address: Option<Ipv4Addr>,
    pub server_address: Option<Ipv4Addr>,
    pub options: u32,
    pub server_options: u32,
}

impl NativeRecord for IpProjection {
    fn schema() -> &'static Schema {
        &RASPPPIP
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        Ok(Self {
            error_code: error_code(fields, "dwError")?,
            address: parse_v4(&fields.string("szIpAddress")?),
            server_address: parse_v4(&fields.string("szServerIpAddress")?),
            options: fields.u32("dwOptions")?,
            server_options: fields.u32("dwServerOptions")?,
        })
    }

    fn to_fields(&self) -> FieldValues {
        let text = |a: Option<Ipv4Addr>| FieldValue::Str(a.map(|a| a.to_string()).unwrap_or_default());
        FieldValues::new()
            .with("dwError", raw_error(self.error_code))
            .with("szIpAddress", text(self.address))
            .with("szServerIpAddress", text(self.server_address))
            .with("dwOptions", FieldValue::U32(self.options))
            .with("dwServerOptions", FieldValue::U32(self.server_options))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ipv6Projection {
    pub error_code: Option<i32>,
    pub local_interface_id: [u8; 8],
    pub peer_interface_id: [u8; 8],
    pub local_compression: u16,
    pub peer_compression: u16,
}

impl NativeRecord for Ipv6Projection {
    fn schema() -> &'static Schema {
        &RASPPPIPV6
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        Ok(Self {
            error_code: error_code(fields, "dwError")?,
            local_interface_id: interface_id(fields, "bLocalInterfaceIdentifier")?,
            peer_interface_id: interface_id(fields, "bPeerInterfaceIdentifier")?,
            local_compression: protocol_id(fields, "bLocalCompressionProtocol")?,
            peer_compression: protocol_id(fields, "bPeerCompressionProtocol")?,
        })
    }

    fn to_fields(&self) -> FieldValues {
        FieldValues::new()
            .with("dwError", raw_error(self.error_code))
            .with(
                "bLocalInterfaceIdentifier",
                FieldValue::Bytes(self.local_interface_id.to_vec()),
            )
            .with(
                "bPeerInterfaceIdentifier",
                FieldValue::Bytes(self.peer_interface_id.to_vec()),
            )
            .with(
                "bLocalCompressionProtocol",
                FieldValue::Bytes(self.local_compression.to_be_bytes().to_vec()),
            )
            .with(
                "bPeerCompressionProtocol",
                FieldValue::Bytes(self.peer_compression.to_be_bytes().to_vec()),
            )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CcpProjection {
    pub error_code: Option<i32>,
    pub compression_algorithm: u32,
    pub options: u32,
    pub server_compression_algorithm: u32,
    pub server_options: u32,
}

impl NativeRecord for CcpProjection {
    fn schema() -> &'static Schema {
        &RASPPPCCP
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        Ok(Self {
            error_code: error_code(fields, "dwError")?,
            compression_algorithm: fields.u32("dwCompressionAlgorithm")?,
            options: fields.u32("dwOptions")?,
            server_compression_algorithm: fields.u32("dwServerCompressionAlgorithm")?,
            server_options: fields.u32("dwServerOptions")?,
        })
    }

    fn to_fields(&self) -> FieldValues {
        FieldValues::new()
            .with("dwError", raw_error(self.error_code))
            .with(
                "dwCompressionAlgorithm",
                FieldValue::U32(self.compression_algorithm),
            )
            .with("dwOptions", FieldValue::U32(self.options))
            .with(
                "dwServerCompressionAlgorithm",
                FieldValue::U32(self.server_compression_algorithm),
            )
            .with("dwServerOptions", FieldValue::U32(self.server_options))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LcpProjection {
    pub bundled: bool,
    pub error_code: Option<i32>,
    pub authentication_protocol: u32,
    pub authentication_data: u32,
    pub eap_type_id: u32,
    pub server_authentication_protocol: u32,
    pub server_authentication_data: u32,
    pub server_eap_type_id: u32,
    pub multilink: bool,
    pub terminate_reason: u32,
    pub server_terminate_reason: u32,
    pub reply_message: String,
    pub options: u32,
    pub server_options: u32,
}

impl NativeRecord for LcpProjection {
    fn schema() -> &'static Schema {
        &RASPPPLCP
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        Ok(Self {
            bundled: fields.bool("fBundled")?,
            error_code: error_code(fields, "dwError")?,
            authentication_protocol: fields.u32("dwAuthenticationProtocol")?,
            authentication_data: fields.u32("dwAuthenticationData")?,
            eap_type_id: fields.u32("dwEapTypeId")?,
            server_authentication_protocol: fields.u32("dwServerAuthenticationProtocol")?,
            server_authentication_data: fields.u32("dwServerAuthenticationData")?,
            server_eap_type_id: fields.u32("dwServerEapTypeId")?,
            multilink: fields.bool("fMultilink")?,
            terminate_reason: fields.u32("dwTerminateReason")?,
            server_terminate_reason: fields.u32("dwServerTerminateReason")?,
            reply_message: fields.string("szReplyMessage")?,
            options: fields.u32("dwOptions")?,
            server_options: fields.u32("dwServerOptions")?,
        })
    }

    fn to_fields(&self) -> FieldValues {
        FieldValues::new()
            .with("fBundled", FieldValue::Bool(self.bundled))
            .with("dwError", raw_error(self.error_code))
            .with(
                "dwAuthenticationProtocol",
                FieldValue::U32(self.authentication_protocol),
            )
            .with("dwAuthenticationData", FieldValue::U32(self.authentication_data))
            .with("dwEapTypeId", FieldValue::U32(self.eap_type_id))
            .with(
                "dwServerAuthenticationProtocol",
                FieldValue::U32(self.server_authentication_protocol),
            )
            .with(
                "dwServerAuthenticationData",
                FieldValue::U32(self.server_authentication_data),
            )
            .with("dwServerEapTypeId", FieldValue::U32(self.server_eap_type_id))
            .with("fMultilink", FieldValue::Bool(self.multilink))
            .with("dwTerminateReason", FieldValue::U32(self.terminate_reason))
            .with(
                "dwServerTerminateReason",
                FieldValue::U32(self.server_terminate_reason),
            )
            .with("szReplyMessage", FieldValue::Str(self.reply_message.clone()))
            .with("dwOptions", FieldValue::U32(self.options))
            .with("dwServerOptions", FieldValue::U32(self.server_options))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NbfProjection {
    pub error_code: Option<i32>,
    pub netbios_error: u32,
    pub netbios_error_name: String,
    pub workstation_name: String,
    pub lana: u8,
}

impl NativeRecord for NbfProjection {
    fn schema() -> &'static Schema {
        &RASPPPNBF
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        Ok(Self {
            error_code: error_code(fields, "dwError")?,
            netbios_error: fields.u32("dwNetBiosError")?,
            netbios_error_name: fields.string("szNetBiosError")?,
            workstation_name: fields.string("szWorkstationName")?,
            lana: fields.u8("bLana")?,
        })
    }

    fn to_fields(&self) -> FieldValues {
        FieldValues::new()
            .with("dwError", raw_error(self.error_code))
            .with("dwNetBiosError", FieldValue::U32(self.netbios_error))
            .with("szNetBiosError", FieldValue::Str(self.netbios_error_name.clone()))
            .with("szWorkstationName", FieldValue::Str(self.workstation_name.clone()))
            .with("bLana", FieldValue::U8(self.lana))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IpxProjection {
    pub error_code: Option<i32>,
    pub address: String,
}

impl NativeRecord for IpxProjection {
    fn schema() -> &'static Schema {
        &RASPPPIPX
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        Ok(Self {
            error_code: error_code(fields, "dwError")?,
            address: fields.string("szIpxAddress")?,
        })
    }

    fn to_fields(&self) -> FieldValues {
        FieldValues::new()
            .with("dwError", raw_error(self.error_code))
            .with("szIpxAddress", FieldValue::Str(self.address.clone()))
    }
}

/// Result of a legacy per-protocol projection query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionInfo {
    Ip(IpProjection),
    Ipv6(Ipv6Projection),
    Ccp(CcpProjection),
    Lcp(LcpProjection),
    Nbf(NbfProjection),
    Ipx(IpxProjection),
}

impl ProjectionInfo {
    pub fn decode(projection: Projection, bytes: &[u8], cap: Capability) -> Result<Self> {
        Ok(match projection {
            Projection::Ip => ProjectionInfo::Ip(IpProjection::decode(bytes, cap)?),
            Projection::Ipv6 => ProjectionInfo::Ipv6(Ipv6Projection::decode(bytes, cap)?),
            Projection::Ccp => ProjectionInfo::Ccp(CcpProjection::decode(bytes, cap)?),
            Projection::Lcp => ProjectionInfo::Lcp(LcpProjection::decode(bytes, cap)?),
            Projection::Nbf => ProjectionInfo::Nbf(NbfProjection::decode(bytes, cap)?),
            Projection::Ipx => ProjectionInfo::Ipx(IpxProjection::decode(bytes, cap)?),
        })
    }

    pub fn encode(&self, cap: Capability) -> Result<Vec<u8>> {
        match self {
            ProjectionInfo::Ip(p) => p.encode(cap),
            ProjectionInfo::Ipv6(p) => p.encode(cap),
            ProjectionInfo::Ccp(p) => p.encode(cap),
            ProjectionInfo::Lcp(p) => p.encode(cap),
            ProjectionInfo::Nbf(p) => p.encode(cap),
            ProjectionInfo::Ipx(p) => p.encode(cap),
        }
    }

    pub fn projection(&self) -> Projection {
        match self {
            ProjectionInfo::Ip(_) => Projection::Ip,
            ProjectionInfo::Ipv6(_) => Projection::Ipv6,
            ProjectionInfo::Ccp(_) => Projection::Ccp,
            ProjectionInfo::Lcp(_) => Projection::Lcp,
            ProjectionInfo::Nbf(_) => Projection::Nbf,
            ProjectionInfo::Ipx(_) => Projection::Ipx,
        }
    }
}

/// PPP arm of the extended projection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PppProjection {
    pub ipv4_error: Option<i32>,
    pub ipv4_address: Option<Ipv4Addr>,
    pub ipv4_server_address: Option<Ipv4Addr>,
    pub ipv4_options: u32,
    pub ipv4_server_options: u32,
    pub ipv6_error: Option<i32>,
    pub interface_id: [u8; 8],
    pub server_interface_id: [u8; 8],
    pub bundled: bool,
    pub multilink: bool,
    pub authentication_protocol: u32,
    pub authentication_data: u32,
    pub server_authentication_protocol: u32,
    pub server_authentication_data: u32,
    pub eap_type_id: u32,
    pub server_eap_type_id: u32,
    pub lcp_options: u32,
    pub lcp_server_options: u32,
    pub ccp_error: Option<i32>,
    pub ccp_compression_algorithm: u32,
    pub ccp_server_compression_algorithm: u32,
    pub ccp_options: u32,
    pub ccp_server_options: u32,
}

/// IKEv2 arm of the extended projection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ikev2Projection {
    pub ipv4_error: Option<i32>,
    pub ipv4_address: Option<Ipv4Addr>,
    pub ipv4_server_address: Option<Ipv4Addr>,
    pub ipv6_error: Option<i32>,
    pub ipv6_address: Option<Ipv6Addr>,
    pub ipv6_server_address: Option<Ipv6Addr>,
    pub prefix_length: u32,
    pub authentication_protocol: u32,
    pub eap_type_id: u32,
    pub flags: u32,
    pub encryption_method: u32,
}

/// Extended projection (`RAS_PROJECTION_INFO`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionInfoEx {
    Ppp(PppProjection),
    Ikev2(Ikev2Projection),
}

fn opt_v4(addr: Ipv4Addr) -> Option<Ipv4Addr> {
    (!addr.is_unspecified()).then_some(addr)
}

fn opt_v6(addr: Ipv6Addr) -> Option<Ipv6Addr> {
    (!addr.is_unspecified()).then_some(addr)
}

impl ProjectionInfoEx {
    /// Extended projection needs Windows 7
    pub const MIN_CAPABILITY: Capability = Capability::Win7;

    /// Buffer size that holds either arm of the union
    pub fn native_size(cap: Capability) -> usize {
        RAS_PROJECTION_INFO_PPP
            .size(cap)
            .max(RAS_PROJECTION_INFO_IKEV2.size(cap))
    }

    pub fn decode(bytes: &[u8], cap: Capability) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(RasError::MalformedRecord(format!(
                "RAS_PROJECTION_INFO header needs 8 bytes, got {}",
                bytes.len()
            )));
        }
        let kind = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        match kind {
            PROJECTION_INFO_TYPE_PPP => {
                let f = RAS_PROJECTION_INFO_PPP.decode(bytes, cap)?;
                Ok(ProjectionInfoEx::Ppp(PppProjection {
                    ipv4_error: error_code(&f, "dwIPv4NegotiationError")?,
                    ipv4_address: opt_v4(f.ipv4("ipv4Address")?),
                    ipv4_server_address: opt_v4(f.ipv4("ipv4ServerAddress")?),
                    ipv4_options: f.u32("dwIPv4Options")?,
                    ipv4_server_options: f.u32("dwIPv4ServerOptions")?,
                    ipv6_error: error_code(&f, "dwIPv6NegotiationError")?,
                    interface_id: interface_id(&f, "bInterfaceIdentifier")?,
                    server_interface_id: interface_id(&f, "bServerInterfaceIdentifier")?,
                    bundled: f.bool("fBundled")?,
                    multilink: f.bool("fMultilink")?,
                    authentication_protocol: f.u32("dwAuthenticationProtocol")?,
                    authentication_data: f.u32("dwAuthenticationData")?,
                    server_authentication_protocol: f.u32("dwServerAuthenticationProtocol")?,
                    server_authentication_data: f.u32("dwServerAuthenticationData")?,
                    eap_type_id: f.u32("dwEapTypeId")?,
                    server_eap_type_id: f.u32("dwServerEapTypeId")?,
                    lcp_options: f.u32("dwLcpOptions")?,
                    lcp_server_options: f.u32("dwLcpServerOptions")?,
                    ccp_error: error_code(&f, "dwCcpError")?,
                    ccp_compression_algorithm: f.u32("dwCcpCompressionAlgorithm")?,
                    ccp_server_compression_algorithm: f
                        .u32("dwCcpServerCompressionAlgorithm")?,
                    ccp_options: f.u32("dwCcpOptions")?,
                    ccp_server_options: f.u32("dwCcpServerOptions")?,
                }))
            }
            PROJECTION_INFO_TYPE_IKEV2 => {
                let f = RAS_PROJECTION_INFO_IKEV2.decode(bytes, cap)?;
                Ok(ProjectionInfoEx::Ikev2(Ikev2Projection {
                    ipv4_error: error_code(&f, "dwIPv4NegotiationError")?,
                    ipv4_address: opt_v4(f.ipv4("ipv4Address")?),
                    ipv4_server_address: opt_v4(f.ipv4("ipv4ServerAddress")?),
                    ipv6_error: error_code(&f, "dwIPv6NegotiationError")?,
                    ipv6_address: opt_v6(f.ipv6("ipv6Address")?),
                    ipv6_server_address: opt_v6(f.ipv6("ipv6ServerAddress")?),
                    prefix_length: f.u32("dwPrefixLength")?,
                    authentication_protocol: f.u32("dwAuthenticationProtocol")?,
                    eap_type_id: f.u32("dwEapTypeId")?,
                    flags: f.u32("dwFlags")?,
                    encryption_method: f.u32("dwEncryptionMethod")?,
                }))
            }
            other => Err(RasError::MalformedRecord(format!(
                "unknown projection info type {other}"
            ))),
        }
    }

    pub fn encode(&self, cap: Capability) -> Result<Vec<u8>> {
        let v4 = |a: Option<Ipv4Addr>| FieldValue::Ipv4(a.unwrap_or(Ipv4Addr::UNSPECIFIED));
        let v6 = |a: Option<Ipv6Addr>| FieldValue::Ipv6(a.unwrap_or(Ipv6Addr::UNSPECIFIED));
        let header = FieldValues::new().with("version", FieldValue::U32(PROJECTION_INFO_VERSION));
        let mut bytes = match self {
            ProjectionInfoEx::Ppp(p) => {
                let fields = header
                    .with("type", FieldValue::U32(PROJECTION_INFO_TYPE_PPP))
                    .with("dwIPv4NegotiationError", raw_error(p.ipv4_error))
                    .with("ipv4Address", v4(p.ipv4_address))
                    .with("ipv4ServerAddress", v4(p.ipv4_server_address))
                    .with("dwIPv4Options", FieldValue::U32(p.ipv4_options))
                    .with("dwIPv4ServerOptions", FieldValue::U32(p.ipv4_server_options))
                    .with("dwIPv6NegotiationError", raw_error(p.ipv6_error))
                    .with("bInterfaceIdentifier", FieldValue::Bytes(p.interface_id.to_vec()))
                    .with(
                        "bServerInterfaceIdentifier",
                        FieldValue::Bytes(p.server_interface_id.to_vec()),
                    )
                    .with("fBundled", FieldValue::Bool(p.bundled))
                    .with("fMultilink", FieldValue::Bool(p.multilink))
                    .with(
                        "dwAuthenticationProtocol",
                        FieldValue::U32(p.authentication_protocol),
                    )
                    .with("dwAuthenticationData", FieldValue::U32(p.authentication_data))
                    .with(
                        "dwServerAuthenticationProtocol",
                        FieldValue::U32(p.server_authentication_protocol),
                    )
                    .with(
                        "dwServerAuthenticationData",
                        FieldValue::U32(p.server_authentication_data),
                    )
                    .with("dwEapTypeId", FieldValue::U32(p.eap_type_id))
                    .with("dwServerEapTypeId", FieldValue::U32(p.server_eap_type_id))
                    .with("dwLcpOptions", FieldValue::U32(p.lcp_options))
                    .with("dwLcpServerOptions", FieldValue::U32(p.lcp_server_options))
                    .with("dwCcpError", raw_error(p.ccp_error))
                    .with(
                        "dwCcpCompressionAlgorithm",
                        FieldValue::U32(p.ccp_compression_algorithm),
                    )
                    .with(
                        "dwCcpServerCompressionAlgorithm",
                        FieldValue::U32(p.ccp_server_compression_algorithm),
                    )
                    .with("dwCcpOptions", FieldValue::U32(p.ccp_options))
                    .with("dwCcpServerOptions", FieldValue::U32(p.ccp_server_options));
                RAS_PROJECTION_INFO_PPP.encode(&fields, cap)?
            }
            ProjectionInfoEx::Ikev2(p) => {
                let fields = header
                    .with("type", FieldValue::U32(PROJECTION_INFO_TYPE_IKEV2))
                    .with("dwIPv4NegotiationError", raw_error(p.ipv4_error))
                    .with("ipv4Address", v4(p.ipv4_address))
                    .with("ipv4ServerAddress", v4(p.ipv4_server_address))
                    .with("dwIPv6NegotiationError", raw_error(p.ipv6_error))
                    .with("ipv6Address", v6(p.ipv6_address))
                    .with("ipv6ServerAddress", v6(p.ipv6_server_address))
                    .with("dwPrefixLength", FieldValue::U32(p.prefix_length))
                    .with(
                        "dwAuthenticationProtocol",
                        FieldValue::U32(p.authentication_protocol),
                    )
                    .with("dwEapTypeId", FieldValue::U32(p.eap_type_id))
                    .with("dwFlags", FieldValue::U32(p.flags))
                    .with("dwEncryptionMethod", FieldValue::U32(p.encryption_method));
                RAS_PROJECTION_INFO_IKEV2.encode(&fields, cap)?
            }
        };
        bytes.resize(Self::native_size(cap), 0);
        Ok(bytes)
    }
}
