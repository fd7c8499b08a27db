//! Phonebook entry record (`RASENTRY`)

use super::connection::RasDevice;
use super::{FieldSpec, FieldType, FieldValue, FieldValues, NativeRecord, Schema};
use crate::capability::Capability;
use crate::error::{RasError, Result};
use crate::native::codes::*;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use uuid::Uuid;

pub static RASENTRY: Schema = Schema {
    name: "RASENTRY",
    fields: &[
        FieldSpec::new("dwSize", FieldType::U32),
        FieldSpec::new("dwfOptions", FieldType::U32),
        FieldSpec::new("dwCountryID", FieldType::U32),
        FieldSpec::new("dwCountryCode", FieldType::U32),
        FieldSpec::new("szAreaCode", FieldType::WStr(RAS_MAX_AREA_CODE + 1)),
        FieldSpec::new("szLocalPhoneNumber", FieldType::WStr(RAS_MAX_PHONE_NUMBER + 1)),
        FieldSpec::new("dwAlternateOffset", FieldType::U32),
        FieldSpec::new("ipaddr", FieldType::Ipv4),
        FieldSpec::new("ipaddrDns", FieldType::Ipv4),
        FieldSpec::new("ipaddrDnsAlt", FieldType::Ipv4),
        FieldSpec::new("ipaddrWins", FieldType::Ipv4),
        FieldSpec::new("ipaddrWinsAlt", FieldType::Ipv4),
        FieldSpec::new("dwFrameSize", FieldType::U32),
        FieldSpec::new("dwfNetProtocols", FieldType::U32),
        FieldSpec::new("dwFramingProtocol", FieldType::U32),
        FieldSpec::new("szScript", FieldType::WStr(MAX_PATH)),
        FieldSpec::new("szAutodialDll", FieldType::WStr(MAX_PATH)),
        FieldSpec::new("szAutodialFunc", FieldType::WStr(MAX_PATH)),
        FieldSpec::new("szDeviceType", FieldType::WStr(RAS_MAX_DEVICE_TYPE + 1)),
        FieldSpec::new("szDeviceName", FieldType::WStr(RAS_MAX_DEVICE_NAME + 1)),
        FieldSpec::new("szX25PadType", FieldType::WStr(33)),
        FieldSpec::new("szX25Address", FieldType::WStr(201)),
        FieldSpec::new("szX25Facilities", FieldType::WStr(201)),
        FieldSpec::new("szX25UserData", FieldType::WStr(201)),
        FieldSpec::new("dwChannels", FieldType::U32),
        FieldSpec::new("dwReserved1", FieldType::U32),
        FieldSpec::new("dwReserved2", FieldType::U32),
        FieldSpec::new("dwSubEntries", FieldType::U32),
        FieldSpec::new("dwDialMode", FieldType::U32),
        FieldSpec::new("dwDialExtraPercent", FieldType::U32),
        FieldSpec::new("dwDialExtraSampleSeconds", FieldType::U32),
        FieldSpec::new("dwHangUpExtraPercent", FieldType::U32),
        FieldSpec::new("dwHangUpExtraSampleSeconds", FieldType::U32),
        FieldSpec::new("dwIdleDisconnectSeconds", FieldType::U32),
        FieldSpec::new("dwType", FieldType::U32),
        FieldSpec::new("dwEncryptionType", FieldType::U32),
        FieldSpec::new("dwCustomAuthKey", FieldType::U32),
        FieldSpec::new("guidId", FieldType::Guid),
        FieldSpec::new("szCustomDialDll", FieldType::WStr(MAX_PATH)),
        FieldSpec::new("dwVpnStrategy", FieldType::U32),
        FieldSpec::new("dwfOptions2", FieldType::U32),
        FieldSpec::new("dwfOptions3", FieldType::U32),
        FieldSpec::new("szDnsSuffix", FieldType::WStr(256)),
        FieldSpec::new("dwTcpWindowSize", FieldType::U32),
        FieldSpec::new("szPrerequisitePbk", FieldType::WStr(MAX_PATH)),
        FieldSpec::new("szPrerequisiteEntry", FieldType::WStr(RAS_MAX_ENTRY_NAME + 1)),
        FieldSpec::new("dwRedialCount", FieldType::U32),
        FieldSpec::new("dwRedialPause", FieldType::U32),
        FieldSpec::new("ipv6addrDns", FieldType::Ipv6).since(Capability::Vista),
        FieldSpec::new("ipv6addrDnsAlt", FieldType::Ipv6).since(Capability::Vista),
        FieldSpec::new("dwIPv4InterfaceMetric", FieldType::U32).since(Capability::Vista),
        FieldSpec::new("dwIPv6InterfaceMetric", FieldType::U32).since(Capability::Vista),
        FieldSpec::new("ipv6addr", FieldType::Ipv6).since(Capability::Win7),
        FieldSpec::new("dwIPv6PrefixLength", FieldType::U32).since(Capability::Win7),
        FieldSpec::new("dwNetworkOutageTime", FieldType::U32).since(Capability::Win7),
        FieldSpec::new("szIDi", FieldType::WStr(RAS_MAX_ENTRY_NAME + 1)).since(Capability::Win8),
        FieldSpec::new("szIDr", FieldType::WStr(RAS_MAX_ENTRY_NAME + 1)).since(Capability::Win8),
        FieldSpec::new("fIsImsConfig", FieldType::Bool).since(Capability::Win8),
        FieldSpec::new("IdiType", FieldType::U32).since(Capability::Win8),
        FieldSpec::new("IdrType", FieldType::U32).since(Capability::Win8),
        FieldSpec::new("fDisableIKEv2Fragmentation", FieldType::Bool).since(Capability::Win8),
    ],
};

flag_set! {
    /// `RASEO_*`
    EntryOptions {
        USE_COUNTRY_AND_AREA_CODES = 0x0000_0001,
        SPECIFIC_IP_ADDR = 0x0000_0002,
        SPECIFIC_NAME_SERVERS = 0x0000_0004,
        IP_HEADER_COMPRESSION = 0x0000_0008,
        REMOTE_DEFAULT_GATEWAY = 0x0000_0010,
        DISABLE_LCP_EXTENSIONS = 0x0000_0020,
        TERMINAL_BEFORE_DIAL = 0x0000_0040,
        TERMINAL_AFTER_DIAL = 0x0000_0080,
        MODEM_LIGHTS = 0x0000_0100,
        SW_COMPRESSION = 0x0000_0200,
        REQUIRE_ENCRYPTED_PW = 0x0000_0400,
        REQUIRE_MS_ENCRYPTED_PW = 0x0000_0800,
        REQUIRE_DATA_ENCRYPTION = 0x0000_1000,
        NETWORK_LOGON = 0x0000_2000,
        USE_LOGON_CREDENTIALS = 0x0000_4000,
        PROMOTE_ALTERNATES = 0x0000_8000,
        SECURE_LOCAL_FILES = 0x0001_0000,
        REQUIRE_EAP = 0x0002_0000,
        REQUIRE_PAP = 0x0004_0000,
        REQUIRE_SPAP = 0x0008_0000,
        CUSTOM = 0x0010_0000,
        PREVIEW_PHONE_NUMBER = 0x0020_0000,
        SHARED_PHONE_NUMBERS = 0x0080_0000,
        PREVIEW_USER_PW = 0x0100_0000,
        PREVIEW_DOMAIN = 0x0200_0000,
        SHOW_DIALING_PROGRESS = 0x0400_0000,
        REQUIRE_CHAP = 0x0800_0000,
        REQUIRE_MS_CHAP = 0x1000_0000,
        REQUIRE_MS_CHAP2 = 0x2000_0000,
        REQUIRE_W95_MS_CHAP = 0x4000_0000,
        CUSTOM_SCRIPT = 0x8000_0000,
    }
}

flag_set! {
    /// `RASEO2_*`
    EntryOptions2 {
        SECURE_FILE_AND_PRINT = 0x0000_0001,
        SECURE_CLIENT_FOR_MS_NET = 0x0000_0002,
        DONT_NEGOTIATE_MULTILINK = 0x0000_0004,
        DONT_USE_RAS_CREDENTIALS = 0x0000_0008,
        USE_PRE_SHARED_KEY = 0x0000_0010,
        INTERNET = 0x0000_0020,
        DISABLE_NBT_OVER_IP = 0x0000_0040,
        USE_GLOBAL_DEVICE_SETTINGS = 0x0000_0080,
        RECONNECT_IF_DROPPED = 0x0000_0100,
        SHARE_PHONE_NUMBERS = 0x0000_0200,
        SECURE_ROUTING_COMPARTMENT = 0x0000_0400,
        USE_TYPICAL_SETTINGS = 0x0000_0800,
        IPV6_SPECIFIC_NAME_SERVERS = 0x0000_1000,
        IPV6_REMOTE_DEFAULT_GATEWAY = 0x0000_2000,
        REGISTER_IP_WITH_DNS = 0x0000_4000,
        USE_DNS_SUFFIX_FOR_REGISTRATION = 0x0000_8000,
        IPV4_EXPLICIT_METRIC = 0x0001_0000,
        IPV6_EXPLICIT_METRIC = 0x0002_0000,
        DISABLE_IKE_NAME_EKU_CHECK = 0x0004_0000,
        DISABLE_CLASS_BASED_STATIC_ROUTE = 0x0008_0000,
        SPECIFIC_IPV6_ADDR = 0x0010_0000,
        DISABLE_MOBILITY = 0x0020_0000,
        REQUIRE_MACHINE_CERTIFICATES = 0x0040_0000,
    }
}

flag_set! {
    /// `RASNP_*`
    NetworkProtocols {
        NETBEUI = 0x1,
        IPX = 0x2,
        IP = 0x4,
        IPV6 = 0x8,
    }
}

macro_rules! raw_enum {
    ($(#[$meta:meta])* $name:ident { $( $variant:ident = $value:expr ),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )*
            Other(u32),
        }

        impl $name {
            pub fn from_raw(raw: u32) -> Self {
                match raw {
                    $( $value => $name::$variant, )*
                    other => $name::Other(other),
                }
            }

            pub fn to_raw(self) -> u32 {
                match self {
                    $( $name::$variant => $value, )*
                    $name::Other(raw) => raw,
                }
            }
        }
    };
}

raw_enum! {
    /// `RASFP_*`
    FramingProtocol { Ppp = 1, Slip = 2, Ras = 4 }
}

raw_enum! {
    /// `ET_*` data encryption requirement
    EncryptionType { None = 0, Require = 1, RequireMax = 2, Optional = 3 }
}

raw_enum! {
    /// `RASEDM_*` multilink dial mode
    DialMode { Unspecified = 0, DialAll = 1, DialAsNeeded = 2 }
}

raw_enum! {
    /// `VS_*` tunnel protocol selection
    VpnStrategy {
        Default = 0,
        PptpOnly = 1,
        PptpFirst = 2,
        L2tpOnly = 3,
        L2tpFirst = 4,
        SstpOnly = 5,
        SstpFirst = 6,
        Ikev2Only = 7,
        Ikev2First = 8,
    }
}

raw_enum! {
    /// `RASET_*`
    EntryType { Phone = 1, Vpn = 2, Direct = 3, Internet = 4, Broadband = 5 }
}

/// A named, persisted description of a dialable destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    /// Owning phonebook; `None` until the entry is added to one
    pub phonebook: Option<PathBuf>,
    pub options: EntryOptions,
    pub options2: EntryOptions2,
    pub country_id: u32,
    pub country_code: u32,
    pub area_code: String,
    /// Phone number or VPN server address
    pub phone_number: String,
    pub ip_address: Option<Ipv4Addr>,
    pub dns_address: Option<Ipv4Addr>,
    pub dns_address_alt: Option<Ipv4Addr>,
    pub wins_address: Option<Ipv4Addr>,
    pub wins_address_alt: Option<Ipv4Addr>,
    pub frame_size: u32,
    pub network_protocols: NetworkProtocols,
    pub framing_protocol: FramingProtocol,
    pub script: String,
    pub device: RasDevice,
    pub sub_entries: u32,
    pub dial_mode: DialMode,
    pub idle_disconnect_seconds: u32,
    pub entry_type: EntryType,
    pub encryption: EncryptionType,
    pub custom_auth_key: u32,
    pub id: Uuid,
    pub custom_dial_dll: String,
    pub vpn_strategy: VpnStrategy,
    pub dns_suffix: String,
    pub tcp_window_size: u32,
    pub redial_count: u32,
    pub redial_pause_seconds: u32,
    // Vista
    pub ipv6_dns_address: Option<Ipv6Addr>,
    pub ipv6_dns_address_alt: Option<Ipv6Addr>,
    pub ipv4_interface_metric: u32,
    pub ipv6_interface_metric: u32,
    // Win7
    pub ipv6_address: Option<Ipv6Addr>,
    pub ipv6_prefix_length: u32,
    pub network_outage_seconds: u32,
    // Win8
    pub ims_config: bool,
    pub ikev2_fragmentation_disabled: bool,
    /// Native fields with no domain counterpart, kept so that a read-modify-write
    /// cycle does not clear them
    pub extra: FieldValues,
}

impl Entry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phonebook: None,
            options: EntryOptions::default(),
            options2: EntryOptions2::default(),
            country_id: 0,
            country_code: 0,
            area_code: String::new(),
            phone_number: String::new(),
            ip_address: None,
            dns_address: None,
            dns_address_alt: None,
            wins_address: None,
            wins_address_alt: None,
            frame_size: 0,
            network_protocols: NetworkProtocols::default(),
            framing_protocol: FramingProtocol::Ppp,
            script: String::new(),
            device: RasDevice::new("", ""),
            sub_entries: 0,
            dial_mode: DialMode::Unspecified,
            idle_disconnect_seconds: 0,
            entry_type: EntryType::Phone,
            encryption: EncryptionType::None,
            custom_auth_key: 0,
            id: Uuid::nil(),
            custom_dial_dll: String::new(),
            vpn_strategy: VpnStrategy::Default,
            dns_suffix: String::new(),
            tcp_window_size: 0,
            redial_count: 0,
            redial_pause_seconds: 0,
            ipv6_dns_address: None,
            ipv6_dns_address_alt: None,
            ipv4_interface_metric: 0,
            ipv6_interface_metric: 0,
            ipv6_address: None,
            ipv6_prefix_length: 0,
            network_outage_seconds: 0,
            ims_config: false,
            ikev2_fragmentation_disabled: false,
            extra: FieldValues::new(),
        }
    }

    /// VPN entry with the settings the OS connection wizard applies
    pub fn vpn(name: impl Into<String>, server: impl Into<String>, strategy: VpnStrategy) -> Self {
        let mut entry = Self::new(name);
        entry.phone_number = server.into();
        entry.entry_type = EntryType::Vpn;
        entry.vpn_strategy = strategy;
        entry.device = RasDevice::new(vpn_device_name(strategy), "vpn");
        entry.framing_protocol = FramingProtocol::Ppp;
        entry.network_protocols = NetworkProtocols::IP | NetworkProtocols::IPV6;
        entry.encryption = EncryptionType::Require;
        entry.options = EntryOptions::REMOTE_DEFAULT_GATEWAY
            | EntryOptions::MODEM_LIGHTS
            | EntryOptions::SW_COMPRESSION
            | EntryOptions::REQUIRE_ENCRYPTED_PW
            | EntryOptions::REQUIRE_DATA_ENCRYPTION
            | EntryOptions::PREVIEW_USER_PW
            | EntryOptions::PREVIEW_DOMAIN
            | EntryOptions::SHOW_DIALING_PROGRESS
            | EntryOptions::REQUIRE_MS_CHAP2;
        entry.options2 = EntryOptions2::DONT_NEGOTIATE_MULTILINK
            | EntryOptions2::RECONNECT_IF_DROPPED
            | EntryOptions2::IPV6_REMOTE_DEFAULT_GATEWAY;
        entry.redial_count = 3;
        entry.redial_pause_seconds = 60;
        entry.network_outage_seconds = 1800;
        entry.id = Uuid::new_v4();
        entry
    }

    pub fn is_attached(&self) -> bool {
        self.phonebook.is_some()
    }

    /// Owning phonebook path
    ///
    /// # Errors
    /// Returns `NotAttached` for an entry that is not part of a phonebook
    pub fn owner(&self) -> Result<&PathBuf> {
        self.phonebook
            .as_ref()
            .ok_or_else(|| RasError::NotAttached(self.name.clone()))
    }

    /// Check the entry is complete enough to be saved
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RasError::InvalidConfiguration(
                "Entry name cannot be empty".to_string(),
            ));
        }
        if self.device.device_type.is_empty() || self.device.name.is_empty() {
            return Err(RasError::InvalidConfiguration(format!(
                "Entry '{}' has no device",
                self.name
            )));
        }
        if matches!(self.entry_type, EntryType::Phone | EntryType::Vpn)
            && self.phone_number.is_empty()
        {
            return Err(RasError::InvalidConfiguration(format!(
                "Entry '{}' has no phone number or server address",
                self.name
            )));
        }
        if self.options.contains(EntryOptions::SPECIFIC_IP_ADDR) && self.ip_address.is_none() {
            return Err(RasError::InvalidConfiguration(format!(
                "Entry '{}' requests a specific IP address but has none",
                self.name
            )));
        }
        Ok(())
    }
}

/// Default WAN miniport for a tunnel strategy
pub fn vpn_device_name(strategy: VpnStrategy) -> &'static str {
    match strategy {
        VpnStrategy::PptpOnly | VpnStrategy::PptpFirst => "WAN Miniport (PPTP)",
        VpnStrategy::L2tpOnly | VpnStrategy::L2tpFirst => "WAN Miniport (L2TP)",
        VpnStrategy::SstpOnly | VpnStrategy::SstpFirst => "WAN Miniport (SSTP)",
        VpnStrategy::Ikev2Only | VpnStrategy::Ikev2First => "WAN Miniport (IKEv2)",
        _ => "WAN Miniport (PPTP)",
    }
}

fn opt_v4(addr: Ipv4Addr) -> Option<Ipv4Addr> {
    (!addr.is_unspecified()).then_some(addr)
}

fn opt_v6(addr: Option<Ipv6Addr>) -> Option<Ipv6Addr> {
    addr.filter(|a| !a.is_unspecified())
}

impl NativeRecord for Entry {
    fn schema() -> &'static Schema {
        &RASENTRY
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        Ok(Self {
            name: String::new(),
            phonebook: None,
            options: EntryOptions(fields.u32("dwfOptions")?),
            options2: EntryOptions2(fields.u32("dwfOptions2")?),
            country_id: fields.u32("dwCountryID")?,
            country_code: fields.u32("dwCountryCode")?,
            area_code: fields.string("szAreaCode")?,
            phone_number: fields.string("szLocalPhoneNumber")?,
            ip_address: opt_v4(fields.ipv4("ipaddr")?),
            dns_address: opt_v4(fields.ipv4("ipaddrDns")?),
            dns_address_alt: opt_v4(fields.ipv4("ipaddrDnsAlt")?),
            wins_address: opt_v4(fields.ipv4("ipaddrWins")?),
            wins_address_alt: opt_v4(fields.ipv4("ipaddrWinsAlt")?),
            frame_size: fields.u32("dwFrameSize")?,
            network_protocols: NetworkProtocols(fields.u32("dwfNetProtocols")?),
            framing_protocol: FramingProtocol::from_raw(fields.u32("dwFramingProtocol")?),
            script: fields.string("szScript")?,
            device: RasDevice {
                name: fields.string("szDeviceName")?,
                device_type: fields.string("szDeviceType")?,
            },
            sub_entries: fields.u32("dwSubEntries")?,
            dial_mode: DialMode::from_raw(fields.u32("dwDialMode")?),
            idle_disconnect_seconds: fields.u32("dwIdleDisconnectSeconds")?,
            entry_type: EntryType::from_raw(fields.u32("dwType")?),
            encryption: EncryptionType::from_raw(fields.u32("dwEncryptionType")?),
            custom_auth_key: fields.u32("dwCustomAuthKey")?,
            id: fields.guid("guidId")?,
            custom_dial_dll: fields.string("szCustomDialDll")?,
            vpn_strategy: VpnStrategy::from_raw(fields.u32("dwVpnStrategy")?),
            dns_suffix: fields.string("szDnsSuffix")?,
            tcp_window_size: fields.u32("dwTcpWindowSize")?,
            redial_count: fields.u32("dwRedialCount")?,
            redial_pause_seconds: fields.u32("dwRedialPause")?,
            ipv6_dns_address: opt_v6(fields.opt_ipv6("ipv6addrDns")),
            ipv6_dns_address_alt: opt_v6(fields.opt_ipv6("ipv6addrDnsAlt")),
            ipv4_interface_metric: fields.opt_u32("dwIPv4InterfaceMetric").unwrap_or(0),
            ipv6_interface_metric: fields.opt_u32("dwIPv6InterfaceMetric").unwrap_or(0),
            ipv6_address: opt_v6(fields.opt_ipv6("ipv6addr")),
            ipv6_prefix_length: fields.opt_u32("dwIPv6PrefixLength").unwrap_or(0),
            network_outage_seconds: fields.opt_u32("dwNetworkOutageTime").unwrap_or(0),
            ims_config: fields.opt_bool("fIsImsConfig").unwrap_or(false),
            ikev2_fragmentation_disabled: fields
                .opt_bool("fDisableIKEv2Fragmentation")
                .unwrap_or(false),
            extra: unmapped(fields),
        })
    }

    fn to_fields(&self) -> FieldValues {
        let v4 = |a: Option<Ipv4Addr>| FieldValue::Ipv4(a.unwrap_or(Ipv4Addr::UNSPECIFIED));
        let v6 = |a: Option<Ipv6Addr>| FieldValue::Ipv6(a.unwrap_or(Ipv6Addr::UNSPECIFIED));
        let mut fields = self.extra.clone();
        let mapped = [
            ("dwfOptions", FieldValue::U32(self.options.bits())),
            ("dwfOptions2", FieldValue::U32(self.options2.bits())),
            ("dwCountryID", FieldValue::U32(self.country_id)),
            ("dwCountryCode", FieldValue::U32(self.country_code)),
            ("szAreaCode", FieldValue::Str(self.area_code.clone())),
            ("szLocalPhoneNumber", FieldValue::Str(self.phone_number.clone())),
            ("ipaddr", v4(self.ip_address)),
            ("ipaddrDns", v4(self.dns_address)),
            ("ipaddrDnsAlt", v4(self.dns_address_alt)),
            ("ipaddrWins", v4(self.wins_address)),
            ("ipaddrWinsAlt", v4(self.wins_address_alt)),
            ("dwFrameSize", FieldValue::U32(self.frame_size)),
            ("dwfNetProtocols", FieldValue::U32(self.network_protocols.bits())),
            ("dwFramingProtocol", FieldValue::U32(self.framing_protocol.to_raw())),
            ("szScript", FieldValue::Str(self.script.clone())),
            ("szDeviceType", FieldValue::Str(self.device.device_type.clone())),
            ("szDeviceName", FieldValue::Str(self.device.name.clone())),
            ("dwSubEntries", FieldValue::U32(self.sub_entries)),
            ("dwDialMode", FieldValue::U32(self.dial_mode.to_raw())),
            (
                "dwIdleDisconnectSeconds",
                FieldValue::U32(self.idle_disconnect_seconds),
            ),
            ("dwType", FieldValue::U32(self.entry_type.to_raw())),
            ("dwEncryptionType", FieldValue::U32(self.encryption.to_raw())),
            ("dwCustomAuthKey", FieldValue::U32(self.custom_auth_key)),
            ("guidId", FieldValue::Guid(self.id)),
            ("szCustomDialDll", FieldValue::Str(self.custom_dial_dll.clone())),
            ("dwVpnStrategy", FieldValue::U32(self.vpn_strategy.to_raw())),
            ("szDnsSuffix", FieldValue::Str(self.dns_suffix.clone())),
            ("dwTcpWindowSize", FieldValue::U32(self.tcp_window_size)),
            ("dwRedialCount", FieldValue::U32(self.redial_count)),
            ("dwRedialPause", FieldValue::U32(self.redial_pause_seconds)),
            ("ipv6addrDns", v6(self.ipv6_dns_address)),
            ("ipv6addrDnsAlt", v6(self.ipv6_dns_address_alt)),
            (
                "dwIPv4InterfaceMetric",
                FieldValue::U32(self.ipv4_interface_metric),
            ),
            (
                "dwIPv6InterfaceMetric",
                FieldValue::U32(self.ipv6_interface_metric),
            ),
            ("ipv6addr", v6(self.ipv6_address)),
            ("dwIPv6PrefixLength", FieldValue::U32(self.ipv6_prefix_length)),
            (
                "dwNetworkOutageTime",
                FieldValue::U32(self.network_outage_seconds),
            ),
            ("fIsImsConfig", FieldValue::Bool(self.ims_config)),
            (
                "fDisableIKEv2Fragmentation",
                FieldValue::Bool(self.ikev2_fragmentation_disabled),
            ),
        ];
        for (name, value) in mapped {
            fields.set(name, value);
        }
        fields
    }
}

const MAPPED_FIELDS: &[&str] = &[
    "dwSize",
    "dwfOptions",
    "dwfOptions2",
    "dwCountryID",
    "dwCountryCode",
    "szAreaCode",
    "szLocalPhoneNumber",
    "ipaddr",
    "ipaddrDns",
    "ipaddrDnsAlt",
    "ipaddrWins",
    "ipaddrWinsAlt",
    "dwFrameSize",
    "dwfNetProtocols",
    "dwFramingProtocol",
    "szScript",
    "szDeviceType",
    "szDeviceName",
    "dwSubEntries",
    "dwDialMode",
    "dwIdleDisconnectSeconds",
    "dwType",
    "dwEncryptionType",
    "dwCustomAuthKey",
    "guidId",
    "szCustomDialDll",
    "dwVpnStrategy",
    "szDnsSuffix",
    "dwTcpWindowSize",
    "dwRedialCount",
    "dwRedialPause",
    "ipv6addrDns",
    "ipv6addrDnsAlt",
    "dwIPv4InterfaceMetric",
    "dwIPv6InterfaceMetric",
    "ipv6addr",
    "dwIPv6PrefixLength",
    "dwNetworkOutageTime",
    "fIsImsConfig",
    "fDisableIKEv2Fragmentation",
];

fn unmapped(fields: &FieldValues) -> FieldValues {
    let mut extra = FieldValues::new();
    for spec in RASENTRY.fields {
        if MAPPED_FIELDS.contains(&spec.name) {
            continue;
        }
        if let Some(value) = fields.get(spec.name) {
            extra.set(spec.name, value.clone());
        }
    }
    extra
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Entry populated with every field present at `cap`
    fn populated(cap: Capability) -> Entry {
        let mut entry = Entry::vpn("Office VPN", "vpn.example.com", VpnStrategy::Ikev2First);
        entry.options.insert(EntryOptions::SPECIFIC_NAME_SERVERS);
        entry.options.insert(EntryOptions::IP_HEADER_COMPRESSION);
        entry.options2.insert(EntryOptions2::USE_PRE_SHARED_KEY);
        entry.network_protocols.insert(NetworkProtocols::NETBEUI);
        entry.dns_address = Some(Ipv4Addr::new(10, 0, 0, 53));
        entry.dns_suffix = "corp.example.com".to_string();
        entry.idle_disconnect_seconds = 600;
        if !cap.at_least(Capability::Win7) {
            entry.network_outage_seconds = 0;
        }
        if cap.at_least(Capability::Vista) {
            entry.ipv6_dns_address = Some("2001:db8::53".parse().unwrap());
            entry.ipv4_interface_metric = 10;
            entry.ipv6_interface_metric = 20;
        }
        if cap.at_least(Capability::Win7) {
            entry.ipv6_address = Some("2001:db8::10".parse().unwrap());
            entry.ipv6_prefix_length = 64;
        }
        if cap.at_least(Capability::Win8) {
            entry.ikev2_fragmentation_disabled = true;
        }
        entry
    }

    /// Decoded entries carry no name/owner (those travel outside the record)
    fn strip(mut entry: Entry) -> Entry {
        entry.name = String::new();
        entry.phonebook = None;
        entry.extra = FieldValues::new();
        entry
    }

    #[test]
    fn test_round_trip_for_every_capability() {
        for cap in Capability::ALL {
            let entry = populated(cap);
            let bytes = entry.encode(cap).unwrap();
            assert_eq!(bytes.len(), RASENTRY.size(cap));

            let decoded = Entry::decode(&bytes, cap).unwrap();
            assert_eq!(decoded.options, entry.options, "options at {cap}");
            assert_eq!(decoded.options2, entry.options2, "options2 at {cap}");
            assert_eq!(decoded.network_protocols, entry.network_protocols);
            assert_eq!(decoded.framing_protocol, entry.framing_protocol);
            assert_eq!(decoded.encryption, entry.encryption);
            assert_eq!(strip(decoded), strip(entry), "entry at {cap}");
        }
    }

    #[test]
    fn test_layout_sizes_increase_with_capability() {
        let sizes: Vec<usize> = Capability::ALL.iter().map(|c| RASENTRY.size(*c)).collect();
        assert!(sizes.windows(2).all(|w| w[0] < w[1]), "{sizes:?}");
    }

    #[test]
    fn test_unmapped_fields_survive_update() {
        let cap = Capability::Win7;
        let entry = populated(cap);
        let mut fields = entry.to_fields();
        fields.set("szX25Address", FieldValue::Str("31107".to_string()));
        let bytes = RASENTRY.encode(&fields, cap).unwrap();

        let mut decoded = Entry::decode(&bytes, cap).unwrap();
        decoded.redial_count = 9;
        let rewritten = Entry::decode(&decoded.encode(cap).unwrap(), cap).unwrap();
        assert_eq!(rewritten.extra.opt_string("szX25Address").as_deref(), Some("31107"));
        assert_eq!(rewritten.redial_count, 9);
    }

    #[test]
    fn test_unknown_enum_values_preserved() {
        let mut entry = populated(Capability::Legacy);
        entry.vpn_strategy = VpnStrategy::Other(14);
        let bytes = entry.encode(Capability::Legacy).unwrap();
        let decoded = Entry::decode(&bytes, Capability::Legacy).unwrap();
        assert_eq!(decoded.vpn_strategy, VpnStrategy::Other(14));
    }

    #[test]
    fn test_validate() {
        assert!(populated(Capability::Win7).validate().is_ok());

        let mut entry = Entry::vpn("", "vpn.example.com", VpnStrategy::SstpOnly);
        assert!(matches!(
            entry.validate(),
            Err(RasError::InvalidConfiguration(_))
        ));

        entry.name = "Office".to_string();
        entry.phone_number.clear();
        assert!(entry.validate().is_err());
    }

    #[test]
    fn test_not_attached() {
        let entry = Entry::new("Standalone");
        assert!(!entry.is_attached());
        assert!(matches!(entry.owner(), Err(RasError::NotAttached(name)) if name == "Standalone"));
    }

    #[test]
    fn test_flag_helpers() {
        let mut options = EntryOptions::default();
        options.set(EntryOptions::REQUIRE_EAP, true);
        assert!(options.contains(EntryOptions::REQUIRE_EAP));
        options.set(EntryOptions::REQUIRE_EAP, false);
        assert_eq!(options.bits(), 0);
    }
}
