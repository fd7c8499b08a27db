//! Connection state, status and statistics records

use super::{FieldSpec, FieldType, FieldValue, FieldValues, NativeRecord, Schema};
use crate::capability::Capability;
use crate::error::Result;
use crate::native::codes::*;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

pub static RASCONNSTATUS: Schema = Schema {
    name: "RASCONNSTATUS",
    fields: &[
        FieldSpec::new("dwSize", FieldType::U32),
        FieldSpec::new("rasconnstate", FieldType::U32),
        FieldSpec::new("dwError", FieldType::U32),
        FieldSpec::new("szDeviceType", FieldType::WStr(RAS_MAX_DEVICE_TYPE + 1)),
        FieldSpec::new("szDeviceName", FieldType::WStr(RAS_MAX_DEVICE_NAME + 1)),
        FieldSpec::new("szPhoneNumber", FieldType::WStr(RAS_MAX_PHONE_NUMBER + 1)),
        FieldSpec::new("localEndPoint", FieldType::Endpoint).since(Capability::Win7),
        FieldSpec::new("remoteEndPoint", FieldType::Endpoint).since(Capability::Win7),
        FieldSpec::new("rasconnsubstate", FieldType::U32).since(Capability::Win7),
    ],
};

pub static RAS_STATS: Schema = Schema {
    name: "RAS_STATS",
    fields: &[
        FieldSpec::new("dwSize", FieldType::U32),
        FieldSpec::new("dwBytesXmited", FieldType::Counter),
        FieldSpec::new("dwBytesRcved", FieldType::Counter),
        FieldSpec::new("dwFramesXmited", FieldType::Counter),
        FieldSpec::new("dwFramesRcved", FieldType::Counter),
        FieldSpec::new("dwCrcErr", FieldType::Counter),
        FieldSpec::new("dwTimeoutErr", FieldType::Counter),
        FieldSpec::new("dwAlignmentErr", FieldType::Counter),
        FieldSpec::new("dwHardwareOverrunErr", FieldType::Counter),
        FieldSpec::new("dwFramingErr", FieldType::Counter),
        FieldSpec::new("dwBufferOverrunErr", FieldType::Counter),
        FieldSpec::new("dwCompressionRatioIn", FieldType::Counter),
        FieldSpec::new("dwCompressionRatioOut", FieldType::Counter),
        FieldSpec::new("dwBps", FieldType::Counter),
        FieldSpec::new("dwConnectDuration", FieldType::Counter),
    ],
};

/// Phase of a connection attempt (`RASCONNSTATE`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    OpenPort,
    PortOpened,
    ConnectDevice,
    DeviceConnected,
    AllDevicesConnected,
    Authenticate,
    AuthNotify,
    AuthRetry,
    AuthCallback,
    AuthChangePassword,
    AuthProject,
    AuthLinkSpeed,
    AuthAck,
    ReAuthenticate,
    Authenticated,
    PrepareForCallback,
    WaitForModemReset,
    WaitForCallback,
    Projected,
    StartAuthentication,
    CallbackComplete,
    LogonNetwork,
    SubEntryConnected,
    SubEntryDisconnected,
    ApplySettings,
    Interactive,
    RetryAuthentication,
    CallbackSetByCaller,
    PasswordExpired,
    InvokeEapUi,
    Connected,
    Disconnected,
    Unknown(u32),
}

impl ConnectionState {
    pub fn from_raw(raw: u32) -> Self {
        use ConnectionState::*;
        const LINEAR: [ConnectionState; 25] = [
            OpenPort,
            PortOpened,
            ConnectDevice,
            DeviceConnected,
            AllDevicesConnected,
            Authenticate,
            AuthNotify,
            AuthRetry,
            AuthCallback,
            AuthChangePassword,
            AuthProject,
            AuthLinkSpeed,
            AuthAck,
            ReAuthenticate,
            Authenticated,
            PrepareForCallback,
            WaitForModemReset,
            WaitForCallback,
            Projected,
            StartAuthentication,
            CallbackComplete,
            LogonNetwork,
            SubEntryConnected,
            SubEntryDisconnected,
            ApplySettings,
        ];
        match raw {
            r if (r as usize) < LINEAR.len() => LINEAR[r as usize],
            RASCS_PAUSED => Interactive,
            r if r == RASCS_PAUSED + 1 => RetryAuthentication,
            r if r == RASCS_PAUSED + 2 => CallbackSetByCaller,
            r if r == RASCS_PAUSED + 3 => PasswordExpired,
            r if r == RASCS_PAUSED + 4 => InvokeEapUi,
            RASCS_CONNECTED => Connected,
            RASCS_DISCONNECTED => Disconnected,
            other => Unknown(other),
        }
    }

    pub fn to_raw(self) -> u32 {
        use ConnectionState::*;
        match self {
            OpenPort => 0,
            PortOpened => 1,
            ConnectDevice => 2,
            DeviceConnected => 3,
            AllDevicesConnected => 4,
            Authenticate => 5,
            AuthNotify => 6,
            AuthRetry => 7,
            AuthCallback => 8,
            AuthChangePassword => 9,
            AuthProject => 10,
            AuthLinkSpeed => 11,
            AuthAck => 12,
            ReAuthenticate => 13,
            Authenticated => 14,
            PrepareForCallback => 15,
            WaitForModemReset => 16,
            WaitForCallback => 17,
            Projected => 18,
            StartAuthentication => 19,
            CallbackComplete => 20,
            LogonNetwork => 21,
            SubEntryConnected => 22,
            SubEntryDisconnected => 23,
            ApplySettings => 24,
            Interactive => RASCS_PAUSED,
            RetryAuthentication => RASCS_PAUSED + 1,
            CallbackSetByCaller => RASCS_PAUSED + 2,
            PasswordExpired => RASCS_PAUSED + 3,
            InvokeEapUi => RASCS_PAUSED + 4,
            Connected => RASCS_CONNECTED,
            Disconnected => RASCS_DISCONNECTED,
            Unknown(raw) => raw,
        }
    }

    /// `Connected` or `Disconnected`
    pub fn is_done(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Disconnected)
    }

    /// Waiting for caller input (`RASCS_PAUSED` range)
    pub fn is_paused(self) -> bool {
        let raw = self.to_raw();
        (RASCS_PAUSED..RASCS_DONE).contains(&raw)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Unknown(raw) => write!(f, "Unknown({raw:#x})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Sub-state of an established connection (`RASCONNSUBSTATE`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionSubState {
    None,
    Dormant,
    Reconnecting,
    Reconnected,
    Unknown(u32),
}

impl ConnectionSubState {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => ConnectionSubState::None,
            1 => ConnectionSubState::Dormant,
            2 => ConnectionSubState::Reconnecting,
            RASCS_DONE => ConnectionSubState::Reconnected,
            other => ConnectionSubState::Unknown(other),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            ConnectionSubState::None => 0,
            ConnectionSubState::Dormant => 1,
            ConnectionSubState::Reconnecting => 2,
            ConnectionSubState::Reconnected => RASCS_DONE,
            ConnectionSubState::Unknown(raw) => raw,
        }
    }
}

/// Current status of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Native error code, `None` when zero
    pub error_code: Option<i32>,
    pub device_name: String,
    pub device_type: String,
    pub phone_number: String,
    /// Tunnel endpoints, from Win7 on
    pub local_endpoint: Option<IpAddr>,
    pub remote_endpoint: Option<IpAddr>,
    pub sub_state: Option<ConnectionSubState>,
}

impl NativeRecord for ConnectionStatus {
    fn schema() -> &'static Schema {
        &RASCONNSTATUS
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        let error = fields.u32("dwError")?;
        Ok(Self {
            state: ConnectionState::from_raw(fields.u32("rasconnstate")?),
            error_code: (error != 0).then_some(error as i32),
            device_name: fields.string("szDeviceName")?,
            device_type: fields.string("szDeviceType")?,
            phone_number: fields.string("szPhoneNumber")?,
            local_endpoint: fields.endpoint("localEndPoint"),
            remote_endpoint: fields.endpoint("remoteEndPoint"),
            sub_state: fields
                .opt_u32("rasconnsubstate")
                .map(ConnectionSubState::from_raw),
        })
    }

    fn to_fields(&self) -> FieldValues {
        let mut fields = FieldValues::new()
            .with("rasconnstate", FieldValue::U32(self.state.to_raw()))
            .with(
                "dwError",
                FieldValue::U32(self.error_code.unwrap_or(0) as u32),
            )
            .with("szDeviceName", FieldValue::Str(self.device_name.clone()))
            .with("szDeviceType", FieldValue::Str(self.device_type.clone()))
            .with("szPhoneNumber", FieldValue::Str(self.phone_number.clone()))
            .with("localEndPoint", FieldValue::Endpoint(self.local_endpoint))
            .with("remoteEndPoint", FieldValue::Endpoint(self.remote_endpoint));
        if let Some(sub) = self.sub_state {
            fields.set("rasconnsubstate", FieldValue::U32(sub.to_raw()));
        }
        fields
    }
}

/// Traffic statistics of a connection or link.
///
/// Native `DWORD` counters are widened to `i64`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStatistics {
    pub bytes_transmitted: i64,
    pub bytes_received: i64,
    pub frames_transmitted: i64,
    pub frames_received: i64,
    pub crc_errors: i64,
    pub timeout_errors: i64,
    pub alignment_errors: i64,
    pub hardware_overrun_errors: i64,
    pub framing_errors: i64,
    pub buffer_overrun_errors: i64,
    pub compression_ratio_in: i64,
    pub compression_ratio_out: i64,
    pub link_speed_bps: i64,
    pub connect_duration: Duration,
}

impl LinkStatistics {
    pub fn total_bytes(&self) -> i64 {
        self.bytes_transmitted + self.bytes_received
    }

    pub fn total_errors(&self) -> i64 {
        self.crc_errors
            + self.timeout_errors
            + self.alignment_errors
            + self.hardware_overrun_errors
            + self.framing_errors
            + self.buffer_overrun_errors
    }
}

impl NativeRecord for LinkStatistics {
    fn schema() -> &'static Schema {
        &RAS_STATS
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        Ok(Self {
            bytes_transmitted: fields.int("dwBytesXmited")?,
            bytes_received: fields.int("dwBytesRcved")?,
            frames_transmitted: fields.int("dwFramesXmited")?,
            frames_received: fields.int("dwFramesRcved")?,
            crc_errors: fields.int("dwCrcErr")?,
            timeout_errors: fields.int("dwTimeoutErr")?,
            alignment_errors: fields.int("dwAlignmentErr")?,
            hardware_overrun_errors: fields.int("dwHardwareOverrunErr")?,
            framing_errors: fields.int("dwFramingErr")?,
            buffer_overrun_errors: fields.int("dwBufferOverrunErr")?,
            compression_ratio_in: fields.int("dwCompressionRatioIn")?,
            compression_ratio_out: fields.int("dwCompressionRatioOut")?,
            link_speed_bps: fields.int("dwBps")?,
            connect_duration: Duration::from_millis(fields.int("dwConnectDuration")? as u64),
        })
    }

    fn to_fields(&self) -> FieldValues {
        FieldValues::new()
            .with("dwBytesXmited", FieldValue::Int(self.bytes_transmitted))
            .with("dwBytesRcved", FieldValue::Int(self.bytes_received))
            .with("dwFramesXmited", FieldValue::Int(self.frames_transmitted))
            .with("dwFramesRcved", FieldValue::Int(self.frames_received))
            .with("dwCrcErr", FieldValue::Int(self.crc_errors))
            .with("dwTimeoutErr", FieldValue::Int(self.timeout_errors))
            .with("dwAlignmentErr", FieldValue::Int(self.alignment_errors))
            .with(
                "dwHardwareOverrunErr",
                FieldValue::Int(self.hardware_overrun_errors),
            )
            .with("dwFramingErr", FieldValue::Int(self.framing_errors))
            .with(
                "dwBufferOverrunErr",
                FieldValue::Int(self.buffer_overrun_errors),
            )
            .with(
                "dwCompressionRatioIn",
                FieldValue::Int(self.compression_ratio_in),
            )
            .with(
                "dwCompressionRatioOut",
                FieldValue::Int(self.compression_ratio_out),
            )
            .with("dwBps", FieldValue::Int(self.link_speed_bps))
            .with(
                "dwConnectDuration",
                FieldValue::Int(self.connect_duration.as_millis() as i64),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_raw_values() {
        assert_eq!(ConnectionState::from_raw(3), ConnectionState::DeviceConnected);
        assert_eq!(ConnectionState::from_raw(0x2000), ConnectionState::Connected);
        assert_eq!(ConnectionState::from_raw(0x2001), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::from_raw(0x1004), ConnectionState::InvokeEapUi);
        assert_eq!(ConnectionState::from_raw(99), ConnectionState::Unknown(99));
        for raw in (0..25).chain(0x1000..0x1005).chain([0x2000, 0x2001]) {
            assert_eq!(ConnectionState::from_raw(raw).to_raw(), raw);
        }
        assert!(ConnectionState::Interactive.is_paused());
        assert!(ConnectionState::Connected.is_done());
    }

    #[test]
    fn test_counters_hold_full_dword_range() {
        let stats = LinkStatistics {
            bytes_transmitted: u32::MAX as i64,
            bytes_received: u32::MAX as i64,
            connect_duration: Duration::from_secs(90),
            ..Default::default()
        };
        let bytes = stats.encode(Capability::Legacy).unwrap();
        let decoded = LinkStatistics::decode(&bytes, Capability::Legacy).unwrap();
        assert_eq!(decoded, stats);
        assert_eq!(decoded.total_bytes(), 2 * 4_294_967_295);
    }

    #[test]
    fn test_status_endpoints_only_from_win7() {
        let status = ConnectionStatus {
            state: ConnectionState::Connected,
            error_code: None,
            device_name: "WAN Miniport (IKEv2)".into(),
            device_type: "vpn".into(),
            phone_number: "vpn.example.com".into(),
            local_endpoint: Some("192.168.1.20".parse().unwrap()),
            remote_endpoint: Some("2001:db8::1".parse().unwrap()),
            sub_state: Some(ConnectionSubState::None),
        };

        let win7 = status.encode(Capability::Win7).unwrap();
        assert_eq!(ConnectionStatus::decode(&win7, Capability::Win7).unwrap(), status);

        let legacy = status.encode(Capability::Legacy).unwrap();
        let decoded = ConnectionStatus::decode(&legacy, Capability::Legacy).unwrap();
        assert_eq!(decoded.local_endpoint, None);
        assert_eq!(decoded.sub_state, None);
        assert_eq!(decoded.phone_number, "vpn.example.com");
    }

    #[test]
    fn test_status_error_code() {
        let mut record = RASCONNSTATUS.empty(Capability::Legacy);
        let offset = RASCONNSTATUS
            .offset_of("dwError", Capability::Legacy)
            .unwrap();
        record[offset..offset + 4].copy_from_slice(&691u32.to_le_bytes());
        let decoded = ConnectionStatus::decode(&record, Capability::Legacy).unwrap();
        assert_eq!(decoded.error_code, Some(691));
        assert_eq!(decoded.state, ConnectionState::OpenPort);
    }
}
