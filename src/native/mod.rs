//! Native RAS entry-point table
//!
//! [`NativeApi`] is the seam between the typed operations and the C ABI. Every
//! method mirrors one native entry point: it takes raw byte buffers laid out by
//! the marshaling layer and returns the raw `u32` result code. Backends are
//! injected as `Arc<dyn NativeApi>`.
//!
//! An entry point that the backend cannot resolve returns
//! [`codes::ERROR_PROC_NOT_FOUND`].

use std::fmt;
use std::sync::Arc;

use crate::capability::Capability;

pub mod codes;
pub mod simulated;
#[cfg(windows)]
pub mod windows;

/// Pointer-sized native resource identifier (`HRASCONN`).
pub type RawHandle = usize;

/// Identity of a native entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryPoint {
    EnumConnections,
    EnumDevices,
    EnumEntries,
    EnumAutodialAddresses,
    GetEntryProperties,
    SetEntryProperties,
    DeleteEntry,
    RenameEntry,
    ValidateEntryName,
    GetCredentials,
    SetCredentials,
    GetCustomAuthData,
    SetCustomAuthData,
    GetEapUserData,
    SetEapUserData,
    GetConnectStatus,
    GetConnectionStatistics,
    GetLinkStatistics,
    ClearConnectionStatistics,
    GetProjectionInfo,
    GetProjectionInfoEx,
    Dial,
    HangUp,
    GetErrorString,
}

impl EntryPoint {
    pub const ALL: &'static [EntryPoint] = &[
        EntryPoint::EnumConnections,
        EntryPoint::EnumDevices,
        EntryPoint::EnumEntries,
        EntryPoint::EnumAutodialAddresses,
        EntryPoint::GetEntryProperties,
        EntryPoint::SetEntryProperties,
        EntryPoint::DeleteEntry,
        EntryPoint::RenameEntry,
        EntryPoint::ValidateEntryName,
        EntryPoint::GetCredentials,
        EntryPoint::SetCredentials,
        EntryPoint::GetCustomAuthData,
        EntryPoint::SetCustomAuthData,
        EntryPoint::GetEapUserData,
        EntryPoint::SetEapUserData,
        EntryPoint::GetConnectStatus,
        EntryPoint::GetConnectionStatistics,
        EntryPoint::GetLinkStatistics,
        EntryPoint::ClearConnectionStatistics,
        EntryPoint::GetProjectionInfo,
        EntryPoint::GetProjectionInfoEx,
        EntryPoint::Dial,
        EntryPoint::HangUp,
        EntryPoint::GetErrorString,
    ];

    /// Exported symbol name in `rasapi32.dll`
    pub fn symbol(self) -> &'static str {
        match self {
            EntryPoint::EnumConnections => "RasEnumConnectionsW",
            EntryPoint::EnumDevices => "RasEnumDevicesW",
            EntryPoint::EnumEntries => "RasEnumEntriesW",
            EntryPoint::EnumAutodialAddresses => "RasEnumAutodialAddressesW",
            EntryPoint::GetEntryProperties => "RasGetEntryPropertiesW",
            EntryPoint::SetEntryProperties => "RasSetEntryPropertiesW",
            EntryPoint::DeleteEntry => "RasDeleteEntryW",
            EntryPoint::RenameEntry => "RasRenameEntryW",
            EntryPoint::ValidateEntryName => "RasValidateEntryNameW",
            EntryPoint::GetCredentials => "RasGetCredentialsW",
            EntryPoint::SetCredentials => "RasSetCredentialsW",
            EntryPoint::GetCustomAuthData => "RasGetCustomAuthDataW",
            EntryPoint::SetCustomAuthData => "RasSetCustomAuthDataW",
            EntryPoint::GetEapUserData => "RasGetEapUserDataW",
            EntryPoint::SetEapUserData => "RasSetEapUserDataW",
            EntryPoint::GetConnectStatus => "RasGetConnectStatusW",
            EntryPoint::GetConnectionStatistics => "RasGetConnectionStatistics",
            EntryPoint::GetLinkStatistics => "RasGetLinkStatistics",
            EntryPoint::ClearConnectionStatistics => "RasClearConnectionStatistics",
            EntryPoint::GetProjectionInfo => "RasGetProjectionInfoW",
            EntryPoint::GetProjectionInfoEx => "RasGetProjectionInfoEx",
            EntryPoint::Dial => "RasDialW",
            EntryPoint::HangUp => "RasHangUpW",
            EntryPoint::GetErrorString => "RasGetErrorStringW",
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One invocation of the native dial progress callback (`RasDialFunc2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialNotification {
    pub callback_id: usize,
    pub sub_entry: u32,
    pub handle: RawHandle,
    pub state: u32,
    pub error: u32,
    pub extended_error: u32,
}

/// Receiver of native dial callbacks. Invoked on a thread owned by the OS.
pub trait DialNotificationSink: Send + Sync {
    fn notify(&self, notification: DialNotification);
}

/// Arguments of the native dial entry point.
pub struct DialRequest<'a> {
    pub phonebook: Option<&'a str>,
    /// Encoded dial extensions record
    pub extensions: &'a [u8],
    /// Encoded dial parameters record
    pub params: &'a [u8],
    /// Correlation value echoed back in every [`DialNotification`]
    pub callback_id: usize,
    pub sink: Arc<dyn DialNotificationSink>,
}

/// Table of native RAS entry points.
pub trait NativeApi: Send + Sync {
    /// Whether the backend resolved `entry_point`
    fn has_entry_point(&self, entry_point: EntryPoint) -> bool;

    /// Capability level reported by the backend, if it knows better than probing
    fn reported_capability(&self) -> Option<Capability> {
        None
    }

    fn enum_connections(&self, buf: &mut [u8], size: &mut u32, count: &mut u32) -> u32;
    fn enum_devices(&self, buf: &mut [u8], size: &mut u32, count: &mut u32) -> u32;
    fn enum_entries(
        &self,
        phonebook: Option<&str>,
        buf: &mut [u8],
        size: &mut u32,
        count: &mut u32,
    ) -> u32;
    /// Writes a double-NUL terminated UTF-16 list of addresses.
    fn enum_autodial_addresses(&self, buf: &mut [u8], size: &mut u32, count: &mut u32) -> u32;

    fn get_entry_properties(
        &self,
        phonebook: Option<&str>,
        entry: &str,
        buf: &mut [u8],
        size: &mut u32,
    ) -> u32;
    fn set_entry_properties(&self, phonebook: Option<&str>, entry: &str, record: &[u8]) -> u32;
    fn delete_entry(&self, phonebook: Option<&str>, entry: &str) -> u32;
    fn rename_entry(&self, phonebook: Option<&str>, old_name: &str, new_name: &str) -> u32;
    fn validate_entry_name(&self, phonebook: Option<&str>, entry: &str) -> u32;

    fn get_credentials(&self, phonebook: Option<&str>, entry: &str, record: &mut [u8]) -> u32;
    fn set_credentials(
        &self,
        phonebook: Option<&str>,
        entry: &str,
        record: &[u8],
        clear: bool,
    ) -> u32;

    fn get_custom_auth_data(
        &self,
        phonebook: Option<&str>,
        entry: &str,
        buf: &mut [u8],
        size: &mut u32,
    ) -> u32;
    fn set_custom_auth_data(&self, phonebook: Option<&str>, entry: &str, data: &[u8]) -> u32;
    fn get_eap_user_data(
        &self,
        phonebook: Option<&str>,
        entry: &str,
        buf: &mut [u8],
        size: &mut u32,
    ) -> u32;
    fn set_eap_user_data(&self, phonebook: Option<&str>, entry: &str, data: &[u8]) -> u32;

    fn get_connect_status(&self, handle: RawHandle, record: &mut [u8]) -> u32;
    fn get_connection_statistics(&self, handle: RawHandle, record: &mut [u8]) -> u32;
    fn get_link_statistics(&self, handle: RawHandle, sub_entry: u32, record: &mut [u8]) -> u32;
    fn clear_connection_statistics(&self, handle: RawHandle) -> u32;

    fn get_projection_info(
        &self,
        handle: RawHandle,
        projection: u32,
        buf: &mut [u8],
        size: &mut u32,
    ) -> u32;
    fn get_projection_info_ex(&self, handle: RawHandle, buf: &mut [u8], size: &mut u32) -> u32;

    /// Start a dial. Returns synchronously; progress arrives through `request.sink`.
    fn dial(&self, request: DialRequest<'_>, handle: &mut RawHandle) -> u32;
    /// Drop whatever the backend keeps to route notifications for
    /// `callback_id`. Called once the dial is terminal, including when the
    /// native side never sent a final notification.
    fn release_dial_routing(&self, _callback_id: usize) {}
    fn hang_up(&self, handle: RawHandle) -> u32;

    /// Writes a NUL terminated UTF-16 description of `code`.
    fn get_error_string(&self, code: u32, buf: &mut [u8]) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_symbols_are_unique() {
        let symbols: HashSet<_> = EntryPoint::ALL.iter().map(|ep| ep.symbol()).collect();
        assert_eq!(symbols.len(), EntryPoint::ALL.len());
    }

    #[test]
    fn test_display_uses_symbol() {
        assert_eq!(EntryPoint::HangUp.to_string(), "RasHangUpW");
    }
}
