//! Native result codes and constants used by the RAS entry points

pub const SUCCESS: u32 = 0;

// Win32 codes
pub const ERROR_ACCESS_DENIED: u32 = 5;
pub const ERROR_INVALID_HANDLE: u32 = 6;
pub const ERROR_NOT_ENOUGH_MEMORY: u32 = 8;
pub const ERROR_INVALID_PARAMETER: u32 = 87;
pub const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
pub const ERROR_INVALID_NAME: u32 = 123;
pub const ERROR_PROC_NOT_FOUND: u32 = 127;
pub const ERROR_ALREADY_EXISTS: u32 = 183;
pub const ERROR_CANCELLED: u32 = 1223;
pub const ERROR_REQUEST_TIMEOUT: u32 = 1460;

// RAS codes (RASBASE = 600)
pub const PENDING: u32 = 600;
pub const ERROR_INVALID_PORT_HANDLE: u32 = 601;
pub const ERROR_BUFFER_TOO_SMALL: u32 = 603;
pub const ERROR_BUFFER_INVALID: u32 = 610;
pub const ERROR_CANNOT_FIND_PHONEBOOK_ENTRY: u32 = 623;
pub const ERROR_CANNOT_OPEN_PHONEBOOK: u32 = 621;
pub const ERROR_USER_DISCONNECTION: u32 = 631;
pub const ERROR_INVALID_SIZE: u32 = 632;
pub const ERROR_NO_CONNECTION: u32 = 668;
pub const ERROR_AUTHENTICATION_FAILURE: u32 = 691;
pub const ERROR_PROJECTION_NOT_COMPLETE: u32 = 730;
pub const ERROR_PROTOCOL_NOT_CONFIGURED: u32 = 731;
pub const ERROR_CANNOT_DELETE: u32 = 825;
pub const ERROR_DNS_NAME_RESOLUTION: u32 = 868;

/// Codes signalling that the caller buffer was too small and the required
/// size has been written back.
pub fn is_buffer_too_small(code: u32) -> bool {
    code == ERROR_BUFFER_TOO_SMALL || code == ERROR_INSUFFICIENT_BUFFER
}

// Connection state values (RASCONNSTATE)
pub const RASCS_PAUSED: u32 = 0x1000;
pub const RASCS_DONE: u32 = 0x2000;
pub const RASCS_CONNECTED: u32 = RASCS_DONE;
pub const RASCS_DISCONNECTED: u32 = RASCS_DONE + 1;

// Legacy projection selectors (RASPROJECTION)
pub const RASP_AMB: u32 = 0x10000;
pub const RASP_PPP_NBF: u32 = 0x803F;
pub const RASP_PPP_IPX: u32 = 0x802B;
pub const RASP_PPP_IP: u32 = 0x8021;
pub const RASP_PPP_CCP: u32 = 0x80FD;
pub const RASP_PPP_LCP: u32 = 0xC021;
pub const RASP_PPP_IPV6: u32 = 0x8057;

// Extended projection types (RASPROJECTION_INFO_TYPE)
pub const PROJECTION_INFO_TYPE_PPP: u32 = 1;
pub const PROJECTION_INFO_TYPE_IKEV2: u32 = 2;

// Credential masks (RASCM_*)
pub const RASCM_USER_NAME: u32 = 0x1;
pub const RASCM_PASSWORD: u32 = 0x2;
pub const RASCM_DOMAIN: u32 = 0x4;
pub const RASCM_DEFAULT_CREDS: u32 = 0x8;
pub const RASCM_PRE_SHARED_KEY: u32 = 0x10;
pub const RASCM_SERVER_PRE_SHARED_KEY: u32 = 0x20;
pub const RASCM_DDM_PRE_SHARED_KEY: u32 = 0x40;

// Tunnel endpoint tags (RASTUNNELENDPOINT.dwType)
pub const RASTUNNELENDPOINT_UNKNOWN: u32 = 0;
pub const RASTUNNELENDPOINT_IPV4: u32 = 1;
pub const RASTUNNELENDPOINT_IPV6: u32 = 2;

// Field lengths (in WCHARs, terminator excluded)
pub const RAS_MAX_ENTRY_NAME: usize = 256;
pub const RAS_MAX_DEVICE_TYPE: usize = 16;
pub const RAS_MAX_DEVICE_NAME: usize = 128;
pub const RAS_MAX_PHONE_NUMBER: usize = 128;
pub const RAS_MAX_CALLBACK_NUMBER: usize = RAS_MAX_PHONE_NUMBER;
pub const RAS_MAX_AREA_CODE: usize = 10;
pub const RAS_MAX_IP_ADDRESS: usize = 15;
pub const RAS_MAX_IPX_ADDRESS: usize = 21;
pub const RAS_MAX_REPLY_MESSAGE: usize = 1024;
pub const NETBIOS_NAME_LEN: usize = 16;
pub const UNLEN: usize = 256;
pub const PWLEN: usize = 256;
pub const DNLEN: usize = 15;
pub const MAX_PATH: usize = 260;
