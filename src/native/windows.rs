//! `rasapi32.dll` backend
//!
//! Symbols are resolved on first use with `GetProcAddress`; an export the
//! running OS does not have answers `ERROR_PROC_NOT_FOUND`. Dial progress
//! arrives on `RasDialFunc2`, which only carries the callback id stamped into
//! the dial parameters, so a process-wide table routes each id to its sink.

use super::codes::*;
use super::{
    DialNotification, DialNotificationSink, DialRequest, EntryPoint, NativeApi, RawHandle,
};
use crate::capability::Capability;
use crate::error::{RasError, Result};
use crate::marshal::{decode_wstr, encode_multi_sz};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{CString, OsString};
use std::os::windows::ffi::OsStrExt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;
use winapi::shared::basetsd::ULONG_PTR;
use winapi::shared::minwindef::{BOOL, DWORD, HMODULE, LPVOID, UINT};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::libloaderapi::{GetProcAddress, LoadLibraryW};
use winapi::um::winnt::{HANDLE, LPCWSTR, LPWSTR};

/// `RasDialFunc2` notifier type
const NOTIFIER_RAS_DIAL_FUNC2: DWORD = 2;

type RasDialFunc2 = unsafe extern "system" fn(
    callback_id: ULONG_PTR,
    sub_entry: DWORD,
    hrasconn: HANDLE,
    message: UINT,
    state: DWORD,
    error: DWORD,
    extended_error: DWORD,
) -> DWORD;

lazy_static::lazy_static! {
    /// Callback id -> sink for dials in flight
    static ref TRAMPOLINES: Mutex<HashMap<usize, Arc<dyn DialNotificationSink>>> =
        Mutex::new(HashMap::new());
}

unsafe extern "system" fn dial_trampoline(
    callback_id: ULONG_PTR,
    sub_entry: DWORD,
    hrasconn: HANDLE,
    _message: UINT,
    state: DWORD,
    error: DWORD,
    extended_error: DWORD,
) -> DWORD {
    let id = callback_id as usize;
    let sink = TRAMPOLINES.lock().get(&id).cloned();
    if let Some(sink) = sink {
        let notification = DialNotification {
            callback_id: id,
            sub_entry,
            handle: hrasconn as RawHandle,
            state,
            error,
            extended_error,
        };
        if catch_unwind(AssertUnwindSafe(|| sink.notify(notification))).is_err() {
            log::error!("dial notification handler panicked (callback id {})", id);
        }
    }
    if error != 0 || state == RASCS_CONNECTED || state == RASCS_DISCONNECTED {
        TRAMPOLINES.lock().remove(&id);
    }
    // Nonzero keeps the notifications coming
    1
}

fn wide(s: &str) -> Vec<u16> {
    OsString::from(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

fn opt_wide(s: Option<&str>) -> Option<Vec<u16>> {
    s.filter(|s| !s.is_empty()).map(wide)
}

fn wide_ptr(s: &Option<Vec<u16>>) -> LPCWSTR {
    s.as_ref().map_or(ptr::null(), |w| w.as_ptr())
}

fn module(name: &str) -> Option<HMODULE> {
    let name = wide(name);
    let module = unsafe { LoadLibraryW(name.as_ptr()) };
    (!module.is_null()).then_some(module)
}

fn proc_address(module: HMODULE, symbol: &str) -> Option<usize> {
    let symbol = CString::new(symbol).ok()?;
    let addr = unsafe { GetProcAddress(module, symbol.as_ptr()) };
    (!addr.is_null()).then_some(addr as usize)
}

/// Calls through a resolved symbol, or answers `ERROR_PROC_NOT_FOUND`
macro_rules! ras_call {
    ($self:ident, $ep:expr, fn($($ty:ty),* $(,)?), $($arg:expr),* $(,)?) => {{
        match $self.resolve($ep) {
            Some(addr) => unsafe {
                let f: unsafe extern "system" fn($($ty),*) -> DWORD = std::mem::transmute(addr);
                f($($arg),*)
            },
            None => ERROR_PROC_NOT_FOUND,
        }
    }};
}

/// Native backend over `rasapi32.dll`
pub struct RasApi32 {
    module: HMODULE,
    symbols: Mutex<HashMap<EntryPoint, Option<usize>>>,
    capability: Capability,
}

// The module handle is process-global and the symbol cache is locked.
unsafe impl Send for RasApi32 {}
unsafe impl Sync for RasApi32 {}

impl RasApi32 {
    pub fn load() -> Result<Self> {
        let module = module("rasapi32.dll").ok_or_else(|| {
            let code = unsafe { GetLastError() };
            RasError::Io(std::io::Error::from_raw_os_error(code as i32))
        })?;
        let capability = detect_capability(module);
        log::info!("Loaded rasapi32.dll (capability {})", capability);
        Ok(Self {
            module,
            symbols: Mutex::new(HashMap::new()),
            capability,
        })
    }

    fn resolve(&self, entry_point: EntryPoint) -> Option<usize> {
        *self
            .symbols
            .lock()
            .entry(entry_point)
            .or_insert_with(|| {
                let addr = proc_address(self.module, entry_point.symbol());
                if addr.is_none() {
                    log::debug!("{} is not exported by this system", entry_point);
                }
                addr
            })
    }
}

/// Newest level whose marker export is present
fn detect_capability(rasapi: HMODULE) -> Capability {
    if proc_address(rasapi, "RasGetPCscf").is_some() {
        return Capability::Win8;
    }
    if proc_address(rasapi, EntryPoint::GetProjectionInfoEx.symbol()).is_some() {
        return Capability::Win7;
    }
    let vista = module("kernel32.dll")
        .and_then(|kernel| proc_address(kernel, "GetTickCount64"))
        .is_some();
    if vista {
        Capability::Vista
    } else {
        Capability::Legacy
    }
}

impl NativeApi for RasApi32 {
    fn has_entry_point(&self, entry_point: EntryPoint) -> bool {
        self.resolve(entry_point).is_some()
    }

    fn reported_capability(&self) -> Option<Capability> {
        Some(self.capability)
    }

    fn enum_connections(&self, buf: &mut [u8], size: &mut u32, count: &mut u32) -> u32 {
        ras_call!(
            self,
            EntryPoint::EnumConnections,
            fn(*mut u8, *mut DWORD, *mut DWORD),
            buf.as_mut_ptr(),
            size,
            count
        )
    }

    fn enum_devices(&self, buf: &mut [u8], size: &mut u32, count: &mut u32) -> u32 {
        ras_call!(
            self,
            EntryPoint::EnumDevices,
            fn(*mut u8, *mut DWORD, *mut DWORD),
            buf.as_mut_ptr(),
            size,
            count
        )
    }

    fn enum_entries(
        &self,
        phonebook: Option<&str>,
        buf: &mut [u8],
        size: &mut u32,
        count: &mut u32,
    ) -> u32 {
        let phonebook = opt_wide(phonebook);
        ras_call!(
            self,
            EntryPoint::EnumEntries,
            fn(LPCWSTR, LPCWSTR, *mut u8, *mut DWORD, *mut DWORD),
            ptr::null(),
            wide_ptr(&phonebook),
            buf.as_mut_ptr(),
            size,
            count
        )
    }

    fn enum_autodial_addresses(&self, buf: &mut [u8], size: &mut u32, count: &mut u32) -> u32 {
        // The OS answers an array of string pointers into its own buffer;
        // callers get the flattened list
        let mut native_size: DWORD = 0;
        let mut native_count: DWORD = 0;
        let mut native: Vec<u8> = Vec::new();
        let code = loop {
            let code = ras_call!(
                self,
                EntryPoint::EnumAutodialAddresses,
                fn(*mut LPWSTR, *mut DWORD, *mut DWORD),
                if native.is_empty() {
                    ptr::null_mut()
                } else {
                    native.as_mut_ptr() as *mut LPWSTR
                },
                &mut native_size,
                &mut native_count
            );
            if is_buffer_too_small(code) && native_size as usize > native.len() {
                native = vec![0u8; native_size as usize];
                continue;
            }
            break code;
        };
        if code != SUCCESS {
            return code;
        }
        *count = native_count;
        if native_count == 0 {
            *size = 0;
            return SUCCESS;
        }

        let pointers = native.as_ptr() as *const LPWSTR;
        let mut addresses = Vec::with_capacity(native_count as usize);
        for i in 0..native_count as usize {
            let address = unsafe {
                let p = *pointers.add(i);
                let mut len = 0;
                while *p.add(len) != 0 {
                    len += 1;
                }
                String::from_utf16_lossy(std::slice::from_raw_parts(p, len))
            };
            addresses.push(address);
        }
        let flat = encode_multi_sz(&addresses);
        if (*size as usize) < flat.len() || buf.len() < flat.len() {
            *size = flat.len() as u32;
            return ERROR_BUFFER_TOO_SMALL;
        }
        buf[..flat.len()].copy_from_slice(&flat);
        *size = flat.len() as u32;
        SUCCESS
    }

    fn get_entry_properties(
        &self,
        phonebook: Option<&str>,
        entry: &str,
        buf: &mut [u8],
        size: &mut u32,
    ) -> u32 {
        let phonebook = opt_wide(phonebook);
        let entry = wide(entry);
        ras_call!(
            self,
            EntryPoint::GetEntryProperties,
            fn(LPCWSTR, LPCWSTR, *mut u8, *mut DWORD, *mut u8, *mut DWORD),
            wide_ptr(&phonebook),
            entry.as_ptr(),
            if buf.is_empty() { ptr::null_mut() } else { buf.as_mut_ptr() },
            size,
            ptr::null_mut(),
            ptr::null_mut()
        )
    }

    fn set_entry_properties(&self, phonebook: Option<&str>, entry: &str, record: &[u8]) -> u32 {
        let phonebook = opt_wide(phonebook);
        let entry = wide(entry);
        ras_call!(
            self,
            EntryPoint::SetEntryProperties,
            fn(LPCWSTR, LPCWSTR, *const u8, DWORD, *const u8, DWORD),
            wide_ptr(&phonebook),
            entry.as_ptr(),
            record.as_ptr(),
            record.len() as DWORD,
            ptr::null(),
            0
        )
    }

    fn delete_entry(&self, phonebook: Option<&str>, entry: &str) -> u32 {
        let phonebook = opt_wide(phonebook);
        let entry = wide(entry);
        ras_call!(
            self,
            EntryPoint::DeleteEntry,
            fn(LPCWSTR, LPCWSTR),
            wide_ptr(&phonebook),
            entry.as_ptr()
        )
    }

    fn rename_entry(&self, phonebook: Option<&str>, old_name: &str, new_name: &str) -> u32 {
        let phonebook = opt_wide(phonebook);
        let old_name = wide(old_name);
        let new_name = wide(new_name);
        ras_call!(
            self,
            EntryPoint::RenameEntry,
            fn(LPCWSTR, LPCWSTR, LPCWSTR),
            wide_ptr(&phonebook),
            old_name.as_ptr(),
            new_name.as_ptr()
        )
    }

    fn validate_entry_name(&self, phonebook: Option<&str>, entry: &str) -> u32 {
        let phonebook = opt_wide(phonebook);
        let entry = wide(entry);
        ras_call!(
            self,
            EntryPoint::ValidateEntryName,
            fn(LPCWSTR, LPCWSTR),
            wide_ptr(&phonebook),
            entry.as_ptr()
        )
    }

    fn get_credentials(&self, phonebook: Option<&str>, entry: &str, record: &mut [u8]) -> u32 {
        let phonebook = opt_wide(phonebook);
        let entry = wide(entry);
        ras_call!(
            self,
            EntryPoint::GetCredentials,
            fn(LPCWSTR, LPCWSTR, *mut u8),
            wide_ptr(&phonebook),
            entry.as_ptr(),
            record.as_mut_ptr()
        )
    }

    fn set_credentials(
        &self,
        phonebook: Option<&str>,
        entry: &str,
        record: &[u8],
        clear: bool,
    ) -> u32 {
        let phonebook = opt_wide(phonebook);
        let entry = wide(entry);
        ras_call!(
            self,
            EntryPoint::SetCredentials,
            fn(LPCWSTR, LPCWSTR, *const u8, BOOL),
            wide_ptr(&phonebook),
            entry.as_ptr(),
            record.as_ptr(),
            BOOL::from(clear)
        )
    }

    fn get_custom_auth_data(
        &self,
        phonebook: Option<&str>,
        entry: &str,
        buf: &mut [u8],
        size: &mut u32,
    ) -> u32 {
        let phonebook = opt_wide(phonebook);
        let entry = wide(entry);
        ras_call!(
            self,
            EntryPoint::GetCustomAuthData,
            fn(LPCWSTR, LPCWSTR, *mut u8, *mut DWORD),
            wide_ptr(&phonebook),
            entry.as_ptr(),
            if buf.is_empty() { ptr::null_mut() } else { buf.as_mut_ptr() },
            size
        )
    }

    fn set_custom_auth_data(&self, phonebook: Option<&str>, entry: &str, data: &[u8]) -> u32 {
        let phonebook = opt_wide(phonebook);
        let entry = wide(entry);
        ras_call!(
            self,
            EntryPoint::SetCustomAuthData,
            fn(LPCWSTR, LPCWSTR, *const u8, DWORD),
            wide_ptr(&phonebook),
            entry.as_ptr(),
            data.as_ptr(),
            data.len() as DWORD
        )
    }

    fn get_eap_user_data(
        &self,
        phonebook: Option<&str>,
        entry: &str,
        buf: &mut [u8],
        size: &mut u32,
    ) -> u32 {
        let phonebook = opt_wide(phonebook);
        let entry = wide(entry);
        ras_call!(
            self,
            EntryPoint::GetEapUserData,
            fn(HANDLE, LPCWSTR, LPCWSTR, *mut u8, *mut DWORD),
            ptr::null_mut(),
            wide_ptr(&phonebook),
            entry.as_ptr(),
            if buf.is_empty() { ptr::null_mut() } else { buf.as_mut_ptr() },
            size
        )
    }

    fn set_eap_user_data(&self, phonebook: Option<&str>, entry: &str, data: &[u8]) -> u32 {
        let phonebook = opt_wide(phonebook);
        let entry = wide(entry);
        ras_call!(
            self,
            EntryPoint::SetEapUserData,
            fn(HANDLE, LPCWSTR, LPCWSTR, *const u8, DWORD),
            ptr::null_mut(),
            wide_ptr(&phonebook),
            entry.as_ptr(),
            data.as_ptr(),
            data.len() as DWORD
        )
    }

    fn get_connect_status(&self, handle: RawHandle, record: &mut [u8]) -> u32 {
        ras_call!(
            self,
            EntryPoint::GetConnectStatus,
            fn(HANDLE, *mut u8),
            handle as HANDLE,
            record.as_mut_ptr()
        )
    }

    fn get_connection_statistics(&self, handle: RawHandle, record: &mut [u8]) -> u32 {
        ras_call!(
            self,
            EntryPoint::GetConnectionStatistics,
            fn(HANDLE, *mut u8),
            handle as HANDLE,
            record.as_mut_ptr()
        )
    }

    fn get_link_statistics(&self, handle: RawHandle, sub_entry: u32, record: &mut [u8]) -> u32 {
        ras_call!(
            self,
            EntryPoint::GetLinkStatistics,
            fn(HANDLE, DWORD, *mut u8),
            handle as HANDLE,
            sub_entry,
            record.as_mut_ptr()
        )
    }

    fn clear_connection_statistics(&self, handle: RawHandle) -> u32 {
        ras_call!(
            self,
            EntryPoint::ClearConnectionStatistics,
            fn(HANDLE),
            handle as HANDLE
        )
    }

    fn get_projection_info(
        &self,
        handle: RawHandle,
        projection: u32,
        buf: &mut [u8],
        size: &mut u32,
    ) -> u32 {
        ras_call!(
            self,
            EntryPoint::GetProjectionInfo,
            fn(HANDLE, DWORD, *mut u8, *mut DWORD),
            handle as HANDLE,
            projection,
            buf.as_mut_ptr(),
            size
        )
    }

    fn get_projection_info_ex(&self, handle: RawHandle, buf: &mut [u8], size: &mut u32) -> u32 {
        ras_call!(
            self,
            EntryPoint::GetProjectionInfoEx,
            fn(HANDLE, *mut u8, *mut DWORD),
            handle as HANDLE,
            if buf.is_empty() { ptr::null_mut() } else { buf.as_mut_ptr() },
            size
        )
    }

    fn dial(&self, request: DialRequest<'_>, handle: &mut RawHandle) -> u32 {
        if self.resolve(EntryPoint::Dial).is_none() {
            return ERROR_PROC_NOT_FOUND;
        }
        let phonebook = opt_wide(request.phonebook);
        let callback_id = request.callback_id;
        TRAMPOLINES
            .lock()
            .insert(callback_id, Arc::clone(&request.sink));

        let mut hrasconn: HANDLE = ptr::null_mut();
        let notifier: RasDialFunc2 = dial_trampoline;
        let code = ras_call!(
            self,
            EntryPoint::Dial,
            fn(*const u8, LPCWSTR, *const u8, DWORD, LPVOID, *mut HANDLE),
            if request.extensions.is_empty() {
                ptr::null()
            } else {
                request.extensions.as_ptr()
            },
            wide_ptr(&phonebook),
            request.params.as_ptr(),
            NOTIFIER_RAS_DIAL_FUNC2,
            notifier as LPVOID,
            &mut hrasconn
        );
        *handle = hrasconn as RawHandle;
        if code != SUCCESS {
            TRAMPOLINES.lock().remove(&callback_id);
        }
        code
    }

    fn release_dial_routing(&self, callback_id: usize) {
        if TRAMPOLINES.lock().remove(&callback_id).is_some() {
            log::trace!("dropped trampoline route for callback id {}", callback_id);
        }
    }

    fn hang_up(&self, handle: RawHandle) -> u32 {
        ras_call!(self, EntryPoint::HangUp, fn(HANDLE), handle as HANDLE)
    }

    fn get_error_string(&self, code: u32, buf: &mut [u8]) -> u32 {
        let chars = (buf.len() / 2) as DWORD;
        let result = ras_call!(
            self,
            EntryPoint::GetErrorString,
            fn(UINT, LPWSTR, DWORD),
            code,
            buf.as_mut_ptr() as LPWSTR,
            chars
        );
        if result == SUCCESS {
            log::trace!("error string {} -> {:?}", code, decode_wstr(buf));
        }
        result
    }
}
