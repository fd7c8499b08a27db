//! In-process RAS backend
//!
//! Keeps devices, phonebooks and connections in memory, answers the buffer
//! protocol the way the OS does and plays scripted dial progress on its own
//! threads. Hosts without `rasapi32.dll`, the test suite and the benches run
//! against it.

use super::codes::*;
use super::{
    DialNotification, DialNotificationSink, DialRequest, EntryPoint, NativeApi, RawHandle,
};
use crate::capability::Capability;
use crate::handle::RasHandle;
use crate::marshal::connection::{ConnectionFlags, EntryName, RasConnection, RasDevice};
use crate::marshal::credentials::{pre_shared_key_fields, Credentials, PskRole, RASCREDENTIALS};
use crate::marshal::dial_params::{DialParams, RASDIALEXTENSIONS, RASDIALPARAMS};
use crate::marshal::entry::{Entry, RASENTRY};
use crate::marshal::projection::{
    CcpProjection, Ikev2Projection, IpProjection, Ipv6Projection, LcpProjection, PppProjection,
    Projection, ProjectionInfo, ProjectionInfoEx,
};
use crate::marshal::status::{ConnectionState, ConnectionStatus, ConnectionSubState, LinkStatistics};
use crate::marshal::{encode_multi_sz, encode_wstr, FieldValue, FieldValues, NativeRecord, Schema};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Phonebook used when a call passes no phonebook path
pub const DEFAULT_PHONEBOOK: &str = "rasphone.pbk";

const FIRST_HANDLE: RawHandle = 0x0001_0000;
const PSK_MASK: u32 = RASCM_PRE_SHARED_KEY | RASCM_SERVER_PRE_SHARED_KEY | RASCM_DDM_PRE_SHARED_KEY;

/// One scripted progress notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialStep {
    pub state: ConnectionState,
    /// Pause before the notification is sent
    pub delay: Duration,
}

/// How a scripted dial ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialOutcome {
    Connect,
    /// Final notification carries this error code
    Fail(u32),
    /// No further notifications until the dial is aborted
    NoResponse,
}

/// Progress played back for every dial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialScript {
    pub steps: Vec<DialStep>,
    pub outcome: DialOutcome,
}

impl DialScript {
    const PHASES: [ConnectionState; 6] = [
        ConnectionState::OpenPort,
        ConnectionState::PortOpened,
        ConnectionState::ConnectDevice,
        ConnectionState::DeviceConnected,
        ConnectionState::Authenticate,
        ConnectionState::Authenticated,
    ];

    fn phases(step_delay: Duration) -> Vec<DialStep> {
        Self::PHASES
            .iter()
            .map(|state| DialStep {
                state: *state,
                delay: step_delay,
            })
            .collect()
    }

    pub fn connect(step_delay: Duration) -> Self {
        Self {
            steps: Self::phases(step_delay),
            outcome: DialOutcome::Connect,
        }
    }

    pub fn fail(step_delay: Duration, code: u32) -> Self {
        Self {
            steps: Self::phases(step_delay),
            outcome: DialOutcome::Fail(code),
        }
    }

    pub fn no_response() -> Self {
        Self {
            steps: vec![DialStep {
                state: ConnectionState::OpenPort,
                delay: Duration::ZERO,
            }],
            outcome: DialOutcome::NoResponse,
        }
    }
}

impl Default for DialScript {
    fn default() -> Self {
        Self::connect(Duration::from_millis(5))
    }
}

/// Abort signal shared between a dial thread and hang-up
#[derive(Default)]
struct DialControl {
    aborted: Mutex<bool>,
    cv: Condvar,
}

impl DialControl {
    fn abort(&self) {
        *self.aborted.lock() = true;
        self.cv.notify_all();
    }

    /// Sleep for `delay` (forever when `None`); returns whether the dial was aborted
    fn wait(&self, delay: Option<Duration>) -> bool {
        let mut aborted = self.aborted.lock();
        match delay {
            Some(delay) => {
                let deadline = Instant::now() + delay;
                while !*aborted {
                    if self.cv.wait_until(&mut aborted, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while !*aborted {
                    self.cv.wait(&mut aborted);
                }
            }
        }
        *aborted
    }
}

struct Connection {
    entry_name: String,
    phonebook: String,
    device: RasDevice,
    phone_number: String,
    entry_id: Uuid,
    correlation_id: Uuid,
    luid: u64,
    state: ConnectionState,
    error: u32,
    connected_at: Option<Instant>,
    stats: LinkStatistics,
    dial: Option<Arc<DialControl>>,
}

impl Connection {
    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    fn is_ikev2(&self) -> bool {
        self.device.name.contains("IKEv2")
    }
}

#[derive(Default)]
struct StoredEntry {
    entry: Option<Entry>,
    credentials: Credentials,
    psk: HashMap<u32, String>,
    custom_auth: Vec<u8>,
    eap: Vec<u8>,
}

struct State {
    report_capability: bool,
    removed: HashSet<EntryPoint>,
    calls: HashMap<EntryPoint, u32>,
    failures: HashMap<EntryPoint, VecDeque<u32>>,
    growth: HashMap<EntryPoint, u32>,
    devices: Vec<RasDevice>,
    phonebooks: BTreeMap<String, BTreeMap<String, StoredEntry>>,
    connections: BTreeMap<RawHandle, Connection>,
    autodial: Vec<String>,
    next_handle: RawHandle,
    script: DialScript,
    abort_confirms: bool,
    inline_notification: bool,
    /// Callback ids that still route notifications
    routes: HashSet<usize>,
}

impl State {
    fn allocate_handle(&mut self) -> RawHandle {
        let raw = self.next_handle;
        self.next_handle += 0x10;
        raw
    }

    fn entry(&self, phonebook: Option<&str>, name: &str) -> Option<&StoredEntry> {
        self.phonebooks
            .get(&phonebook_key(phonebook))
            .and_then(|book| book.get(name))
    }

    fn entry_mut(&mut self, phonebook: Option<&str>, name: &str) -> Option<&mut StoredEntry> {
        self.phonebooks
            .get_mut(&phonebook_key(phonebook))
            .and_then(|book| book.get_mut(name))
    }
}

/// In-memory [`NativeApi`] implementation
pub struct SimulatedRas {
    capability: Capability,
    state: Arc<Mutex<State>>,
}

fn phonebook_key(phonebook: Option<&str>) -> String {
    phonebook
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_PHONEBOOK)
        .to_string()
}

fn valid_entry_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name.encode_utf16().count() <= RAS_MAX_ENTRY_NAME
        && !name.starts_with('.')
        && !name.chars().any(|c| c.is_control() || c == '\\')
}

fn default_devices() -> Vec<RasDevice> {
    vec![
        RasDevice::new("WAN Miniport (SSTP)", "vpn"),
        RasDevice::new("WAN Miniport (IKEv2)", "vpn"),
        RasDevice::new("WAN Miniport (L2TP)", "vpn"),
        RasDevice::new("WAN Miniport (PPTP)", "vpn"),
        RasDevice::new("WAN Miniport (PPPOE)", "PPPoE"),
    ]
}

fn error_message(code: u32) -> Option<&'static str> {
    Some(match code {
        ERROR_ACCESS_DENIED => "Access is denied.",
        ERROR_INVALID_HANDLE => "The handle is invalid.",
        ERROR_BUFFER_TOO_SMALL => "The buffer is too small.",
        ERROR_CANNOT_OPEN_PHONEBOOK => "The system could not open the phone book file.",
        ERROR_CANNOT_FIND_PHONEBOOK_ENTRY => {
            "The system could not find the phone book entry for this connection."
        }
        ERROR_USER_DISCONNECTION => "The connection was terminated by the local computer.",
        ERROR_NO_CONNECTION => "The connection was terminated.",
        ERROR_AUTHENTICATION_FAILURE => {
            "The remote connection was denied because the user name and password combination you provided is not recognized."
        }
        ERROR_PROJECTION_NOT_COMPLETE => "The connection negotiation has not completed.",
        ERROR_PROTOCOL_NOT_CONFIGURED => {
            "The protocol is not configured for the connection."
        }
        ERROR_DNS_NAME_RESOLUTION => {
            "The remote connection was not made because the name of the remote access server did not resolve."
        }
        ERROR_REQUEST_TIMEOUT => "This operation returned because the timeout period expired.",
        ERROR_CANCELLED => "The operation was canceled by the user.",
        _ => return None,
    })
}

impl Default for SimulatedRas {
    fn default() -> Self {
        Self::new(Capability::Win8)
    }
}

impl SimulatedRas {
    /// Backend behaving like an OS at `capability`. Entry points newer than
    /// that level are absent.
    pub fn new(capability: Capability) -> Self {
        let mut removed = HashSet::new();
        if !capability.at_least(Capability::Vista) {
            removed.insert(EntryPoint::GetEapUserData);
            removed.insert(EntryPoint::SetEapUserData);
            removed.insert(EntryPoint::GetLinkStatistics);
            removed.insert(EntryPoint::GetConnectionStatistics);
            removed.insert(EntryPoint::ClearConnectionStatistics);
        }
        if !capability.at_least(Capability::Win7) {
            removed.insert(EntryPoint::GetProjectionInfoEx);
        }
        let state = State {
            report_capability: true,
            removed,
            calls: HashMap::new(),
            failures: HashMap::new(),
            growth: HashMap::new(),
            devices: default_devices(),
            phonebooks: BTreeMap::new(),
            connections: BTreeMap::new(),
            autodial: Vec::new(),
            next_handle: FIRST_HANDLE,
            script: DialScript::default(),
            abort_confirms: true,
            inline_notification: false,
            routes: HashSet::new(),
        };
        Self {
            capability,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Whether [`NativeApi::reported_capability`] answers; when off callers probe
    pub fn set_report_capability(&self, report: bool) {
        self.state.lock().report_capability = report;
    }

    pub fn remove_entry_point(&self, entry_point: EntryPoint) {
        self.state.lock().removed.insert(entry_point);
    }

    /// Answer the next call of `entry_point` with `code`
    pub fn fail_next(&self, entry_point: EntryPoint, code: u32) {
        self.state
            .lock()
            .failures
            .entry(entry_point)
            .or_default()
            .push_back(code);
    }

    /// Report a larger required size on the next `steps` calls of `entry_point`
    pub fn force_growth(&self, entry_point: EntryPoint, steps: u32) {
        self.state.lock().growth.insert(entry_point, steps);
    }

    pub fn call_count(&self, entry_point: EntryPoint) -> u32 {
        self.state
            .lock()
            .calls
            .get(&entry_point)
            .copied()
            .unwrap_or(0)
    }

    pub fn add_device(&self, device: RasDevice) {
        self.state.lock().devices.push(device);
    }

    pub fn set_autodial_addresses(&self, addresses: Vec<String>) {
        self.state.lock().autodial = addresses;
    }

    pub fn set_dial_script(&self, script: DialScript) {
        self.state.lock().script = script;
    }

    /// Whether aborting a dial produces a final disconnect notification
    pub fn set_abort_confirms(&self, confirms: bool) {
        self.state.lock().abort_confirms = confirms;
    }

    /// Send the first progress notification from inside `dial`, on the
    /// calling thread, before it returns
    pub fn set_inline_notification(&self, inline: bool) {
        self.state.lock().inline_notification = inline;
    }

    /// Dials whose notification route has not been released yet
    pub fn routed_dials(&self) -> usize {
        self.state.lock().routes.len()
    }

    /// Store `entry` in `phonebook` without going through the native record
    pub fn insert_entry(&self, phonebook: Option<&str>, mut entry: Entry) {
        let key = phonebook_key(phonebook);
        entry.phonebook = Some(PathBuf::from(&key));
        let mut state = self.state.lock();
        let stored = state
            .phonebooks
            .entry(key)
            .or_default()
            .entry(entry.name.clone())
            .or_default();
        stored.entry = Some(entry);
    }

    /// Register an established connection
    pub fn add_connection(&self, entry_name: &str, device_name: &str) -> RawHandle {
        let mut state = self.state.lock();
        let raw = state.allocate_handle();
        state.connections.insert(
            raw,
            Connection {
                entry_name: entry_name.to_string(),
                phonebook: DEFAULT_PHONEBOOK.to_string(),
                device: RasDevice::new(device_name, "vpn"),
                phone_number: "vpn.example.com".to_string(),
                entry_id: Uuid::new_v4(),
                correlation_id: Uuid::new_v4(),
                luid: raw as u64,
                state: ConnectionState::Connected,
                error: 0,
                connected_at: Some(Instant::now()),
                stats: initial_statistics(),
                dial: None,
            },
        );
        raw
    }

    pub fn is_connected(&self, raw: RawHandle) -> bool {
        self.state
            .lock()
            .connections
            .get(&raw)
            .map_or(false, Connection::is_connected)
    }

    pub fn set_statistics(&self, raw: RawHandle, stats: LinkStatistics) {
        if let Some(conn) = self.state.lock().connections.get_mut(&raw) {
            conn.stats = stats;
        }
    }

    /// Drop a connection as a remote disconnect would
    pub fn drop_connection(&self, raw: RawHandle) {
        self.state.lock().connections.remove(&raw);
    }

    /// Count the call and apply removed entry points and injected failures
    fn enter(&self, entry_point: EntryPoint) -> Option<u32> {
        let mut state = self.state.lock();
        *state.calls.entry(entry_point).or_insert(0) += 1;
        if state.removed.contains(&entry_point) {
            return Some(ERROR_PROC_NOT_FOUND);
        }
        state
            .failures
            .get_mut(&entry_point)
            .and_then(VecDeque::pop_front)
    }

    fn take_growth(&self, entry_point: EntryPoint) -> bool {
        let mut state = self.state.lock();
        match state.growth.get_mut(&entry_point) {
            Some(steps) if *steps > 0 => {
                *steps -= 1;
                true
            }
            _ => false,
        }
    }

    /// Capability whose layout matches the size stamped into `record`
    fn record_capability(&self, schema: &Schema, record: &[u8]) -> Option<Capability> {
        if record.len() < 4 {
            return None;
        }
        let stamped = u32::from_le_bytes([record[0], record[1], record[2], record[3]]) as usize;
        if record.len() < stamped {
            return None;
        }
        Capability::ALL
            .iter()
            .rev()
            .copied()
            .filter(|cap| *cap <= self.capability)
            .find(|cap| schema.size(*cap) == stamped)
    }

    /// Layout for a growable output buffer; unstamped empty buffers get the
    /// backend's own level
    fn output_capability(&self, schema: &Schema, buf: &[u8]) -> Option<Capability> {
        if buf.len() < 4 {
            Some(self.capability)
        } else {
            self.record_capability(schema, buf)
        }
    }

    fn answer_list<T: NativeRecord>(
        &self,
        entry_point: EntryPoint,
        items: &[T],
        buf: &mut [u8],
        size: &mut u32,
        count: &mut u32,
    ) -> u32 {
        let Some(cap) = self.output_capability(T::schema(), buf) else {
            return ERROR_INVALID_SIZE;
        };
        let bytes = match T::encode_array(items, cap) {
            Ok(bytes) => bytes,
            Err(_) => return ERROR_INVALID_PARAMETER,
        };
        *count = items.len() as u32;
        self.answer_bytes(entry_point, &bytes, buf, size)
    }

    fn answer_bytes(
        &self,
        entry_point: EntryPoint,
        data: &[u8],
        buf: &mut [u8],
        size: &mut u32,
    ) -> u32 {
        let required = data.len() as u32;
        if self.take_growth(entry_point) {
            *size = (*size).max(required) + 16;
            return ERROR_BUFFER_TOO_SMALL;
        }
        if *size < required || buf.len() < data.len() {
            *size = required;
            return ERROR_BUFFER_TOO_SMALL;
        }
        buf[..data.len()].copy_from_slice(data);
        *size = required;
        SUCCESS
    }

    fn answer_record<T: NativeRecord>(&self, value: &T, record: &mut [u8]) -> u32 {
        let Some(cap) = self.record_capability(T::schema(), record) else {
            return ERROR_INVALID_SIZE;
        };
        match value.encode(cap) {
            Ok(bytes) => {
                record[..bytes.len()].copy_from_slice(&bytes);
                SUCCESS
            }
            Err(_) => ERROR_INVALID_PARAMETER,
        }
    }

    fn snapshot(conn: &Connection) -> LinkStatistics {
        let mut stats = conn.stats.clone();
        if let Some(at) = conn.connected_at {
            stats.connect_duration = Duration::from_millis(at.elapsed().as_millis() as u64);
        }
        stats
    }

    fn projection_for(conn: &Connection, projection: Projection) -> Option<ProjectionInfo> {
        Some(match projection {
            Projection::Ip => ProjectionInfo::Ip(IpProjection {
                error_code: None,
                address: Some(Ipv4Addr::new(10, 8, 0, 2)),
                server_address: Some(Ipv4Addr::new(10, 8, 0, 1)),
                options: 0,
                server_options: 0,
            }),
            Projection::Ipv6 => ProjectionInfo::Ipv6(Ipv6Projection {
                local_interface_id: (conn.luid).to_be_bytes(),
                peer_interface_id: [0, 0, 0, 0, 0, 0, 0, 1],
                ..Default::default()
            }),
            Projection::Lcp => ProjectionInfo::Lcp(LcpProjection {
                authentication_protocol: 0xC223,
                authentication_data: 0x81,
                server_authentication_protocol: 0xC223,
                server_authentication_data: 0x81,
                ..Default::default()
            }),
            Projection::Ccp => ProjectionInfo::Ccp(CcpProjection {
                compression_algorithm: 0x0000_0006,
                options: 0x0000_0040,
                server_compression_algorithm: 0x0000_0006,
                server_options: 0x0000_0040,
                error_code: None,
            }),
            Projection::Nbf | Projection::Ipx => return None,
        })
    }

    fn projection_ex_for(conn: &Connection) -> ProjectionInfoEx {
        if conn.is_ikev2() {
            ProjectionInfoEx::Ikev2(Ikev2Projection {
                ipv4_address: Some(Ipv4Addr::new(10, 8, 0, 2)),
                ipv4_server_address: Some(Ipv4Addr::new(10, 8, 0, 1)),
                authentication_protocol: 26,
                encryption_method: 3,
                ..Default::default()
            })
        } else {
            ProjectionInfoEx::Ppp(PppProjection {
                ipv4_address: Some(Ipv4Addr::new(10, 8, 0, 2)),
                ipv4_server_address: Some(Ipv4Addr::new(10, 8, 0, 1)),
                authentication_protocol: 0xC223,
                authentication_data: 0x81,
                ccp_compression_algorithm: 0x0000_0006,
                ..Default::default()
            })
        }
    }
}

fn initial_statistics() -> LinkStatistics {
    LinkStatistics {
        bytes_transmitted: 4_096,
        bytes_received: 16_384,
        frames_transmitted: 32,
        frames_received: 48,
        link_speed_bps: 1_000_000_000,
        ..Default::default()
    }
}

/// Dial thread body
fn run_dial(
    state: Arc<Mutex<State>>,
    control: Arc<DialControl>,
    sink: Arc<dyn DialNotificationSink>,
    callback_id: usize,
    raw: RawHandle,
    script: DialScript,
    confirms: bool,
) {
    let notify = |phase: u32, error: u32| {
        if error != 0 || phase == RASCS_CONNECTED || phase == RASCS_DISCONNECTED {
            state.lock().routes.remove(&callback_id);
        }
        sink.notify(DialNotification {
            callback_id,
            sub_entry: 1,
            handle: raw,
            state: phase,
            error,
            extended_error: 0,
        })
    };
    let set_state = |phase: ConnectionState, error: u32| {
        if let Some(conn) = state.lock().connections.get_mut(&raw) {
            conn.state = phase;
            conn.error = error;
            if phase == ConnectionState::Connected {
                conn.connected_at = Some(Instant::now());
                conn.dial = None;
            }
        }
    };
    let aborted = || {
        if confirms {
            notify(RASCS_DISCONNECTED, ERROR_USER_DISCONNECTION);
        }
    };

    let mut last = ConnectionState::OpenPort;
    for step in &script.steps {
        if control.wait(Some(step.delay)) {
            return aborted();
        }
        last = step.state;
        set_state(step.state, 0);
        notify(step.state.to_raw(), 0);
    }

    match script.outcome {
        DialOutcome::Connect => {
            if control.wait(Some(Duration::ZERO)) {
                return aborted();
            }
            set_state(ConnectionState::Connected, 0);
            notify(RASCS_CONNECTED, 0);
        }
        DialOutcome::Fail(code) => {
            if control.wait(Some(Duration::ZERO)) {
                return aborted();
            }
            set_state(last, code);
            notify(last.to_raw(), code);
        }
        DialOutcome::NoResponse => {
            control.wait(None);
            aborted();
        }
    }
}

impl NativeApi for SimulatedRas {
    fn has_entry_point(&self, entry_point: EntryPoint) -> bool {
        !self.state.lock().removed.contains(&entry_point)
    }

    fn reported_capability(&self) -> Option<Capability> {
        self.state
            .lock()
            .report_capability
            .then_some(self.capability)
    }

    fn enum_connections(&self, buf: &mut [u8], size: &mut u32, count: &mut u32) -> u32 {
        if let Some(code) = self.enter(EntryPoint::EnumConnections) {
            return code;
        }
        let items: Vec<RasConnection> = self
            .state
            .lock()
            .connections
            .iter()
            .filter(|(_, c)| c.state != ConnectionState::Disconnected)
            .map(|(raw, c)| RasConnection {
                handle: RasHandle::borrowed(*raw),
                entry_name: c.entry_name.clone(),
                device: c.device.clone(),
                phonebook_path: c.phonebook.clone(),
                sub_entry: 1,
                entry_id: c.entry_id,
                flags: ConnectionFlags(ConnectionFlags::OWNER_KNOWN | ConnectionFlags::OWNER_MATCH),
                session_luid: c.luid,
                correlation_id: Some(c.correlation_id),
            })
            .collect();
        self.answer_list(EntryPoint::EnumConnections, &items, buf, size, count)
    }

    fn enum_devices(&self, buf: &mut [u8], size: &mut u32, count: &mut u32) -> u32 {
        if let Some(code) = self.enter(EntryPoint::EnumDevices) {
            return code;
        }
        let items = self.state.lock().devices.clone();
        self.answer_list(EntryPoint::EnumDevices, &items, buf, size, count)
    }

    fn enum_entries(
        &self,
        phonebook: Option<&str>,
        buf: &mut [u8],
        size: &mut u32,
        count: &mut u32,
    ) -> u32 {
        if let Some(code) = self.enter(EntryPoint::EnumEntries) {
            return code;
        }
        let wanted = phonebook.filter(|p| !p.is_empty());
        let items: Vec<EntryName> = self
            .state
            .lock()
            .phonebooks
            .iter()
            .filter(|(path, _)| wanted.map_or(true, |w| w == path.as_str()))
            .flat_map(|(path, book)| {
                book.keys().map(move |name| EntryName {
                    name: name.clone(),
                    all_users: false,
                    phonebook_path: path.clone(),
                })
            })
            .collect();
        self.answer_list(EntryPoint::EnumEntries, &items, buf, size, count)
    }

    fn enum_autodial_addresses(&self, buf: &mut [u8], size: &mut u32, count: &mut u32) -> u32 {
        if let Some(code) = self.enter(EntryPoint::EnumAutodialAddresses) {
            return code;
        }
        let addresses = self.state.lock().autodial.clone();
        *count = addresses.len() as u32;
        if addresses.is_empty() {
            *size = 0;
            return SUCCESS;
        }
        let data = encode_multi_sz(&addresses);
        self.answer_bytes(EntryPoint::EnumAutodialAddresses, &data, buf, size)
    }

    fn get_entry_properties(
        &self,
        phonebook: Option<&str>,
        entry: &str,
        buf: &mut [u8],
        size: &mut u32,
    ) -> u32 {
        if let Some(code) = self.enter(EntryPoint::GetEntryProperties) {
            return code;
        }
        let Some(cap) = self.output_capability(&RASENTRY, buf) else {
            return ERROR_INVALID_SIZE;
        };
        let stored = self
            .state
            .lock()
            .entry(phonebook, entry)
            .and_then(|s| s.entry.clone());
        let Some(stored) = stored else {
            return ERROR_CANNOT_FIND_PHONEBOOK_ENTRY;
        };
        match stored.encode(cap) {
            Ok(bytes) => self.answer_bytes(EntryPoint::GetEntryProperties, &bytes, buf, size),
            Err(_) => ERROR_BUFFER_INVALID,
        }
    }

    fn set_entry_properties(&self, phonebook: Option<&str>, entry: &str, record: &[u8]) -> u32 {
        if let Some(code) = self.enter(EntryPoint::SetEntryProperties) {
            return code;
        }
        if !valid_entry_name(entry) {
            return ERROR_INVALID_NAME;
        }
        let Some(cap) = self.record_capability(&RASENTRY, record) else {
            return ERROR_INVALID_SIZE;
        };
        let mut decoded = match Entry::decode(record, cap) {
            Ok(decoded) => decoded,
            Err(_) => return ERROR_BUFFER_INVALID,
        };
        let key = phonebook_key(phonebook);
        decoded.name = entry.to_string();
        decoded.phonebook = Some(PathBuf::from(&key));
        let mut state = self.state.lock();
        state
            .phonebooks
            .entry(key)
            .or_default()
            .entry(entry.to_string())
            .or_default()
            .entry = Some(decoded);
        SUCCESS
    }

    fn delete_entry(&self, phonebook: Option<&str>, entry: &str) -> u32 {
        if let Some(code) = self.enter(EntryPoint::DeleteEntry) {
            return code;
        }
        let key = phonebook_key(phonebook);
        let mut state = self.state.lock();
        let in_use = state
            .connections
            .values()
            .any(|c| c.entry_name == entry && c.phonebook == key);
        if in_use {
            return ERROR_CANNOT_DELETE;
        }
        match state.phonebooks.get_mut(&key).and_then(|book| book.remove(entry)) {
            Some(_) => SUCCESS,
            None => ERROR_CANNOT_FIND_PHONEBOOK_ENTRY,
        }
    }

    fn rename_entry(&self, phonebook: Option<&str>, old_name: &str, new_name: &str) -> u32 {
        if let Some(code) = self.enter(EntryPoint::RenameEntry) {
            return code;
        }
        if !valid_entry_name(new_name) {
            return ERROR_INVALID_NAME;
        }
        let key = phonebook_key(phonebook);
        let mut state = self.state.lock();
        let Some(book) = state.phonebooks.get_mut(&key) else {
            return ERROR_CANNOT_FIND_PHONEBOOK_ENTRY;
        };
        if old_name != new_name && book.contains_key(new_name) {
            return ERROR_ALREADY_EXISTS;
        }
        let Some(mut stored) = book.remove(old_name) else {
            return ERROR_CANNOT_FIND_PHONEBOOK_ENTRY;
        };
        if let Some(entry) = stored.entry.as_mut() {
            entry.name = new_name.to_string();
        }
        book.insert(new_name.to_string(), stored);
        SUCCESS
    }

    fn validate_entry_name(&self, phonebook: Option<&str>, entry: &str) -> u32 {
        if let Some(code) = self.enter(EntryPoint::ValidateEntryName) {
            return code;
        }
        if !valid_entry_name(entry) {
            return ERROR_INVALID_NAME;
        }
        if self.state.lock().entry(phonebook, entry).is_some() {
            return ERROR_ALREADY_EXISTS;
        }
        SUCCESS
    }

    fn get_credentials(&self, phonebook: Option<&str>, entry: &str, record: &mut [u8]) -> u32 {
        if let Some(code) = self.enter(EntryPoint::GetCredentials) {
            return code;
        }
        let Some(cap) = self.record_capability(&RASCREDENTIALS, record) else {
            return ERROR_INVALID_SIZE;
        };
        let requested = match RASCREDENTIALS.decode(record, cap).and_then(|f| f.u32("dwMask")) {
            Ok(mask) => mask,
            Err(_) => return ERROR_BUFFER_INVALID,
        };
        let state = self.state.lock();
        let Some(stored) = state.entry(phonebook, entry) else {
            return ERROR_CANNOT_FIND_PHONEBOOK_ENTRY;
        };

        let fields = if requested & PSK_MASK != 0 {
            if !self.capability.at_least(Capability::Win7) {
                return ERROR_INVALID_PARAMETER;
            }
            let psk = requested & PSK_MASK;
            let bit = psk & psk.wrapping_neg();
            match stored.psk.get(&bit) {
                Some(key) => pre_shared_key_fields_for(bit, Some(key)),
                None => pre_shared_key_fields_for(0, None),
            }
        } else {
            let held = &stored.credentials;
            let take = |bit: u32, value: &Option<String>| {
                if requested & bit != 0 {
                    value.clone()
                } else {
                    None
                }
            };
            Credentials {
                user_name: take(RASCM_USER_NAME, &held.user_name),
                password: take(RASCM_PASSWORD, &held.password),
                domain: take(RASCM_DOMAIN, &held.domain),
                default_credentials: requested & RASCM_DEFAULT_CREDS != 0
                    && held.default_credentials,
            }
            .to_fields()
        };
        drop(state);
        match RASCREDENTIALS.encode(&fields, cap) {
            Ok(bytes) => {
                record[..bytes.len()].copy_from_slice(&bytes);
                SUCCESS
            }
            Err(_) => ERROR_INVALID_PARAMETER,
        }
    }

    fn set_credentials(
        &self,
        phonebook: Option<&str>,
        entry: &str,
        record: &[u8],
        clear: bool,
    ) -> u32 {
        if let Some(code) = self.enter(EntryPoint::SetCredentials) {
            return code;
        }
        let Some(cap) = self.record_capability(&RASCREDENTIALS, record) else {
            return ERROR_INVALID_SIZE;
        };
        let fields = match RASCREDENTIALS.decode(record, cap) {
            Ok(fields) => fields,
            Err(_) => return ERROR_BUFFER_INVALID,
        };
        let mask = fields.opt_u32("dwMask").unwrap_or(0);
        if mask & PSK_MASK != 0 && !self.capability.at_least(Capability::Win7) {
            return ERROR_INVALID_PARAMETER;
        }
        let incoming = match Credentials::from_fields(&fields) {
            Ok(creds) => creds,
            Err(_) => return ERROR_BUFFER_INVALID,
        };

        let mut state = self.state.lock();
        let Some(stored) = state.entry_mut(phonebook, entry) else {
            return ERROR_CANNOT_FIND_PHONEBOOK_ENTRY;
        };
        for bit in [
            RASCM_PRE_SHARED_KEY,
            RASCM_SERVER_PRE_SHARED_KEY,
            RASCM_DDM_PRE_SHARED_KEY,
        ] {
            if mask & bit == 0 {
                continue;
            }
            if clear {
                stored.psk.remove(&bit);
            } else {
                let key = fields.opt_string("szPassword").unwrap_or_default();
                stored.psk.insert(bit, key);
            }
        }
        let held = &mut stored.credentials;
        if mask & RASCM_USER_NAME != 0 {
            held.user_name = if clear { None } else { incoming.user_name };
        }
        if mask & RASCM_PASSWORD != 0 {
            held.password = if clear { None } else { incoming.password };
        }
        if mask & RASCM_DOMAIN != 0 {
            held.domain = if clear { None } else { incoming.domain };
        }
        if mask & RASCM_DEFAULT_CREDS != 0 {
            held.default_credentials = !clear;
        }
        SUCCESS
    }

    fn get_custom_auth_data(
        &self,
        phonebook: Option<&str>,
        entry: &str,
        buf: &mut [u8],
        size: &mut u32,
    ) -> u32 {
        if let Some(code) = self.enter(EntryPoint::GetCustomAuthData) {
            return code;
        }
        let data = self
            .state
            .lock()
            .entry(phonebook, entry)
            .map(|s| s.custom_auth.clone());
        match data {
            Some(data) => self.answer_bytes(EntryPoint::GetCustomAuthData, &data, buf, size),
            None => ERROR_CANNOT_FIND_PHONEBOOK_ENTRY,
        }
    }

    fn set_custom_auth_data(&self, phonebook: Option<&str>, entry: &str, data: &[u8]) -> u32 {
        if let Some(code) = self.enter(EntryPoint::SetCustomAuthData) {
            return code;
        }
        match self.state.lock().entry_mut(phonebook, entry) {
            Some(stored) => {
                stored.custom_auth = data.to_vec();
                SUCCESS
            }
            None => ERROR_CANNOT_FIND_PHONEBOOK_ENTRY,
        }
    }

    fn get_eap_user_data(
        &self,
        phonebook: Option<&str>,
        entry: &str,
        buf: &mut [u8],
        size: &mut u32,
    ) -> u32 {
        if let Some(code) = self.enter(EntryPoint::GetEapUserData) {
            return code;
        }
        let data = self
            .state
            .lock()
            .entry(phonebook, entry)
            .map(|s| s.eap.clone());
        match data {
            Some(data) => self.answer_bytes(EntryPoint::GetEapUserData, &data, buf, size),
            None => ERROR_CANNOT_FIND_PHONEBOOK_ENTRY,
        }
    }

    fn set_eap_user_data(&self, phonebook: Option<&str>, entry: &str, data: &[u8]) -> u32 {
        if let Some(code) = self.enter(EntryPoint::SetEapUserData) {
            return code;
        }
        match self.state.lock().entry_mut(phonebook, entry) {
            Some(stored) => {
                stored.eap = data.to_vec();
                SUCCESS
            }
            None => ERROR_CANNOT_FIND_PHONEBOOK_ENTRY,
        }
    }

    fn get_connect_status(&self, handle: RawHandle, record: &mut [u8]) -> u32 {
        if let Some(code) = self.enter(EntryPoint::GetConnectStatus) {
            return code;
        }
        let status = {
            let state = self.state.lock();
            let Some(conn) = state.connections.get(&handle) else {
                return ERROR_INVALID_HANDLE;
            };
            let connected = conn.is_connected();
            ConnectionStatus {
                state: conn.state,
                error_code: (conn.error != 0).then_some(conn.error as i32),
                device_name: conn.device.name.clone(),
                device_type: conn.device.device_type.clone(),
                phone_number: conn.phone_number.clone(),
                local_endpoint: connected.then_some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10))),
                remote_endpoint: connected.then(|| {
                    conn.phone_number
                        .parse()
                        .unwrap_or(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1)))
                }),
                sub_state: Some(ConnectionSubState::None),
            }
        };
        self.answer_record(&status, record)
    }

    fn get_connection_statistics(&self, handle: RawHandle, record: &mut [u8]) -> u32 {
        if let Some(code) = self.enter(EntryPoint::GetConnectionStatistics) {
            return code;
        }
        let stats = match self.state.lock().connections.get(&handle) {
            Some(conn) => Self::snapshot(conn),
            None => return ERROR_INVALID_HANDLE,
        };
        self.answer_record(&stats, record)
    }

    fn get_link_statistics(&self, handle: RawHandle, sub_entry: u32, record: &mut [u8]) -> u32 {
        if let Some(code) = self.enter(EntryPoint::GetLinkStatistics) {
            return code;
        }
        if sub_entry != 1 {
            return ERROR_INVALID_PARAMETER;
        }
        let stats = match self.state.lock().connections.get(&handle) {
            Some(conn) => Self::snapshot(conn),
            None => return ERROR_INVALID_HANDLE,
        };
        self.answer_record(&stats, record)
    }

    fn clear_connection_statistics(&self, handle: RawHandle) -> u32 {
        if let Some(code) = self.enter(EntryPoint::ClearConnectionStatistics) {
            return code;
        }
        match self.state.lock().connections.get_mut(&handle) {
            Some(conn) => {
                conn.stats = LinkStatistics {
                    link_speed_bps: conn.stats.link_speed_bps,
                    ..Default::default()
                };
                SUCCESS
            }
            None => ERROR_INVALID_HANDLE,
        }
    }

    fn get_projection_info(
        &self,
        handle: RawHandle,
        projection: u32,
        buf: &mut [u8],
        size: &mut u32,
    ) -> u32 {
        if let Some(code) = self.enter(EntryPoint::GetProjectionInfo) {
            return code;
        }
        let Some(projection) = Projection::from_selector(projection) else {
            return ERROR_INVALID_PARAMETER;
        };
        if !self.capability.at_least(projection.min_capability()) {
            return ERROR_PROTOCOL_NOT_CONFIGURED;
        }
        let schema = projection.schema();
        let Some(cap) = self.record_capability(schema, buf) else {
            if (*size as usize) < schema.size(Capability::Legacy) {
                *size = schema.size(self.capability) as u32;
                return ERROR_BUFFER_TOO_SMALL;
            }
            return ERROR_INVALID_SIZE;
        };
        let info = {
            let state = self.state.lock();
            let Some(conn) = state.connections.get(&handle) else {
                return ERROR_INVALID_HANDLE;
            };
            if !conn.is_connected() {
                return ERROR_PROJECTION_NOT_COMPLETE;
            }
            match Self::projection_for(conn, projection) {
                Some(info) => info,
                None => return ERROR_PROTOCOL_NOT_CONFIGURED,
            }
        };
        match info.encode(cap) {
            Ok(bytes) => self.answer_bytes(EntryPoint::GetProjectionInfo, &bytes, buf, size),
            Err(_) => ERROR_INVALID_PARAMETER,
        }
    }

    fn get_projection_info_ex(&self, handle: RawHandle, buf: &mut [u8], size: &mut u32) -> u32 {
        if let Some(code) = self.enter(EntryPoint::GetProjectionInfoEx) {
            return code;
        }
        let info = {
            let state = self.state.lock();
            let Some(conn) = state.connections.get(&handle) else {
                return ERROR_INVALID_HANDLE;
            };
            if !conn.is_connected() {
                return ERROR_PROJECTION_NOT_COMPLETE;
            }
            Self::projection_ex_for(conn)
        };
        match info.encode(self.capability) {
            Ok(bytes) => self.answer_bytes(EntryPoint::GetProjectionInfoEx, &bytes, buf, size),
            Err(_) => ERROR_INVALID_PARAMETER,
        }
    }

    fn dial(&self, request: DialRequest<'_>, handle: &mut RawHandle) -> u32 {
        if let Some(code) = self.enter(EntryPoint::Dial) {
            return code;
        }
        let Some(cap) = self.record_capability(&RASDIALPARAMS, request.params) else {
            return ERROR_INVALID_SIZE;
        };
        if !request.extensions.is_empty()
            && self
                .record_capability(&RASDIALEXTENSIONS, request.extensions)
                .is_none()
        {
            return ERROR_INVALID_SIZE;
        }
        let params = match DialParams::decode(request.params, cap) {
            Ok(params) => params,
            Err(_) => return ERROR_BUFFER_INVALID,
        };

        let mut state = self.state.lock();
        let (phonebook, device, phone_number, entry_id) = if !params.entry_name.is_empty() {
            let stored = state
                .entry(request.phonebook, &params.entry_name)
                .and_then(|s| s.entry.as_ref());
            let Some(entry) = stored else {
                return ERROR_CANNOT_FIND_PHONEBOOK_ENTRY;
            };
            let number = if params.phone_number.is_empty() {
                entry.phone_number.clone()
            } else {
                params.phone_number.clone()
            };
            (
                phonebook_key(request.phonebook),
                entry.device.clone(),
                number,
                entry.id,
            )
        } else if !params.phone_number.is_empty() {
            let device = state
                .devices
                .iter()
                .find(|d| d.is_vpn())
                .cloned()
                .unwrap_or_else(|| RasDevice::new("WAN Miniport (PPTP)", "vpn"));
            (String::new(), device, params.phone_number.clone(), Uuid::nil())
        } else {
            return ERROR_CANNOT_FIND_PHONEBOOK_ENTRY;
        };

        let raw = state.allocate_handle();
        let control = Arc::new(DialControl::default());
        state.connections.insert(
            raw,
            Connection {
                entry_name: params.entry_name.clone(),
                phonebook,
                device,
                phone_number,
                entry_id,
                correlation_id: Uuid::new_v4(),
                luid: raw as u64,
                state: ConnectionState::OpenPort,
                error: 0,
                connected_at: None,
                stats: initial_statistics(),
                dial: Some(Arc::clone(&control)),
            },
        );
        let script = state.script.clone();
        let confirms = state.abort_confirms;
        let inline = state.inline_notification;
        state.routes.insert(request.callback_id);
        drop(state);

        log::debug!(
            "simulated dial {:#x} for '{}' (callback id {})",
            raw,
            params.entry_name,
            request.callback_id
        );
        let callback_id = request.callback_id;
        if inline {
            request.sink.notify(DialNotification {
                callback_id,
                sub_entry: 1,
                handle: raw,
                state: ConnectionState::OpenPort.to_raw(),
                error: 0,
                extended_error: 0,
            });
        }
        let shared = Arc::clone(&self.state);
        let sink = Arc::clone(&request.sink);
        let spawned = std::thread::Builder::new()
            .name(format!("sim-dial-{raw:x}"))
            .spawn(move || run_dial(shared, control, sink, callback_id, raw, script, confirms));
        if let Err(e) = spawned {
            log::error!("failed to start dial thread: {}", e);
            let mut state = self.state.lock();
            state.connections.remove(&raw);
            state.routes.remove(&callback_id);
            return ERROR_NOT_ENOUGH_MEMORY;
        }
        *handle = raw;
        SUCCESS
    }

    fn release_dial_routing(&self, callback_id: usize) {
        self.state.lock().routes.remove(&callback_id);
    }

    fn hang_up(&self, handle: RawHandle) -> u32 {
        if let Some(code) = self.enter(EntryPoint::HangUp) {
            return code;
        }
        if handle == 0 {
            return ERROR_INVALID_HANDLE;
        }
        let removed = self.state.lock().connections.remove(&handle);
        match removed {
            Some(conn) => {
                if let Some(dial) = conn.dial {
                    dial.abort();
                }
                SUCCESS
            }
            None => ERROR_NO_CONNECTION,
        }
    }

    fn get_error_string(&self, code: u32, buf: &mut [u8]) -> u32 {
        if let Some(code) = self.enter(EntryPoint::GetErrorString) {
            return code;
        }
        let Some(message) = error_message(code) else {
            return ERROR_INVALID_PARAMETER;
        };
        let encoded = encode_wstr(message);
        if buf.len() < encoded.len() {
            return ERROR_INSUFFICIENT_BUFFER;
        }
        buf[..encoded.len()].copy_from_slice(&encoded);
        SUCCESS
    }
}

fn pre_shared_key_fields_for(bit: u32, key: Option<&str>) -> FieldValues {
    let role = [PskRole::Client, PskRole::Server, PskRole::Ddm]
        .into_iter()
        .find(|r| r.mask() == bit);
    match role {
        Some(role) => pre_shared_key_fields(role, key),
        None => FieldValues::new().with("dwMask", FieldValue::U32(0)),
    }
}
