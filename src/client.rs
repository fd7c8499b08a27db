//! RAS client - typed operations over the native entry points
//!
//! [`RasClient`] owns the injected entry-point table, the capability level it
//! resolved at construction and the buffered call settings from [`Config`].
//! Every read goes through the buffered call protocol or a fixed-size record
//! call; every failure comes back translated into [`RasError`].

use crate::bridge::CallbackBridge;
use crate::buffer::{stamp_record_size, BufferedCall};
use crate::capability::Capability;
use crate::config::Config;
use crate::dialer::RasDialer;
use crate::error::{check, NativeError, RasError, Result};
use crate::handle::RasHandle;
use crate::marshal::credentials::{
    pre_shared_key_fields, pre_shared_key_from, pre_shared_key_query, RASCREDENTIALS,
};
use crate::marshal::projection::PROJECTION_INFO_VERSION;
use crate::marshal::{
    decode_multi_sz, decode_wstr, ConnectionStatus, Credentials, Entry, EntryName, FieldValue,
    FieldValues, LinkStatistics, NativeRecord, Projection, ProjectionInfo, ProjectionInfoEx,
    PskRole, RasConnection, RasDevice, Schema,
};
use crate::native::codes;
use crate::native::{EntryPoint, NativeApi};
use crate::phonebook::{NameValidation, Phonebook, PhonebookPath};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long hang-up waits for the port to close
const HANG_UP_SETTLE: Duration = Duration::from_secs(3);
const HANG_UP_POLL: Duration = Duration::from_millis(10);

/// Initial room for an error description, in UTF-16 units
const ERROR_STRING_UNITS: usize = 512;

const USER_CREDENTIALS_MASK: u32 =
    codes::RASCM_USER_NAME | codes::RASCM_PASSWORD | codes::RASCM_DOMAIN;

fn pb(path: Option<&Path>) -> Option<String> {
    path.map(|p| p.to_string_lossy().into_owned())
}

/// Client for the RAS entry points
///
/// Cheap to clone; clones share the backend and the dial callback bridge.
#[derive(Clone)]
pub struct RasClient {
    api: Arc<dyn NativeApi>,
    capability: Capability,
    config: Arc<Config>,
    buffer: BufferedCall,
    bridge: Arc<CallbackBridge>,
}

impl RasClient {
    /// Create a client over `api`
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid
    pub fn new(api: Arc<dyn NativeApi>, config: Config) -> Result<Self> {
        config.validate()?;
        let capability = match config.capability.level {
            Some(level) => {
                log::info!("Using pinned capability level {level}");
                level
            }
            None => Capability::probe(api.as_ref()),
        };
        Ok(Self {
            buffer: BufferedCall::new(config.buffer.max_attempts),
            api,
            capability,
            config: Arc::new(config),
            bridge: Arc::new(CallbackBridge::new()),
        })
    }

    /// Client with default settings at a fixed capability level
    pub fn with_capability(api: Arc<dyn NativeApi>, capability: Capability) -> Self {
        let config = Config::default();
        Self {
            buffer: BufferedCall::new(config.buffer.max_attempts),
            api,
            capability,
            config: Arc::new(config),
            bridge: Arc::new(CallbackBridge::new()),
        }
    }

    /// Client over the system `rasapi32.dll`
    #[cfg(windows)]
    pub fn system(config: Config) -> Result<Self> {
        let api = crate::native::windows::RasApi32::load()?;
        Self::new(Arc::new(api), config)
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether the backend exposes `entry_point`
    pub fn supports(&self, entry_point: EntryPoint) -> bool {
        self.api.has_entry_point(entry_point)
    }

    /// Phonebook named by the configuration
    pub fn default_phonebook(&self) -> Result<PathBuf> {
        PhonebookPath::from_config(&self.config.phonebook).resolve()
    }

    pub fn phonebook(&self, location: &PhonebookPath) -> Result<Phonebook> {
        Phonebook::open(self, location)
    }

    fn require(&self, needed: Capability, entry_point: EntryPoint) -> Result<()> {
        if self.capability.at_least(needed) {
            Ok(())
        } else {
            log::debug!(
                "{} needs capability {}, running at {}",
                entry_point,
                needed,
                self.capability
            );
            Err(RasError::CapabilityUnsupported { entry_point })
        }
    }

    fn initial_size(&self, record: usize) -> u32 {
        let record = record as u32;
        let configured = self.config.buffer.initial_size;
        // Whole records only
        (configured - configured % record.max(1)).max(record)
    }

    /// List call whose buffer holds stamped `T` records
    fn list_records<T, C>(&self, entry_point: EntryPoint, mut call: C) -> Result<Vec<T>>
    where
        T: NativeRecord,
        C: FnMut(&mut [u8], &mut u32, &mut u32) -> u32,
    {
        let cap = self.capability;
        let record = T::native_size(cap);
        log::debug!("{} (capability {})", entry_point, cap);
        self.buffer.list(
            entry_point,
            self.initial_size(record),
            |buf, size, count| {
                stamp_record_size(buf, record);
                call(buf, size, count)
            },
            |bytes, count| T::decode_array(bytes, count, cap),
        )
    }

    /// Fixed-size record call
    fn fixed_record<T, C>(&self, entry_point: EntryPoint, call: C) -> Result<T>
    where
        T: NativeRecord,
        C: FnOnce(&mut [u8]) -> u32,
    {
        let cap = self.capability;
        let size = T::native_size(cap);
        let mut record = vec![0u8; size];
        stamp_record_size(&mut record, size);
        check(call(&mut record), entry_point)?;
        T::decode(&record, cap)
    }

    fn credentials_record(&self, fields: &FieldValues) -> Result<Vec<u8>> {
        RASCREDENTIALS.encode(fields, self.capability)
    }

    pub fn connections(&self) -> Result<Vec<RasConnection>> {
        self.list_records(EntryPoint::EnumConnections, |buf, size, count| {
            self.api.enum_connections(buf, size, count)
        })
    }

    pub fn devices(&self) -> Result<Vec<RasDevice>> {
        self.list_records(EntryPoint::EnumDevices, |buf, size, count| {
            self.api.enum_devices(buf, size, count)
        })
    }

    /// Entry names of `phonebook`, or of every phonebook when `None`
    pub fn entry_names(&self, phonebook: Option<&Path>) -> Result<Vec<EntryName>> {
        let phonebook = pb(phonebook);
        self.list_records(EntryPoint::EnumEntries, |buf, size, count| {
            self.api
                .enum_entries(phonebook.as_deref(), buf, size, count)
        })
    }

    pub fn autodial_addresses(&self) -> Result<Vec<String>> {
        self.buffer.list(
            EntryPoint::EnumAutodialAddresses,
            0,
            |buf, size, count| self.api.enum_autodial_addresses(buf, size, count),
            |bytes, _| Ok(decode_multi_sz(bytes)),
        )
    }

    /// Read an entry; the result is attached to `phonebook`
    pub fn entry(&self, phonebook: &Path, name: &str) -> Result<Entry> {
        let cap = self.capability;
        let record = Entry::native_size(cap);
        let path = pb(Some(phonebook));
        let bytes = self
            .buffer
            .blob_from(EntryPoint::GetEntryProperties, record as u32, |buf, size| {
                stamp_record_size(buf, record);
                self.api
                    .get_entry_properties(path.as_deref(), name, buf, size)
            })?
            .ok_or_else(|| {
                RasError::MalformedRecord(format!("empty RASENTRY for '{name}'"))
            })?;
        let mut entry = Entry::decode(&bytes, cap)?;
        entry.name = name.to_string();
        entry.phonebook = Some(phonebook.to_path_buf());
        Ok(entry)
    }

    /// Write an attached entry back to its phonebook
    ///
    /// # Errors
    /// `NotAttached` when the entry has no phonebook
    pub fn save_entry(&self, entry: &Entry) -> Result<()> {
        let owner = entry.owner()?;
        entry.validate()?;
        let record = entry.encode(self.capability)?;
        log::debug!("saving entry '{}' to {}", entry.name, owner.display());
        check(
            self.api
                .set_entry_properties(pb(Some(owner.as_path())).as_deref(), &entry.name, &record),
            EntryPoint::SetEntryProperties,
        )
    }

    pub fn delete_entry(&self, phonebook: &Path, name: &str) -> Result<()> {
        check(
            self.api.delete_entry(pb(Some(phonebook)).as_deref(), name),
            EntryPoint::DeleteEntry,
        )
    }

    pub fn rename_entry(&self, phonebook: &Path, old_name: &str, new_name: &str) -> Result<()> {
        check(
            self.api
                .rename_entry(pb(Some(phonebook)).as_deref(), old_name, new_name),
            EntryPoint::RenameEntry,
        )
    }

    /// Native check of a new entry name
    pub fn validate_entry_name(&self, phonebook: Option<&Path>, name: &str) -> Result<NameValidation> {
        match self.api.validate_entry_name(pb(phonebook).as_deref(), name) {
            codes::SUCCESS => Ok(NameValidation::Valid),
            codes::ERROR_ALREADY_EXISTS => Ok(NameValidation::AlreadyExists),
            codes::ERROR_INVALID_NAME => Ok(NameValidation::Invalid),
            code => Err(NativeError::new(code, EntryPoint::ValidateEntryName).into()),
        }
    }

    /// Stored user name, password and domain; absent fields read as `None`
    pub fn credentials(&self, phonebook: &Path, name: &str) -> Result<Credentials> {
        let query = FieldValues::new()
            .with("dwMask", FieldValue::U32(USER_CREDENTIALS_MASK | codes::RASCM_DEFAULT_CREDS));
        let mut record = self.credentials_record(&query)?;
        check(
            self.api
                .get_credentials(pb(Some(phonebook)).as_deref(), name, &mut record),
            EntryPoint::GetCredentials,
        )?;
        Credentials::decode(&record, self.capability)
    }

    /// Store the fields of `credentials` that are present
    pub fn set_credentials(&self, phonebook: &Path, name: &str, credentials: &Credentials) -> Result<()> {
        let record = credentials.encode(self.capability)?;
        check(
            self.api
                .set_credentials(pb(Some(phonebook)).as_deref(), name, &record, false),
            EntryPoint::SetCredentials,
        )
    }

    pub fn clear_credentials(&self, phonebook: &Path, name: &str) -> Result<()> {
        let fields = FieldValues::new()
            .with("dwMask", FieldValue::U32(USER_CREDENTIALS_MASK | codes::RASCM_DEFAULT_CREDS));
        let record = self.credentials_record(&fields)?;
        check(
            self.api
                .set_credentials(pb(Some(phonebook)).as_deref(), name, &record, true),
            EntryPoint::SetCredentials,
        )
    }

    /// Rename an attached entry in its phonebook
    ///
    /// # Errors
    /// `NotAttached` when the entry has no phonebook
    pub fn rename(&self, entry: &mut Entry, new_name: &str) -> Result<()> {
        let owner = entry.owner()?.clone();
        self.rename_entry(&owner, &entry.name, new_name)?;
        entry.name = new_name.to_string();
        Ok(())
    }

    /// Credentials of an attached entry
    ///
    /// # Errors
    /// `NotAttached` when the entry has no phonebook
    pub fn credentials_for(&self, entry: &Entry) -> Result<Credentials> {
        self.credentials(entry.owner()?, &entry.name)
    }

    pub fn set_credentials_for(&self, entry: &Entry, credentials: &Credentials) -> Result<()> {
        self.set_credentials(entry.owner()?, &entry.name, credentials)
    }

    pub fn clear_credentials_for(&self, entry: &Entry) -> Result<()> {
        self.clear_credentials(entry.owner()?, &entry.name)
    }

    pub fn pre_shared_key(&self, phonebook: &Path, name: &str, role: PskRole) -> Result<Option<String>> {
        self.require(role.min_capability(), EntryPoint::GetCredentials)?;
        let mut record = self.credentials_record(&pre_shared_key_query(role))?;
        check(
            self.api
                .get_credentials(pb(Some(phonebook)).as_deref(), name, &mut record),
            EntryPoint::GetCredentials,
        )?;
        let fields = RASCREDENTIALS.decode(&record, self.capability)?;
        pre_shared_key_from(&fields, role)
    }

    pub fn set_pre_shared_key(&self, phonebook: &Path, name: &str, role: PskRole, key: &str) -> Result<()> {
        self.require(role.min_capability(), EntryPoint::SetCredentials)?;
        let record = self.credentials_record(&pre_shared_key_fields(role, Some(key)))?;
        check(
            self.api
                .set_credentials(pb(Some(phonebook)).as_deref(), name, &record, false),
            EntryPoint::SetCredentials,
        )
    }

    pub fn clear_pre_shared_key(&self, phonebook: &Path, name: &str, role: PskRole) -> Result<()> {
        self.require(role.min_capability(), EntryPoint::SetCredentials)?;
        let record = self.credentials_record(&pre_shared_key_query(role))?;
        check(
            self.api
                .set_credentials(pb(Some(phonebook)).as_deref(), name, &record, true),
            EntryPoint::SetCredentials,
        )
    }

    pub fn custom_auth_data(&self, phonebook: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        let path = pb(Some(phonebook));
        self.buffer.blob(EntryPoint::GetCustomAuthData, |buf, size| {
            self.api
                .get_custom_auth_data(path.as_deref(), name, buf, size)
        })
    }

    pub fn set_custom_auth_data(&self, phonebook: &Path, name: &str, data: &[u8]) -> Result<()> {
        check(
            self.api
                .set_custom_auth_data(pb(Some(phonebook)).as_deref(), name, data),
            EntryPoint::SetCustomAuthData,
        )
    }

    pub fn eap_user_data(&self, phonebook: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        let path = pb(Some(phonebook));
        self.buffer.blob(EntryPoint::GetEapUserData, |buf, size| {
            self.api.get_eap_user_data(path.as_deref(), name, buf, size)
        })
    }

    pub fn set_eap_user_data(&self, phonebook: &Path, name: &str, data: &[u8]) -> Result<()> {
        check(
            self.api
                .set_eap_user_data(pb(Some(phonebook)).as_deref(), name, data),
            EntryPoint::SetEapUserData,
        )
    }

    pub fn connection_status(&self, handle: &RasHandle) -> Result<ConnectionStatus> {
        let raw = handle.raw()?;
        self.fixed_record(EntryPoint::GetConnectStatus, |record| {
            self.api.get_connect_status(raw, record)
        })
    }

    pub fn connection_statistics(&self, handle: &RasHandle) -> Result<LinkStatistics> {
        let raw = handle.raw()?;
        self.fixed_record(EntryPoint::GetConnectionStatistics, |record| {
            self.api.get_connection_statistics(raw, record)
        })
    }

    pub fn link_statistics(&self, handle: &RasHandle, sub_entry: u32) -> Result<LinkStatistics> {
        let raw = handle.raw()?;
        self.fixed_record(EntryPoint::GetLinkStatistics, |record| {
            self.api.get_link_statistics(raw, sub_entry, record)
        })
    }

    pub fn clear_connection_statistics(&self, handle: &RasHandle) -> Result<()> {
        let raw = handle.raw()?;
        check(
            self.api.clear_connection_statistics(raw),
            EntryPoint::ClearConnectionStatistics,
        )
    }

    /// Legacy per-protocol projection result
    pub fn projection(&self, handle: &RasHandle, projection: Projection) -> Result<ProjectionInfo> {
        self.require(projection.min_capability(), EntryPoint::GetProjectionInfo)?;
        let raw = handle.raw()?;
        let cap = self.capability;
        let schema: &Schema = projection.schema();
        let record = schema.size(cap);
        let bytes = self
            .buffer
            .blob_from(EntryPoint::GetProjectionInfo, record as u32, |buf, size| {
                stamp_record_size(buf, record);
                self.api
                    .get_projection_info(raw, projection.selector(), buf, size)
            })?
            .ok_or_else(|| RasError::MalformedRecord(format!("empty {}", schema.name)))?;
        ProjectionInfo::decode(projection, &bytes, cap)
    }

    /// PPP or IKEv2 projection (Windows 7 and later)
    pub fn projection_ex(&self, handle: &RasHandle) -> Result<ProjectionInfoEx> {
        self.require(ProjectionInfoEx::MIN_CAPABILITY, EntryPoint::GetProjectionInfoEx)?;
        let raw = handle.raw()?;
        let cap = self.capability;
        let bytes = self
            .buffer
            .blob_from(
                EntryPoint::GetProjectionInfoEx,
                ProjectionInfoEx::native_size(cap) as u32,
                |buf, size| {
                    if buf.len() >= 4 {
                        buf[..4].copy_from_slice(&PROJECTION_INFO_VERSION.to_le_bytes());
                    }
                    self.api.get_projection_info_ex(raw, buf, size)
                },
            )?
            .ok_or_else(|| RasError::MalformedRecord("empty RAS_PROJECTION_INFO".to_string()))?;
        ProjectionInfoEx::decode(&bytes, cap)
    }

    /// Whether `handle` names a connection that is still listed
    pub fn is_active(&self, handle: &RasHandle) -> Result<bool> {
        Ok(self.connections()?.iter().any(|c| c.handle == *handle))
    }

    /// Hang up a connection and wait for the port to close.
    ///
    /// Idempotent: an already released handle, or a "no connection" answer
    /// for a connection that is no longer listed, counts as success.
    pub fn hang_up(&self, handle: &RasHandle) -> Result<()> {
        let raw = match handle.raw() {
            Ok(raw) => raw,
            Err(_) if handle.id() != 0 => {
                log::debug!("handle {:#x} already released", handle.id());
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        log::info!("Hanging up {:#x}", raw);
        match self.api.hang_up(raw) {
            codes::SUCCESS => {}
            codes::ERROR_NO_CONNECTION => {
                // The connection may come back between the two calls; treat
                // the answer as best effort
                if self.is_active(handle)? {
                    return Err(NativeError::new(codes::ERROR_NO_CONNECTION, EntryPoint::HangUp).into());
                }
                log::warn!(
                    "{:#x} reported no connection and is not listed; treating as hung up",
                    raw
                );
            }
            code => return check(code, EntryPoint::HangUp),
        }
        handle.invalidate();
        self.wait_for_port_close(raw);
        Ok(())
    }

    /// Poll the status entry point until it no longer knows the handle
    fn wait_for_port_close(&self, raw: crate::native::RawHandle) {
        let deadline = Instant::now() + HANG_UP_SETTLE;
        let size = ConnectionStatus::native_size(self.capability);
        let mut record = vec![0u8; size];
        loop {
            stamp_record_size(&mut record, size);
            if self.api.get_connect_status(raw, &mut record) == codes::ERROR_INVALID_HANDLE {
                return;
            }
            if Instant::now() >= deadline {
                log::warn!("{:#x} still known {:?} after hang-up", raw, HANG_UP_SETTLE);
                return;
            }
            std::thread::sleep(HANG_UP_POLL);
        }
    }

    /// Human-readable text for a native result code
    pub fn error_description(&self, code: u32) -> Result<String> {
        let mut units = ERROR_STRING_UNITS;
        loop {
            let mut buf = vec![0u8; units * 2];
            match self.api.get_error_string(code, &mut buf) {
                codes::SUCCESS => return Ok(decode_wstr(&buf)),
                c if codes::is_buffer_too_small(c) && units < 8 * ERROR_STRING_UNITS => {
                    units *= 2;
                }
                c => return Err(NativeError::new(c, EntryPoint::GetErrorString).into()),
            }
        }
    }

    /// New dialer sharing this client's backend and callback bridge
    pub fn dialer(&self) -> RasDialer {
        let mut dialer = RasDialer::new(
            Arc::clone(&self.api),
            self.capability,
            Arc::clone(&self.bridge),
        );
        dialer.timeout = self.config.dial.timeout();
        dialer.cancel_grace = self.config.dial.cancel_grace();
        dialer.phonebook = self.default_phonebook().ok();
        dialer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::marshal::{ConnectionState, VpnStrategy};
    use crate::native::simulated::{DialScript, SimulatedRas};

    const BOOK: &str = "rasphone.pbk";

    fn setup(capability: Capability) -> (Arc<SimulatedRas>, RasClient) {
        let sim = Arc::new(SimulatedRas::new(capability));
        sim.insert_entry(
            Some(BOOK),
            Entry::vpn("Office", "vpn.example.com", VpnStrategy::Ikev2Only),
        );
        (sim.clone(), RasClient::with_capability(sim, capability))
    }

    fn book() -> &'static Path {
        Path::new(BOOK)
    }

    #[test]
    fn test_capability_probed_or_pinned() {
        let sim = Arc::new(SimulatedRas::new(Capability::Vista));
        sim.set_report_capability(false);
        let client = RasClient::new(sim.clone(), Config::default()).unwrap();
        assert_eq!(client.capability(), Capability::Vista);

        let mut config = Config::default();
        config.capability.level = Some(Capability::Legacy);
        let client = RasClient::new(sim, config).unwrap();
        assert_eq!(client.capability(), Capability::Legacy);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.buffer.max_attempts = 0;
        let sim = Arc::new(SimulatedRas::default());
        assert!(RasClient::new(sim, config).is_err());
    }

    #[test]
    fn test_connections_and_devices() {
        let (sim, client) = setup(Capability::Win8);
        assert!(client.connections().unwrap().is_empty());

        let first = sim.add_connection("Office", "WAN Miniport (IKEv2)");
        sim.add_connection("Branch", "WAN Miniport (SSTP)");
        let connections = client.connections().unwrap();
        assert_eq!(connections.len(), 2);
        let office = connections.iter().find(|c| c.entry_name == "Office").unwrap();
        assert_eq!(office.handle.id(), first);
        assert!(!office.handle.owns_resource());

        assert!(!client.devices().unwrap().is_empty());
    }

    #[test]
    fn test_list_growth_with_small_initial_buffer() {
        let (sim, client) = setup(Capability::Win7);
        for i in 0..5 {
            sim.add_connection(&format!("Conn {i}"), "WAN Miniport (L2TP)");
        }
        sim.force_growth(EntryPoint::EnumConnections, 2);
        let connections = client.connections().unwrap();
        assert_eq!(connections.len(), 5);
        assert_eq!(sim.call_count(EntryPoint::EnumConnections), 3);
    }

    #[test]
    fn test_entry_round_trip_per_capability() {
        for cap in Capability::ALL {
            let (_sim, client) = setup(cap);
            let mut entry = client.entry(book(), "Office").unwrap();
            assert_eq!(entry.phonebook.as_deref(), Some(book()));
            entry.redial_count = 7;
            client.save_entry(&entry).unwrap();

            let reread = client.entry(book(), "Office").unwrap();
            assert_eq!(reread, entry, "capability {cap}");
        }
    }

    #[test]
    fn test_save_unattached_entry() {
        let (_sim, client) = setup(Capability::Win7);
        let entry = Entry::vpn("Loose", "vpn.example.com", VpnStrategy::Default);
        let err = client.save_entry(&entry).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAttached);
    }

    #[test]
    fn test_unattached_entry_rejected_for_rename_and_credentials() {
        let (sim, client) = setup(Capability::Win7);
        let mut entry = Entry::vpn("Office", "vpn.example.com", VpnStrategy::Default);
        let kind = |r: Result<()>| r.unwrap_err().kind();
        assert_eq!(kind(client.rename(&mut entry, "Renamed")), ErrorKind::NotAttached);
        assert_eq!(entry.name, "Office");
        assert_eq!(
            client.credentials_for(&entry).unwrap_err().kind(),
            ErrorKind::NotAttached
        );
        assert_eq!(
            kind(client.set_credentials_for(&entry, &Credentials::new("alice", "pw"))),
            ErrorKind::NotAttached
        );
        assert_eq!(kind(client.clear_credentials_for(&entry)), ErrorKind::NotAttached);
        assert_eq!(sim.call_count(EntryPoint::RenameEntry), 0);
        assert_eq!(sim.call_count(EntryPoint::GetCredentials), 0);
        assert_eq!(sim.call_count(EntryPoint::SetCredentials), 0);
    }

    #[test]
    fn test_attached_entry_rename_and_credentials() {
        let (_sim, client) = setup(Capability::Win7);
        let mut entry = client.entry(book(), "Office").unwrap();
        client
            .set_credentials_for(&entry, &Credentials::new("alice", "s3cret"))
            .unwrap();
        assert_eq!(
            client.credentials_for(&entry).unwrap().user_name.as_deref(),
            Some("alice")
        );

        client.rename(&mut entry, "Head Office").unwrap();
        assert_eq!(entry.name, "Head Office");
        assert!(client.entry(book(), "Office").is_err());
        assert!(client.entry(book(), "Head Office").is_ok());

        client.clear_credentials_for(&entry).unwrap();
        assert!(client.credentials_for(&entry).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_clients_get_distinct_dial_tokens() {
        let sim = Arc::new(SimulatedRas::new(Capability::Win7));
        sim.insert_entry(
            Some(BOOK),
            Entry::vpn("Office", "vpn.example.com", VpnStrategy::Default),
        );
        sim.set_dial_script(DialScript::connect(Duration::from_millis(5)));
        let first = RasClient::with_capability(sim.clone(), Capability::Win7);
        let second = RasClient::with_capability(sim.clone(), Capability::Win7);

        let a = first.dialer().with_entry("Office", Some(PathBuf::from(BOOK)));
        let b = second.dialer().with_entry("Office", Some(PathBuf::from(BOOK)));
        let ta = a.dial_async().unwrap();
        let tb = b.dial_async().unwrap();
        assert_ne!(ta.token(), tb.token());

        let ca = ta.wait_timeout(Duration::from_secs(5)).unwrap();
        let cb = tb.wait_timeout(Duration::from_secs(5)).unwrap();
        assert!(ca.connected && cb.connected);
        assert_ne!(ca.handle.unwrap().id(), cb.handle.unwrap().id());
        assert_eq!(sim.routed_dials(), 0);
    }

    #[test]
    fn test_missing_entry_keeps_native_code() {
        let (_sim, client) = setup(Capability::Win7);
        let err = client.entry(book(), "Nope").unwrap_err();
        assert_eq!(
            err.native_code(),
            Some(codes::ERROR_CANNOT_FIND_PHONEBOOK_ENTRY as i32)
        );
    }

    #[test]
    fn test_entry_names_and_validation() {
        let (_sim, client) = setup(Capability::Win7);
        let names = client.entry_names(Some(book())).unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].name, "Office");

        assert_eq!(
            client.validate_entry_name(Some(book()), "Office").unwrap(),
            NameValidation::AlreadyExists
        );
        assert_eq!(
            client.validate_entry_name(Some(book()), "New").unwrap(),
            NameValidation::Valid
        );
    }

    #[test]
    fn test_credentials() {
        let (_sim, client) = setup(Capability::Win7);
        let creds = client.credentials(book(), "Office").unwrap();
        assert!(creds.is_empty());

        client
            .set_credentials(book(), "Office", &Credentials::new("alice", "s3cret"))
            .unwrap();
        let creds = client.credentials(book(), "Office").unwrap();
        assert_eq!(creds.user_name.as_deref(), Some("alice"));
        assert_eq!(creds.password.as_deref(), Some("s3cret"));
        assert!(creds.domain.is_none());

        client.clear_credentials(book(), "Office").unwrap();
        assert!(client.credentials(book(), "Office").unwrap().is_empty());
    }

    #[test]
    fn test_pre_shared_key_gated_by_capability() {
        let (_sim, client) = setup(Capability::Win7);
        assert_eq!(client.pre_shared_key(book(), "Office", PskRole::Client).unwrap(), None);
        client
            .set_pre_shared_key(book(), "Office", PskRole::Client, "psk")
            .unwrap();
        assert_eq!(
            client
                .pre_shared_key(book(), "Office", PskRole::Client)
                .unwrap()
                .as_deref(),
            Some("psk")
        );
        client
            .clear_pre_shared_key(book(), "Office", PskRole::Client)
            .unwrap();
        assert_eq!(client.pre_shared_key(book(), "Office", PskRole::Client).unwrap(), None);

        let (sim, legacy) = setup(Capability::Vista);
        let err = legacy
            .pre_shared_key(book(), "Office", PskRole::Server)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapabilityUnsupported);
        assert_eq!(sim.call_count(EntryPoint::GetCredentials), 0);
    }

    #[test]
    fn test_auth_blobs() {
        let (_sim, client) = setup(Capability::Win7);
        assert_eq!(client.custom_auth_data(book(), "Office").unwrap(), None);
        client
            .set_custom_auth_data(book(), "Office", &[1, 2, 3])
            .unwrap();
        assert_eq!(
            client.custom_auth_data(book(), "Office").unwrap(),
            Some(vec![1, 2, 3])
        );

        client.set_eap_user_data(book(), "Office", b"eap").unwrap();
        assert_eq!(
            client.eap_user_data(book(), "Office").unwrap().as_deref(),
            Some(&b"eap"[..])
        );
    }

    #[test]
    fn test_missing_entry_point_is_unsupported() {
        let (_sim, client) = setup(Capability::Legacy);
        let err = client.eap_user_data(book(), "Office").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapabilityUnsupported);
        assert!(err.native_code().is_none());

        let handle = RasHandle::borrowed(0x10000);
        let err = client.connection_statistics(&handle).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapabilityUnsupported);
    }

    #[test]
    fn test_autodial_addresses() {
        let (sim, client) = setup(Capability::Win7);
        assert!(client.autodial_addresses().unwrap().is_empty());
        sim.set_autodial_addresses(vec!["intranet.example.com".into(), "10.0.0.1".into()]);
        assert_eq!(
            client.autodial_addresses().unwrap(),
            vec!["intranet.example.com".to_string(), "10.0.0.1".to_string()]
        );
    }

    #[test]
    fn test_status_statistics_and_projection() {
        let (sim, client) = setup(Capability::Win8);
        let raw = sim.add_connection("Office", "WAN Miniport (IKEv2)");
        let handle = RasHandle::borrowed(raw);

        let status = client.connection_status(&handle).unwrap();
        assert_eq!(status.state, ConnectionState::Connected);
        assert!(status.local_endpoint.is_some());

        client.connection_statistics(&handle).unwrap();
        client.link_statistics(&handle, 1).unwrap();
        client.clear_connection_statistics(&handle).unwrap();
        let cleared = client.connection_statistics(&handle).unwrap();
        assert_eq!(cleared.bytes_transmitted, 0);

        match client.projection(&handle, Projection::Ip).unwrap() {
            ProjectionInfo::Ip(ip) => assert!(ip.error_code.is_none()),
            other => panic!("unexpected projection {other:?}"),
        }
        assert!(matches!(
            client.projection_ex(&handle).unwrap(),
            ProjectionInfoEx::Ikev2(_)
        ));
        let err = client.projection(&handle, Projection::Ipx).unwrap_err();
        assert_eq!(
            err.native_code(),
            Some(codes::ERROR_PROTOCOL_NOT_CONFIGURED as i32)
        );
    }

    #[test]
    fn test_projection_ex_needs_win7() {
        let (sim, client) = setup(Capability::Vista);
        let handle = RasHandle::borrowed(sim.add_connection("Office", "WAN Miniport (PPTP)"));
        let err = client.projection_ex(&handle).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapabilityUnsupported);
    }

    #[test]
    fn test_released_handle_is_rejected() {
        let (sim, client) = setup(Capability::Win7);
        let handle = RasHandle::owned(sim.add_connection("Office", "x"), sim.clone());
        handle.release().unwrap();
        let err = client.connection_status(&handle).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
    }

    #[test]
    fn test_hang_up_is_idempotent() {
        let (sim, client) = setup(Capability::Win7);
        let raw = sim.add_connection("Office", "WAN Miniport (IKEv2)");
        let handle = RasHandle::owned(raw, sim.clone());

        client.hang_up(&handle).unwrap();
        assert!(!sim.is_connected(raw));
        assert!(!handle.is_valid());
        client.hang_up(&handle).unwrap();
        assert_eq!(sim.call_count(EntryPoint::HangUp), 1);
    }

    #[test]
    fn test_hang_up_of_vanished_connection() {
        let (sim, client) = setup(Capability::Win7);
        let raw = sim.add_connection("Office", "WAN Miniport (IKEv2)");
        sim.drop_connection(raw);
        client.hang_up(&RasHandle::borrowed(raw)).unwrap();
    }

    #[test]
    fn test_hang_up_no_connection_while_listed() {
        let (sim, client) = setup(Capability::Win7);
        let raw = sim.add_connection("Office", "WAN Miniport (IKEv2)");
        sim.fail_next(EntryPoint::HangUp, codes::ERROR_NO_CONNECTION);
        let err = client.hang_up(&RasHandle::borrowed(raw)).unwrap_err();
        assert_eq!(err.native_code(), Some(codes::ERROR_NO_CONNECTION as i32));
        assert!(sim.is_connected(raw));
    }

    #[test]
    fn test_error_description() {
        let (_sim, client) = setup(Capability::Win7);
        let text = client
            .error_description(codes::ERROR_AUTHENTICATION_FAILURE)
            .unwrap();
        assert!(!text.is_empty());
        assert!(client.error_description(424242).is_err());
    }

    #[test]
    fn test_dialer_uses_config() {
        let sim = Arc::new(SimulatedRas::default());
        sim.insert_entry(
            Some("office.pbk"),
            Entry::vpn("Office", "vpn.example.com", VpnStrategy::Default),
        );
        sim.set_dial_script(DialScript::connect(Duration::from_millis(1)));
        let mut config = Config::default();
        config.phonebook.path = Some(PathBuf::from("office.pbk"));
        config.dial.timeout_ms = 1500;
        let client = RasClient::new(sim.clone(), config).unwrap();

        let mut dialer = client.dialer();
        assert_eq!(dialer.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(dialer.phonebook.as_deref(), Some(Path::new("office.pbk")));
        dialer.entry_name = "Office".to_string();
        let handle = dialer.dial().unwrap();
        assert!(client.is_active(&handle).unwrap());
        client.hang_up(&handle).unwrap();
        assert!(!client.is_active(&handle).unwrap());
    }
}
