//! Phonebooks
//!
//! A [`Phonebook`] is a resolved file path plus the entries read from it,
//! keyed by name. Every mutation goes through the native entry points first
//! and only then updates the in-memory copy.

use crate::client::RasClient;
use crate::config::{PhonebookConfig, PhonebookScope};
use crate::error::{RasError, Result};
use crate::marshal::Entry;
use crate::native::codes::RAS_MAX_ENTRY_NAME;
use regex::Regex;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Location of `rasphone.pbk` below the profile roots
const PBK_RELATIVE: [&str; 5] = ["Microsoft", "Network", "Connections", "Pbk", "rasphone.pbk"];

lazy_static::lazy_static! {
    /// No leading dot, no backslash, no control characters
    static ref ENTRY_NAME: Regex = Regex::new(r"^[^.\\\p{Cc}][^\\\p{Cc}]*$").unwrap();
}

/// Where a phonebook file lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PhonebookPath {
    /// `%APPDATA%\Microsoft\Network\Connections\Pbk\rasphone.pbk`
    User,
    /// `%ProgramData%\Microsoft\Network\Connections\Pbk\rasphone.pbk`
    AllUsers,
    Custom(PathBuf),
}

impl PhonebookPath {
    pub fn from_config(config: &PhonebookConfig) -> Self {
        match (&config.path, config.scope) {
            (Some(path), _) => PhonebookPath::Custom(path.clone()),
            (None, PhonebookScope::User) => PhonebookPath::User,
            (None, PhonebookScope::AllUsers) => PhonebookPath::AllUsers,
        }
    }

    /// Resolve to a file path
    ///
    /// # Errors
    /// `InvalidConfiguration` when the profile root variable is not set
    pub fn resolve(&self) -> Result<PathBuf> {
        let root = match self {
            PhonebookPath::Custom(path) => return Ok(path.clone()),
            PhonebookPath::User => "APPDATA",
            PhonebookPath::AllUsers => "ProgramData",
        };
        let base = std::env::var_os(root).ok_or_else(|| {
            RasError::InvalidConfiguration(format!(
                "%{root}% is not set; configure an explicit phonebook path"
            ))
        })?;
        let mut path = PathBuf::from(base);
        path.extend(PBK_RELATIVE);
        Ok(path)
    }
}

/// Outcome of an entry name check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameValidation {
    Valid,
    /// Well-formed, but the phonebook already has an entry of that name
    AlreadyExists,
    Invalid,
}

impl NameValidation {
    pub fn is_valid(self) -> bool {
        self == NameValidation::Valid
    }
}

/// Syntax check only; no native call
pub fn is_well_formed_entry_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name.encode_utf16().count() <= RAS_MAX_ENTRY_NAME
        && ENTRY_NAME.is_match(name)
}

/// Check `name` locally, then against `phonebook`
pub fn validate_entry_name(client: &RasClient, phonebook: &Path, name: &str) -> Result<NameValidation> {
    if !is_well_formed_entry_name(name) {
        log::debug!("entry name {:?} rejected locally", name);
        return Ok(NameValidation::Invalid);
    }
    client.validate_entry_name(Some(phonebook), name)
}

/// Entries of one phonebook file
pub struct Phonebook {
    client: RasClient,
    path: PathBuf,
    entries: BTreeMap<String, Entry>,
}

impl Phonebook {
    /// Resolve `location` and read every entry it holds
    pub fn open(client: &RasClient, location: &PhonebookPath) -> Result<Self> {
        let mut phonebook = Self {
            client: client.clone(),
            path: location.resolve()?,
            entries: BTreeMap::new(),
        };
        phonebook.reload()?;
        Ok(phonebook)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read all entries from the native phonebook
    pub fn reload(&mut self) -> Result<()> {
        let names = self.client.entry_names(Some(&self.path))?;
        let mut entries = BTreeMap::new();
        for name in names {
            let entry = self.client.entry(&self.path, &name.name)?;
            entries.insert(name.name, entry);
        }
        log::debug!(
            "loaded {} entries from {}",
            entries.len(),
            self.path.display()
        );
        self.entries = entries;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn iter(&self) -> btree_map::Values<'_, String, Entry> {
        self.entries.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a new entry and attach it to this phonebook
    pub fn add(&mut self, mut entry: Entry) -> Result<&Entry> {
        match validate_entry_name(&self.client, &self.path, &entry.name)? {
            NameValidation::Valid => {}
            NameValidation::AlreadyExists => {
                return Err(RasError::InvalidConfiguration(format!(
                    "Entry '{}' already exists in {}",
                    entry.name,
                    self.path.display()
                )));
            }
            NameValidation::Invalid => {
                return Err(RasError::InvalidConfiguration(format!(
                    "'{}' is not a valid entry name",
                    entry.name
                )));
            }
        }
        entry.phonebook = Some(self.path.clone());
        self.client.save_entry(&entry)?;
        log::info!("added entry '{}' to {}", entry.name, self.path.display());
        let name = entry.name.clone();
        Ok(self.entries.entry(name).or_insert(entry))
    }

    /// Write back a modified copy of an entry of this phonebook
    pub fn update(&mut self, entry: Entry) -> Result<()> {
        if entry.owner()? != &self.path {
            return Err(RasError::NotAttached(entry.name.clone()));
        }
        if !self.entries.contains_key(&entry.name) {
            return Err(RasError::InvalidConfiguration(format!(
                "Entry '{}' is not in {}",
                entry.name,
                self.path.display()
            )));
        }
        self.client.save_entry(&entry)?;
        self.entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    /// Delete an entry; returns it detached
    pub fn remove(&mut self, name: &str) -> Result<Entry> {
        self.client.delete_entry(&self.path, name)?;
        let mut entry = match self.entries.remove(name) {
            Some(entry) => entry,
            None => Entry::new(name),
        };
        entry.phonebook = None;
        log::info!("removed entry '{}' from {}", name, self.path.display());
        Ok(entry)
    }

    pub fn rename(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        if !is_well_formed_entry_name(new_name) {
            return Err(RasError::InvalidConfiguration(format!(
                "'{new_name}' is not a valid entry name"
            )));
        }
        self.client.rename_entry(&self.path, old_name, new_name)?;
        if let Some(mut entry) = self.entries.remove(old_name) {
            entry.name = new_name.to_string();
            self.entries.insert(new_name.to_string(), entry);
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Phonebook {
    type Item = &'a Entry;
    type IntoIter = btree_map::Values<'a, String, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::marshal::VpnStrategy;
    use crate::native::simulated::SimulatedRas;
    use std::sync::Arc;

    fn client() -> (Arc<SimulatedRas>, RasClient) {
        let sim = Arc::new(SimulatedRas::default());
        let capability = sim.capability();
        (sim.clone(), RasClient::with_capability(sim, capability))
    }

    fn office_book() -> PhonebookPath {
        PhonebookPath::Custom(PathBuf::from("office.pbk"))
    }

    #[test]
    fn test_entry_name_syntax() {
        assert!(is_well_formed_entry_name("Office VPN"));
        assert!(is_well_formed_entry_name("Büro (IKEv2)"));
        assert!(!is_well_formed_entry_name(""));
        assert!(!is_well_formed_entry_name("   "));
        assert!(!is_well_formed_entry_name(".hidden"));
        assert!(!is_well_formed_entry_name("a\\b"));
        assert!(!is_well_formed_entry_name("tab\there"));
        assert!(!is_well_formed_entry_name(&"x".repeat(RAS_MAX_ENTRY_NAME + 1)));
    }

    #[test]
    fn test_path_resolution() {
        let custom = PhonebookPath::Custom(PathBuf::from("/tmp/a.pbk"));
        assert_eq!(custom.resolve().unwrap(), PathBuf::from("/tmp/a.pbk"));

        let config = PhonebookConfig {
            path: None,
            scope: PhonebookScope::AllUsers,
        };
        assert_eq!(PhonebookPath::from_config(&config), PhonebookPath::AllUsers);
        if let Some(root) = std::env::var_os("ProgramData") {
            let resolved = PhonebookPath::AllUsers.resolve().unwrap();
            assert!(resolved.starts_with(root));
            assert!(resolved.ends_with("rasphone.pbk"));
        }
    }

    #[test]
    fn test_add_get_update_remove() {
        let (_sim, client) = client();
        let mut book = Phonebook::open(&client, &office_book()).unwrap();
        assert!(book.is_empty());

        let added = book
            .add(Entry::vpn("Office", "vpn.example.com", VpnStrategy::Ikev2Only))
            .unwrap();
        assert_eq!(added.phonebook.as_deref(), Some(Path::new("office.pbk")));

        let mut entry = book.get("Office").unwrap().clone();
        entry.redial_count = 3;
        book.update(entry).unwrap();

        book.reload().unwrap();
        assert_eq!(book.get("Office").unwrap().redial_count, 3);
        assert_eq!(book.names().collect::<Vec<_>>(), vec!["Office"]);

        let removed = book.remove("Office").unwrap();
        assert!(!removed.is_attached());
        assert!(book.is_empty());
    }

    #[test]
    fn test_duplicate_and_invalid_names_rejected() {
        let (sim, client) = client();
        let mut book = Phonebook::open(&client, &office_book()).unwrap();
        book.add(Entry::vpn("Office", "vpn.example.com", VpnStrategy::Default))
            .unwrap();

        let err = book
            .add(Entry::vpn("Office", "other.example.com", VpnStrategy::Default))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);

        let before = sim.call_count(crate::native::EntryPoint::ValidateEntryName);
        let err = book
            .add(Entry::vpn(".bad", "vpn.example.com", VpnStrategy::Default))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        assert_eq!(
            sim.call_count(crate::native::EntryPoint::ValidateEntryName),
            before
        );
    }

    #[test]
    fn test_update_of_unattached_entry() {
        let (_sim, client) = client();
        let mut book = Phonebook::open(&client, &office_book()).unwrap();
        let err = book
            .update(Entry::vpn("Office", "vpn.example.com", VpnStrategy::Default))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAttached);
    }

    #[test]
    fn test_rename() {
        let (_sim, client) = client();
        let mut book = Phonebook::open(&client, &office_book()).unwrap();
        book.add(Entry::vpn("Office", "vpn.example.com", VpnStrategy::Default))
            .unwrap();
        book.rename("Office", "Head Office").unwrap();
        assert!(!book.contains("Office"));
        assert_eq!(book.get("Head Office").unwrap().name, "Head Office");

        let mut reopened = Phonebook::open(&client, &office_book()).unwrap();
        reopened.reload().unwrap();
        assert!(reopened.contains("Head Office"));
        assert!(book.rename("Head Office", "a\\b").is_err());
    }

    #[test]
    fn test_open_reads_existing_entries() {
        let (sim, client) = client();
        sim.insert_entry(
            Some("office.pbk"),
            Entry::vpn("Branch", "branch.example.com", VpnStrategy::SstpOnly),
        );
        let book = Phonebook::open(&client, &office_book()).unwrap();
        let entry = book.get("Branch").unwrap();
        assert_eq!(entry.phone_number, "branch.example.com");
        assert_eq!(entry.vpn_strategy, VpnStrategy::SstpOnly);
        assert_eq!((&book).into_iter().count(), 1);
    }
}
