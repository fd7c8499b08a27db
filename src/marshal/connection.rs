//! Active connection, device and phonebook entry-name records

use super::{FieldSpec, FieldType, FieldValue, FieldValues, NativeRecord, Schema};
use crate::capability::Capability;
use crate::error::Result;
use crate::handle::RasHandle;
use crate::native::codes::*;
use uuid::Uuid;

pub static RASCONN: Schema = Schema {
    name: "RASCONN",
    fields: &[
        FieldSpec::new("dwSize", FieldType::U32),
        FieldSpec::new("hrasconn", FieldType::Handle),
        FieldSpec::new("szEntryName", FieldType::WStr(RAS_MAX_ENTRY_NAME + 1)),
        FieldSpec::new("szDeviceType", FieldType::WStr(RAS_MAX_DEVICE_TYPE + 1)),
        FieldSpec::new("szDeviceName", FieldType::WStr(RAS_MAX_DEVICE_NAME + 1)),
        FieldSpec::new("szPhonebook", FieldType::WStr(MAX_PATH)),
        FieldSpec::new("dwSubEntry", FieldType::U32),
        FieldSpec::new("guidEntry", FieldType::Guid),
        FieldSpec::new("dwFlags", FieldType::U32),
        FieldSpec::new("luid", FieldType::Luid),
        FieldSpec::new("guidCorrelationId", FieldType::Guid).since(Capability::Vista),
    ],
};

pub static RASDEVINFO: Schema = Schema {
    name: "RASDEVINFO",
    fields: &[
        FieldSpec::new("dwSize", FieldType::U32),
        FieldSpec::new("szDeviceType", FieldType::WStr(RAS_MAX_DEVICE_TYPE + 1)),
        FieldSpec::new("szDeviceName", FieldType::WStr(RAS_MAX_DEVICE_NAME + 1)),
    ],
};

pub static RASENTRYNAME: Schema = Schema {
    name: "RASENTRYNAME",
    fields: &[
        FieldSpec::new("dwSize", FieldType::U32),
        FieldSpec::new("szEntryName", FieldType::WStr(RAS_MAX_ENTRY_NAME + 1)),
        FieldSpec::new("dwFlags", FieldType::U32),
        FieldSpec::new("szPhonebookPath", FieldType::WStr(MAX_PATH + 1)),
    ],
};

/// Connection flags (`RASCF_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionFlags(pub u32);

impl ConnectionFlags {
    pub const ALL_USERS: u32 = 0x1;
    pub const GLOBAL_CREDS: u32 = 0x2;
    pub const OWNER_KNOWN: u32 = 0x4;
    pub const OWNER_MATCH: u32 = 0x8;

    pub fn all_users(self) -> bool {
        self.0 & Self::ALL_USERS != 0
    }

    pub fn global_credentials(self) -> bool {
        self.0 & Self::GLOBAL_CREDS != 0
    }

    pub fn owner_known(self) -> bool {
        self.0 & Self::OWNER_KNOWN != 0
    }
}

/// A RAS capable device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RasDevice {
    pub name: String,
    /// Device class (`"vpn"`, `"modem"`, `"PPPoE"`, ...)
    pub device_type: String,
}

impl RasDevice {
    pub fn new(name: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_type: device_type.into(),
        }
    }

    pub fn is_vpn(&self) -> bool {
        self.device_type.eq_ignore_ascii_case("vpn")
    }
}

impl NativeRecord for RasDevice {
    fn schema() -> &'static Schema {
        &RASDEVINFO
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        Ok(Self {
            name: fields.string("szDeviceName")?,
            device_type: fields.string("szDeviceType")?,
        })
    }

    fn to_fields(&self) -> FieldValues {
        FieldValues::new()
            .with("szDeviceName", FieldValue::Str(self.name.clone()))
            .with("szDeviceType", FieldValue::Str(self.device_type.clone()))
    }
}

/// An active connection as reported by enumeration
#[derive(Debug, Clone, PartialEq)]
pub struct RasConnection {
    /// Non-owning: enumeration never transfers ownership
    pub handle: RasHandle,
    pub entry_name: String,
    pub device: RasDevice,
    pub phonebook_path: String,
    pub sub_entry: u32,
    pub entry_id: Uuid,
    pub flags: ConnectionFlags,
    pub session_luid: u64,
    /// Present from Vista on
    pub correlation_id: Option<Uuid>,
}

impl NativeRecord for RasConnection {
    fn schema() -> &'static Schema {
        &RASCONN
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        Ok(Self {
            handle: RasHandle::borrowed(fields.handle("hrasconn")?),
            entry_name: fields.string("szEntryName")?,
            device: RasDevice {
                name: fields.string("szDeviceName")?,
                device_type: fields.string("szDeviceType")?,
            },
            phonebook_path: fields.string("szPhonebook")?,
            sub_entry: fields.u32("dwSubEntry")?,
            entry_id: fields.guid("guidEntry")?,
            flags: ConnectionFlags(fields.u32("dwFlags")?),
            session_luid: fields.luid("luid")?,
            correlation_id: fields.opt_guid("guidCorrelationId"),
        })
    }

    fn to_fields(&self) -> FieldValues {
        let mut fields = FieldValues::new()
            .with("hrasconn", FieldValue::Handle(self.handle.id()))
            .with("szEntryName", FieldValue::Str(self.entry_name.clone()))
            .with("szDeviceType", FieldValue::Str(self.device.device_type.clone()))
            .with("szDeviceName", FieldValue::Str(self.device.name.clone()))
            .with("szPhonebook", FieldValue::Str(self.phonebook_path.clone()))
            .with("dwSubEntry", FieldValue::U32(self.sub_entry))
            .with("guidEntry", FieldValue::Guid(self.entry_id))
            .with("dwFlags", FieldValue::U32(self.flags.0))
            .with("luid", FieldValue::Luid(self.session_luid));
        if let Some(id) = self.correlation_id {
            fields.set("guidCorrelationId", FieldValue::Guid(id));
        }
        fields
    }
}

/// Phonebook entry name as returned by entry enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryName {
    pub name: String,
    /// Entry stored in the all-users phonebook (`REN_AllUsers`)
    pub all_users: bool,
    pub phonebook_path: String,
}

impl NativeRecord for EntryName {
    fn schema() -> &'static Schema {
        &RASENTRYNAME
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        Ok(Self {
            name: fields.string("szEntryName")?,
            all_users: fields.u32("dwFlags")? & 0x1 != 0,
            phonebook_path: fields.string("szPhonebookPath")?,
        })
    }

    fn to_fields(&self) -> FieldValues {
        FieldValues::new()
            .with("szEntryName", FieldValue::Str(self.name.clone()))
            .with("dwFlags", FieldValue::U32(u32::from(self.all_users)))
            .with("szPhonebookPath", FieldValue::Str(self.phonebook_path.clone()))
    }
}
