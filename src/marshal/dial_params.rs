//! Dial request records (`RASDIALPARAMS`, `RASDIALEXTENSIONS`)

use super::{FieldSpec, FieldType, FieldValue, FieldValues, NativeRecord, Schema};
use crate::capability::Capability;
use crate::error::Result;
use crate::native::codes::*;

pub static RASDIALPARAMS: Schema = Schema {
    name: "RASDIALPARAMS",
    fields: &[
        FieldSpec::new("dwSize", FieldType::U32),
        FieldSpec::new("szEntryName", FieldType::WStr(RAS_MAX_ENTRY_NAME + 1)),
        FieldSpec::new("szPhoneNumber", FieldType::WStr(RAS_MAX_PHONE_NUMBER + 1)),
        FieldSpec::new("szCallbackNumber", FieldType::WStr(RAS_MAX_CALLBACK_NUMBER + 1)),
        FieldSpec::new("szUserName", FieldType::WStr(UNLEN + 1)),
        FieldSpec::new("szPassword", FieldType::WStr(PWLEN + 1)),
        FieldSpec::new("szDomain", FieldType::WStr(DNLEN + 1)),
        FieldSpec::new("dwSubEntry", FieldType::U32),
        FieldSpec::new("dwCallbackId", FieldType::Handle),
        FieldSpec::new("dwIfIndex", FieldType::U32).since(Capability::Win7),
    ],
};

pub static RASDIALEXTENSIONS: Schema = Schema {
    name: "RASDIALEXTENSIONS",
    fields: &[
        FieldSpec::new("dwSize", FieldType::U32),
        FieldSpec::new("dwfOptions", FieldType::U32),
        FieldSpec::new("hwndParent", FieldType::Handle),
        FieldSpec::new("reserved", FieldType::Handle),
        FieldSpec::new("reserved1", FieldType::Handle),
        FieldSpec::new("dwSizeofEapInfo", FieldType::U32),
        FieldSpec::new("pbEapInfo", FieldType::Handle),
        FieldSpec::new("fSkipPppAuth", FieldType::Bool).since(Capability::Win7),
        FieldSpec::new("dwDevSpecificInfoSize", FieldType::U32).since(Capability::Win7),
        FieldSpec::new("pbDevSpecificInfo", FieldType::Handle).since(Capability::Win7),
    ],
};

flag_set! {
    /// `RDEOPT_*` dial extension options
    DialOptions {
        USE_PREFIX_SUFFIX = 0x0000_0001,
        PAUSED_STATES = 0x0000_0002,
        IGNORE_MODEM_SPEAKER = 0x0000_0004,
        SET_MODEM_SPEAKER = 0x0000_0008,
        IGNORE_SOFTWARE_COMPRESSION = 0x0000_0010,
        SET_SOFTWARE_COMPRESSION = 0x0000_0020,
        DISABLE_CONNECTED_UI = 0x0000_0040,
        DISABLE_RECONNECT_UI = 0x0000_0080,
        DISABLE_RECONNECT = 0x0000_0100,
        NO_USER = 0x0000_0200,
        PAUSE_ON_SCRIPT = 0x0000_0400,
        ROUTER = 0x0000_0800,
        CUSTOM_DIAL = 0x0000_1000,
        USE_CUSTOM_SCRIPTING = 0x0000_2000,
    }
}

/// Per-dial parameters
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DialParams {
    pub entry_name: String,
    pub phone_number: String,
    pub callback_number: String,
    pub user_name: String,
    pub password: String,
    pub domain: String,
    pub sub_entry: u32,
    /// Correlation value echoed back in every progress notification
    pub callback_id: usize,
    /// Interface to dial over (Windows 7 and later)
    pub if_index: u32,
}

impl std::fmt::Debug for DialParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialParams")
            .field("entry_name", &self.entry_name)
            .field("phone_number", &self.phone_number)
            .field("callback_number", &self.callback_number)
            .field("user_name", &self.user_name)
            .field("domain", &self.domain)
            .field("sub_entry", &self.sub_entry)
            .field("callback_id", &self.callback_id)
            .field("if_index", &self.if_index)
            .finish_non_exhaustive()
    }
}

impl NativeRecord for DialParams {
    fn schema() -> &'static Schema {
        &RASDIALPARAMS
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        Ok(Self {
            entry_name: fields.string("szEntryName")?,
            phone_number: fields.string("szPhoneNumber")?,
            callback_number: fields.string("szCallbackNumber")?,
            user_name: fields.string("szUserName")?,
            password: fields.string("szPassword")?,
            domain: fields.string("szDomain")?,
            sub_entry: fields.u32("dwSubEntry")?,
            callback_id: fields.handle("dwCallbackId")?,
            if_index: fields.opt_u32("dwIfIndex").unwrap_or(0),
        })
    }

    fn to_fields(&self) -> FieldValues {
        FieldValues::new()
            .with("szEntryName", FieldValue::Str(self.entry_name.clone()))
            .with("szPhoneNumber", FieldValue::Str(self.phone_number.clone()))
            .with("szCallbackNumber", FieldValue::Str(self.callback_number.clone()))
            .with("szUserName", FieldValue::Str(self.user_name.clone()))
            .with("szPassword", FieldValue::Str(self.password.clone()))
            .with("szDomain", FieldValue::Str(self.domain.clone()))
            .with("dwSubEntry", FieldValue::U32(self.sub_entry))
            .with("dwCallbackId", FieldValue::Handle(self.callback_id))
            .with("dwIfIndex", FieldValue::U32(self.if_index))
    }
}

/// Dial extensions; pointer members are always passed as null
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DialExtensions {
    pub options: DialOptions,
    pub skip_ppp_auth: bool,
}

impl NativeRecord for DialExtensions {
    fn schema() -> &'static Schema {
        &RASDIALEXTENSIONS
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        Ok(Self {
            options: DialOptions(fields.u32("dwfOptions")?),
            skip_ppp_auth: fields.opt_bool("fSkipPppAuth").unwrap_or(false),
        })
    }

    fn to_fields(&self) -> FieldValues {
        FieldValues::new()
            .with("dwfOptions", FieldValue::U32(self.options.bits()))
            .with("fSkipPppAuth", FieldValue::Bool(self.skip_ppp_auth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_params_round_trip() {
        let params = DialParams {
            entry_name: "Office VPN".to_string(),
            user_name: "alice".to_string(),
            password: "s3cret".to_string(),
            domain: "CORP".to_string(),
            sub_entry: 1,
            callback_id: 42,
            if_index: 7,
            ..Default::default()
        };
        let bytes = params.encode(Capability::Win7).unwrap();
        assert_eq!(DialParams::decode(&bytes, Capability::Win7).unwrap(), params);

        let legacy = DialParams::decode(&params.encode(Capability::Legacy).unwrap(), Capability::Legacy)
            .unwrap();
        assert_eq!(legacy.if_index, 0);
        assert_eq!(legacy.callback_id, 42);
    }

    #[test]
    fn test_debug_hides_password() {
        let params = DialParams {
            password: "hunter2".to_string(),
            ..Default::default()
        };
        assert!(!format!("{params:?}").contains("hunter2"));
    }

    #[test]
    fn test_extensions_grow_on_win7() {
        assert!(RASDIALEXTENSIONS.size(Capability::Win7) > RASDIALEXTENSIONS.size(Capability::Vista));
        let ext = DialExtensions {
            options: DialOptions::PAUSED_STATES | DialOptions::DISABLE_RECONNECT_UI,
            skip_ppp_auth: true,
        };
        let bytes = ext.encode(Capability::Win8).unwrap();
        assert_eq!(DialExtensions::decode(&bytes, Capability::Win8).unwrap(), ext);
    }
}
