//! Stored credentials (`RASCREDENTIALS`)

use super::{FieldSpec, FieldType, FieldValue, FieldValues, NativeRecord, Schema};
use crate::capability::Capability;
use crate::error::Result;
use crate::native::codes::*;
use std::fmt;

pub static RASCREDENTIALS: Schema = Schema {
    name: "RASCREDENTIALS",
    fields: &[
        FieldSpec::new("dwSize", FieldType::U32),
        FieldSpec::new("dwMask", FieldType::U32),
        FieldSpec::new("szUserName", FieldType::WStr(UNLEN + 1)),
        FieldSpec::new("szPassword", FieldType::WStr(PWLEN + 1)),
        FieldSpec::new("szDomain", FieldType::WStr(DNLEN + 1)),
    ],
};

/// Pre-shared key slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PskRole {
    /// Key used when this machine dials out
    Client,
    /// Key presented to incoming clients
    Server,
    /// Demand-dial (router) key
    Ddm,
}

impl PskRole {
    pub fn mask(self) -> u32 {
        match self {
            PskRole::Client => RASCM_PRE_SHARED_KEY,
            PskRole::Server => RASCM_SERVER_PRE_SHARED_KEY,
            PskRole::Ddm => RASCM_DDM_PRE_SHARED_KEY,
        }
    }

    /// Pre-shared key masks are only understood from Windows 7 on
    pub fn min_capability(self) -> Capability {
        Capability::Win7
    }
}

/// User credentials for a phonebook entry
///
/// `None` fields are left out of the native mask, so saving leaves the stored
/// value untouched and reading reports that nothing is stored.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user_name: Option<String>,
    pub password: Option<String>,
    pub domain: Option<String>,
    /// Credentials shared by all users of the entry
    pub default_credentials: bool,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_name", &self.user_name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("domain", &self.domain)
            .field("default_credentials", &self.default_credentials)
            .finish()
    }
}

impl Credentials {
    pub fn new(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_name: Some(user_name.into()),
            password: Some(password.into()),
            domain: None,
            default_credentials: false,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn mask(&self) -> u32 {
        let mut mask = 0;
        if self.user_name.is_some() {
            mask |= RASCM_USER_NAME;
        }
        if self.password.is_some() {
            mask |= RASCM_PASSWORD;
        }
        if self.domain.is_some() {
            mask |= RASCM_DOMAIN;
        }
        if self.default_credentials {
            mask |= RASCM_DEFAULT_CREDS;
        }
        mask
    }

    pub fn is_empty(&self) -> bool {
        self.user_name.is_none() && self.password.is_none() && self.domain.is_none()
    }
}

impl NativeRecord for Credentials {
    fn schema() -> &'static Schema {
        &RASCREDENTIALS
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        let mask = fields.u32("dwMask")?;
        let pick = |bit: u32, name: &str| -> Result<Option<String>> {
            if mask & bit != 0 {
                fields.string(name).map(Some)
            } else {
                Ok(None)
            }
        };
        Ok(Self {
            user_name: pick(RASCM_USER_NAME, "szUserName")?,
            password: pick(RASCM_PASSWORD, "szPassword")?,
            domain: pick(RASCM_DOMAIN, "szDomain")?,
            default_credentials: mask & RASCM_DEFAULT_CREDS != 0,
        })
    }

    fn to_fields(&self) -> FieldValues {
        let mut fields = FieldValues::new().with("dwMask", FieldValue::U32(self.mask()));
        if let Some(user) = &self.user_name {
            fields.set("szUserName", FieldValue::Str(user.clone()));
        }
        if let Some(password) = &self.password {
            fields.set("szPassword", FieldValue::Str(password.clone()));
        }
        if let Some(domain) = &self.domain {
            fields.set("szDomain", FieldValue::Str(domain.clone()));
        }
        fields
    }
}

/// Credentials record carrying a pre-shared key in the password slot
pub fn pre_shared_key_fields(role: PskRole, key: Option<&str>) -> FieldValues {
    let mut fields = FieldValues::new().with("dwMask", FieldValue::U32(role.mask()));
    if let Some(key) = key {
        fields.set("szPassword", FieldValue::Str(key.to_string()));
    }
    fields
}

/// Mask-only query record for reading `role`'s key
pub fn pre_shared_key_query(role: PskRole) -> FieldValues {
    pre_shared_key_fields(role, None)
}

/// Extract the key from a decoded pre-shared key record
pub fn pre_shared_key_from(fields: &FieldValues, role: PskRole) -> Result<Option<String>> {
    if fields.u32("dwMask")? & role.mask() == 0 {
        return Ok(None);
    }
    let key = fields.string("szPassword")?;
    Ok((!key.is_empty()).then_some(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_size() {
        assert_eq!(RASCREDENTIALS.size(Capability::Legacy), 4 + 4 + 514 + 514 + 32);
    }

    #[test]
    fn test_mask_follows_present_fields() {
        let creds = Credentials::new("alice", "s3cret").with_domain("CORP");
        assert_eq!(creds.mask(), RASCM_USER_NAME | RASCM_PASSWORD | RASCM_DOMAIN);

        let bytes = creds.encode(Capability::Win7).unwrap();
        let decoded = Credentials::decode(&bytes, Capability::Win7).unwrap();
        assert_eq!(decoded, creds);
    }

    #[test]
    fn test_unmasked_fields_read_as_absent() {
        let fields = FieldValues::new()
            .with("dwMask", FieldValue::U32(RASCM_USER_NAME))
            .with("szUserName", FieldValue::Str("bob".to_string()))
            .with("szPassword", FieldValue::Str("ignored".to_string()));
        let bytes = RASCREDENTIALS.encode(&fields, Capability::Legacy).unwrap();
        let creds = Credentials::decode(&bytes, Capability::Legacy).unwrap();
        assert_eq!(creds.user_name.as_deref(), Some("bob"));
        assert!(creds.password.is_none());
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", Credentials::new("alice", "hunter2"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("alice"));
    }

    #[test]
    fn test_pre_shared_key_record() {
        let fields = pre_shared_key_fields(PskRole::Server, Some("psk-value"));
        let bytes = RASCREDENTIALS.encode(&fields, Capability::Win7).unwrap();
        let decoded = RASCREDENTIALS.decode(&bytes, Capability::Win7).unwrap();
        assert_eq!(
            pre_shared_key_from(&decoded, PskRole::Server).unwrap().as_deref(),
            Some("psk-value")
        );
        assert_eq!(pre_shared_key_from(&decoded, PskRole::Client).unwrap(), None);
        assert_eq!(PskRole::Ddm.min_capability(), Capability::Win7);
    }
}
