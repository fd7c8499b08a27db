//! Opaque references to native RAS resources

use crate::error::{check, RasError, Result};
use crate::native::{EntryPoint, NativeApi, RawHandle};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct HandleInner {
    raw: RawHandle,
    released: AtomicBool,
    /// Present only when this handle owns the native resource
    owner: Option<Arc<dyn NativeApi>>,
}

/// Handle to a live connection or an in-flight dial.
///
/// Clones share release state. Equality and hashing use the raw identifier
/// only, so handles obtained from separate calls for the same connection
/// compare equal.
#[derive(Clone)]
pub struct RasHandle {
    inner: Arc<HandleInner>,
}

impl RasHandle {
    /// Handle that frees the resource through `api` when released
    pub fn owned(raw: RawHandle, api: Arc<dyn NativeApi>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                raw,
                released: AtomicBool::new(false),
                owner: Some(api),
            }),
        }
    }

    /// Handle to a resource this process did not create
    pub fn borrowed(raw: RawHandle) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                raw,
                released: AtomicBool::new(false),
                owner: None,
            }),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.raw != 0 && !self.inner.released.load(Ordering::Acquire)
    }

    pub fn owns_resource(&self) -> bool {
        self.inner.owner.is_some()
    }

    /// Raw identifier for a native call
    ///
    /// # Errors
    /// Returns `InvalidHandle` once the handle has been released
    pub fn raw(&self) -> Result<RawHandle> {
        if self.inner.raw == 0 {
            return Err(RasError::InvalidHandle("null handle".to_string()));
        }
        if self.inner.released.load(Ordering::Acquire) {
            return Err(RasError::InvalidHandle(format!(
                "handle {:#x} has been released",
                self.inner.raw
            )));
        }
        Ok(self.inner.raw)
    }

    /// Raw identifier regardless of validity, for logging and comparisons
    pub fn id(&self) -> RawHandle {
        self.inner.raw
    }

    /// Release the handle. A second release is a no-op.
    ///
    /// Owned handles hang up the native resource; borrowed handles are only
    /// marked invalid.
    pub fn release(&self) -> Result<()> {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match &self.inner.owner {
            Some(api) if self.inner.raw != 0 => {
                log::debug!("Releasing owned handle {:#x}", self.inner.raw);
                let code = api.hang_up(self.inner.raw);
                // The resource may already be gone; that still counts as released
                if code == crate::native::codes::ERROR_NO_CONNECTION
                    || code == crate::native::codes::ERROR_INVALID_HANDLE
                {
                    return Ok(());
                }
                check(code, EntryPoint::HangUp)
            }
            _ => Ok(()),
        }
    }

    /// Mark released without touching the native resource. Used once the
    /// resource has been freed by another path (e.g. an explicit hang-up).
    pub(crate) fn invalidate(&self) {
        self.inner.released.store(true, Ordering::Release);
    }
}

impl PartialEq for RasHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.raw == other.inner.raw
    }
}

impl Eq for RasHandle {}

impl Hash for RasHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.raw.hash(state);
    }
}

impl fmt::Debug for RasHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasHandle")
            .field("raw", &format_args!("{:#x}", self.inner.raw))
            .field("owned", &self.owns_resource())
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;
    use crate::native::simulated::SimulatedRas;
    use std::collections::HashSet;

    #[test]
    fn test_equality_by_identifier() {
        let a = RasHandle::borrowed(0x42);
        let b = RasHandle::borrowed(0x42);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert_ne!(RasHandle::borrowed(0x43), b);
    }

    #[test]
    fn test_null_handle_is_invalid() {
        let handle = RasHandle::borrowed(0);
        assert!(!handle.is_valid());
        assert!(matches!(handle.raw(), Err(RasError::InvalidHandle(_))));
    }

    #[test]
    fn test_release_is_idempotent() {
        let api = Arc::new(SimulatedRas::new(Capability::Win7));
        let raw = api.add_connection("Office VPN", "WAN Miniport (IKEv2)");
        let handle = RasHandle::owned(raw, api.clone());

        assert!(handle.release().is_ok());
        assert!(handle.release().is_ok());
        assert_eq!(api.call_count(EntryPoint::HangUp), 1);
        assert!(!handle.is_valid());
        assert!(matches!(handle.raw(), Err(RasError::InvalidHandle(_))));
    }

    #[test]
    fn test_borrowed_release_does_not_free() {
        let api = Arc::new(SimulatedRas::new(Capability::Win7));
        let raw = api.add_connection("Office VPN", "WAN Miniport (IKEv2)");
        let handle = RasHandle::borrowed(raw);

        handle.release().unwrap();
        assert_eq!(api.call_count(EntryPoint::HangUp), 0);
        assert!(api.is_connected(raw));
    }

    #[test]
    fn test_clones_share_release_state() {
        let handle = RasHandle::borrowed(7);
        let clone = handle.clone();
        handle.release().unwrap();
        assert!(!clone.is_valid());
    }
}
