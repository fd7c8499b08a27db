//! Buffered native-call protocol
//!
//! Many RAS entry points fill a caller buffer whose required size is only
//! known after a first attempt. [`BufferedCall`] runs the size-discovery loop:
//! call, grow to the size the callee reported, retry, then decode what the
//! callee actually wrote.

use crate::error::{NativeError, RasError, Result};
use crate::native::{codes, EntryPoint};

/// Default upper bound on attempts for one logical call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

/// Largest buffer a callee may ask for
pub const MAX_BUFFER_SIZE: u32 = 16 * 1024 * 1024;

/// State of one logical buffered call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferRequest {
    pub entry_point: EntryPoint,
    /// Current buffer size; never decreases
    pub size: u32,
    /// Result code of the last attempt
    pub last_code: u32,
    pub attempts: u32,
}

impl BufferRequest {
    pub fn new(entry_point: EntryPoint, size: u32) -> Self {
        Self {
            entry_point,
            size: size.min(MAX_BUFFER_SIZE),
            last_code: codes::SUCCESS,
            attempts: 0,
        }
    }

    /// Record a size-too-small answer. Fails when the callee made no progress.
    fn grow(&mut self, required: u32) -> Result<()> {
        if required <= self.size {
            log::warn!(
                "{} asked for {} bytes with {} already supplied",
                self.entry_point,
                required,
                self.size
            );
            return Err(self.exhausted());
        }
        if required > MAX_BUFFER_SIZE {
            log::warn!(
                "{} asked for {} bytes, above the {} byte limit",
                self.entry_point,
                required,
                MAX_BUFFER_SIZE
            );
            return Err(self.exhausted());
        }
        log::debug!(
            "{} buffer grows {} -> {} bytes",
            self.entry_point,
            self.size,
            required
        );
        self.size = required;
        Ok(())
    }

    fn exhausted(&self) -> RasError {
        RasError::BufferProtocolExhausted {
            entry_point: self.entry_point,
            attempts: self.attempts,
        }
    }
}

/// Size-discovery loop shared by every list- and blob-returning call
#[derive(Debug, Clone, Copy)]
pub struct BufferedCall {
    max_attempts: u32,
}

impl Default for BufferedCall {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BufferedCall {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run a list-returning entry point.
    ///
    /// `call` receives the buffer, the in/out size and the out record count and
    /// returns the native result code. `decode` receives the bytes the callee
    /// reported as written and the record count.
    pub fn list<T, C, D>(
        &self,
        entry_point: EntryPoint,
        initial_size: u32,
        mut call: C,
        decode: D,
    ) -> Result<Vec<T>>
    where
        C: FnMut(&mut [u8], &mut u32, &mut u32) -> u32,
        D: FnOnce(&[u8], usize) -> Result<Vec<T>>,
    {
        let mut request = BufferRequest::new(entry_point, initial_size);
        loop {
            request.attempts += 1;
            if request.attempts > self.max_attempts {
                return Err(request.exhausted());
            }

            let mut buf = vec![0u8; request.size as usize];
            let mut size = request.size;
            let mut count = 0u32;
            let code = call(&mut buf, &mut size, &mut count);
            request.last_code = code;
            log::trace!(
                "{} attempt {} size {} -> code {} count {}",
                entry_point,
                request.attempts,
                request.size,
                code,
                count
            );

            match code {
                codes::SUCCESS => {
                    if count == 0 {
                        return Ok(Vec::new());
                    }
                    let written = (size as usize).min(buf.len());
                    return decode(&buf[..written], count as usize);
                }
                c if codes::is_buffer_too_small(c) => request.grow(size)?,
                c => return Err(NativeError::new(c, entry_point).into()),
            }
        }
    }

    /// Run a sized-blob entry point. A zero-length result is `None`.
    pub fn blob<C>(&self, entry_point: EntryPoint, call: C) -> Result<Option<Vec<u8>>>
    where
        C: FnMut(&mut [u8], &mut u32) -> u32,
    {
        self.blob_from(entry_point, 0, call)
    }

    /// [`blob`](Self::blob) with a first attempt of `initial_size` bytes, for
    /// calls that expect a stamped record even on the first try
    pub fn blob_from<C>(
        &self,
        entry_point: EntryPoint,
        initial_size: u32,
        mut call: C,
    ) -> Result<Option<Vec<u8>>>
    where
        C: FnMut(&mut [u8], &mut u32) -> u32,
    {
        let mut request = BufferRequest::new(entry_point, initial_size);
        loop {
            request.attempts += 1;
            if request.attempts > self.max_attempts {
                return Err(request.exhausted());
            }

            let mut buf = vec![0u8; request.size as usize];
            let mut size = request.size;
            let code = call(&mut buf, &mut size);
            request.last_code = code;
            log::trace!(
                "{} attempt {} size {} -> code {}",
                entry_point,
                request.attempts,
                request.size,
                code
            );

            match code {
                codes::SUCCESS => {
                    let written = (size as usize).min(buf.len());
                    if written == 0 {
                        return Ok(None);
                    }
                    buf.truncate(written);
                    return Ok(Some(buf));
                }
                c if codes::is_buffer_too_small(c) => request.grow(size)?,
                c => return Err(NativeError::new(c, entry_point).into()),
            }
        }
    }
}

/// Write `record_size` into the leading `dwSize` field of a native buffer.
pub fn stamp_record_size(buf: &mut [u8], record_size: usize) {
    if buf.len() >= 4 {
        buf[..4].copy_from_slice(&(record_size as u32).to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    /// Callee that needs `sizes[i]` on attempt `i`, then succeeds
    fn growing_callee(
        sizes: Vec<u32>,
        calls: &mut u32,
    ) -> impl FnMut(&mut [u8], &mut u32, &mut u32) -> u32 + '_ {
        move |buf, size, count| {
            let attempt = *calls as usize;
            *calls += 1;
            match sizes.get(attempt) {
                Some(needed) => {
                    *size = *needed;
                    codes::ERROR_BUFFER_TOO_SMALL
                }
                None => {
                    buf.fill(0xAB);
                    *count = buf.len() as u32;
                    *size = buf.len() as u32;
                    codes::SUCCESS
                }
            }
        }
    }

    #[test]
    fn test_growth_converges_in_n_plus_one_calls() {
        for n in 0..5u32 {
            let sizes: Vec<u32> = (1..=n).map(|i| i * 16).collect();
            let mut calls = 0;
            let result = BufferedCall::default()
                .list(
                    EntryPoint::EnumConnections,
                    0,
                    growing_callee(sizes, &mut calls),
                    |bytes, count| Ok(bytes[..count].to_vec()),
                )
                .unwrap();
            assert_eq!(calls, n + 1);
            assert_eq!(result.len(), (n * 16) as usize);
        }
    }

    #[test]
    fn test_zero_records_is_empty_success() {
        let result: Vec<u8> = BufferedCall::default()
            .list(
                EntryPoint::EnumDevices,
                64,
                |_, size, count| {
                    *size = 0;
                    *count = 0;
                    codes::SUCCESS
                },
                |_, _| panic!("decode must not run without records"),
            )
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_zero_required_size_does_not_loop() {
        let mut calls = 0;
        let err = BufferedCall::default()
            .list::<u8, _, _>(
                EntryPoint::EnumConnections,
                0,
                |_, size, _| {
                    calls += 1;
                    *size = 0;
                    codes::ERROR_BUFFER_TOO_SMALL
                },
                |_, _| Ok(Vec::new()),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BufferProtocolExhausted);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_unchanged_size_is_non_progress() {
        let mut calls = 0;
        let err = BufferedCall::default()
            .blob(EntryPoint::GetCustomAuthData, |_, size| {
                calls += 1;
                *size = 32;
                codes::ERROR_INSUFFICIENT_BUFFER
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BufferProtocolExhausted);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_attempt_cap() {
        let mut next = 0u32;
        let err = BufferedCall::new(3)
            .blob(EntryPoint::GetEapUserData, |_, size| {
                next += 10;
                *size = next;
                codes::ERROR_BUFFER_TOO_SMALL
            })
            .unwrap_err();
        assert!(matches!(
            err,
            RasError::BufferProtocolExhausted { attempts: 4, .. }
        ));
    }

    #[test]
    fn test_oversized_request_is_refused() {
        let mut calls = 0;
        let err = BufferedCall::default()
            .list::<u8, _, _>(
                EntryPoint::EnumConnections,
                0,
                |buf, size, _| {
                    calls += 1;
                    assert!(buf.len() <= MAX_BUFFER_SIZE as usize);
                    *size = u32::MAX;
                    codes::ERROR_BUFFER_TOO_SMALL
                },
                |_, _| Ok(Vec::new()),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RasError::BufferProtocolExhausted { attempts: 1, .. }
        ));
        assert_eq!(calls, 1);

        let err = BufferedCall::default()
            .blob(EntryPoint::GetEapUserData, |_, size| {
                *size = MAX_BUFFER_SIZE + 1;
                codes::ERROR_BUFFER_TOO_SMALL
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BufferProtocolExhausted);
    }

    #[test]
    fn test_request_at_limit_is_allowed() {
        let mut calls = 0;
        let blob = BufferedCall::default()
            .blob(EntryPoint::GetCustomAuthData, |buf, size| {
                calls += 1;
                if buf.len() < MAX_BUFFER_SIZE as usize {
                    *size = MAX_BUFFER_SIZE;
                    return codes::ERROR_BUFFER_TOO_SMALL;
                }
                *size = 4;
                codes::SUCCESS
            })
            .unwrap();
        assert_eq!(calls, 2);
        assert_eq!(blob.map(|b| b.len()), Some(4));
    }

    #[test]
    fn test_other_codes_are_translated() {
        let err = BufferedCall::default()
            .blob(EntryPoint::GetEapUserData, |_, _| codes::ERROR_PROC_NOT_FOUND)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapabilityUnsupported);

        let err = BufferedCall::default()
            .blob(EntryPoint::GetEapUserData, |_, _| {
                codes::ERROR_CANNOT_FIND_PHONEBOOK_ENTRY
            })
            .unwrap_err();
        assert_eq!(
            err.native_code(),
            Some(codes::ERROR_CANNOT_FIND_PHONEBOOK_ENTRY as i32)
        );
    }

    #[test]
    fn test_blob_truncated_to_reported_size() {
        let blob = BufferedCall::default()
            .blob(EntryPoint::GetCustomAuthData, |buf, size| {
                if buf.len() < 8 {
                    *size = 8;
                    return codes::ERROR_BUFFER_TOO_SMALL;
                }
                buf[..5].copy_from_slice(b"hello");
                *size = 5;
                codes::SUCCESS
            })
            .unwrap();
        assert_eq!(blob.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_empty_blob_is_none() {
        let blob = BufferedCall::default()
            .blob(EntryPoint::GetCustomAuthData, |_, size| {
                *size = 0;
                codes::SUCCESS
            })
            .unwrap();
        assert!(blob.is_none());
    }

    #[test]
    fn test_blob_from_starts_at_initial_size() {
        let mut first = None;
        let blob = BufferedCall::default()
            .blob_from(EntryPoint::GetProjectionInfo, 24, |buf, size| {
                first.get_or_insert(buf.len());
                buf[..4].copy_from_slice(&24u32.to_le_bytes());
                *size = 24;
                codes::SUCCESS
            })
            .unwrap()
            .unwrap();
        assert_eq!(first, Some(24));
        assert_eq!(blob.len(), 24);
    }

    #[test]
    fn test_stamp_record_size() {
        let mut buf = [0u8; 8];
        stamp_record_size(&mut buf, 0x1234);
        assert_eq!(&buf[..4], &[0x34, 0x12, 0, 0]);
        let mut tiny = [0u8; 2];
        stamp_record_size(&mut tiny, 10);
        assert_eq!(tiny, [0, 0]);
    }
}
