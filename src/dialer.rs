//! Asynchronous dial state machine
//!
//! A [`RasDialer`] is the reusable, configured dial object. Each dial creates
//! a session that is registered with the [`CallbackBridge`] before the native
//! dial entry point runs, so no progress notification can arrive for a token
//! that is not yet routable.
//!
//! ```text
//! Idle -> Starting -> InProgress -> Connected
//!                               \-> Cancelled | TimedOut | Failed
//! ```
//!
//! Failures after validation are reported only through the completion event.

use crate::bridge::{CallbackBridge, CallbackTarget, Token};
use crate::capability::Capability;
use crate::dispatch::{Dispatcher, InlineDispatcher};
use crate::error::{NativeError, RasError, Result};
use crate::handle::RasHandle;
use crate::marshal::{
    ConnectionState, Credentials, DialExtensions, DialOptions, DialParams, NativeRecord, RasDevice,
};
use crate::native::codes::{self, RASCS_CONNECTED, RASCS_DISCONNECTED};
use crate::native::{
    DialNotification, DialNotificationSink, DialRequest, EntryPoint, NativeApi, RawHandle,
};
use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default wait for the native side to confirm a cancel
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of one dial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialState {
    Idle,
    Starting,
    InProgress,
    Connected,
    Cancelled,
    TimedOut,
    Failed,
}

impl DialState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DialState::Connected | DialState::Cancelled | DialState::TimedOut | DialState::Failed
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, DialState::Starting | DialState::InProgress)
    }
}

/// Progress notification raised on every native phase change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChanged {
    pub state: ConnectionState,
    pub sub_entry: u32,
    pub handle: RawHandle,
    pub extended_error: u32,
}

/// Terminal outcome of a dial, delivered exactly once
#[derive(Debug, Clone)]
pub struct DialCompleted {
    pub connected: bool,
    pub cancelled: bool,
    pub timed_out: bool,
    pub error: Option<RasError>,
    pub handle: Option<RasHandle>,
}

impl DialCompleted {
    pub fn state(&self) -> DialState {
        if self.connected {
            DialState::Connected
        } else if self.cancelled {
            DialState::Cancelled
        } else if self.timed_out {
            DialState::TimedOut
        } else {
            DialState::Failed
        }
    }

    /// Connected handle, or the error the dial ended with
    pub fn into_result(self) -> Result<RasHandle> {
        if self.connected {
            if let Some(handle) = self.handle {
                return Ok(handle);
            }
        }
        Err(self.error.unwrap_or(RasError::Cancelled))
    }
}

enum Outcome {
    Connected,
    Cancelled,
    TimedOut(Duration),
    Failed(RasError),
}

type StateHandler = Arc<dyn Fn(&StateChanged) + Send + Sync>;
type CompletedHandler = Arc<dyn Fn(&DialCompleted) + Send + Sync>;

#[derive(Clone, Default)]
struct Handlers {
    state_changed: Vec<StateHandler>,
    completed: Vec<CompletedHandler>,
}

struct SessionState {
    phase: DialState,
    handle: Option<RasHandle>,
    history: Vec<ConnectionState>,
    cancel_requested: bool,
    completion: Option<DialCompleted>,
    /// Set while the native dial call is running
    dialing: bool,
    /// Notifications that arrived while `dialing`, in arrival order
    pending: Vec<DialNotification>,
}

/// One dial attempt, shared by the dialer, its tickets and its timers
struct DialSession {
    token: Token,
    api: Arc<dyn NativeApi>,
    bridge: Arc<CallbackBridge>,
    dispatcher: Arc<dyn Dispatcher>,
    handlers: Handlers,
    cancel_grace: Duration,
    started: Instant,
    state: Mutex<SessionState>,
    changed: Condvar,
    done_tx: Mutex<Option<oneshot::Sender<DialCompleted>>>,
    done_rx: Shared<oneshot::Receiver<DialCompleted>>,
}

impl DialSession {
    fn new(
        token: Token,
        api: Arc<dyn NativeApi>,
        bridge: Arc<CallbackBridge>,
        dispatcher: Arc<dyn Dispatcher>,
        handlers: Handlers,
        cancel_grace: Duration,
    ) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            token,
            api,
            bridge,
            dispatcher,
            handlers,
            cancel_grace,
            started: Instant::now(),
            state: Mutex::new(SessionState {
                phase: DialState::Starting,
                handle: None,
                history: Vec::new(),
                cancel_requested: false,
                completion: None,
                dialing: true,
                pending: Vec::new(),
            }),
            changed: Condvar::new(),
            done_tx: Mutex::new(Some(tx)),
            done_rx: rx.shared(),
        }
    }

    /// Issue the native dial. The session lock is not held across the call;
    /// notifications delivered before it returns are queued and replayed
    /// once the handle is stored.
    fn begin(self: &Arc<Self>, phonebook: Option<String>, params: Vec<u8>, extensions: Vec<u8>) {
        let sink: Arc<dyn DialNotificationSink> = self.bridge.clone();
        let request = DialRequest {
            phonebook: phonebook.as_deref(),
            extensions: &extensions,
            params: &params,
            callback_id: self.token,
            sink,
        };
        let mut raw: RawHandle = 0;
        let code = self.api.dial(request, &mut raw);

        let (handle, cancel_requested) = {
            let mut state = self.state.lock();
            if raw != 0 {
                state.handle = Some(RasHandle::owned(raw, Arc::clone(&self.api)));
            }
            if code != codes::SUCCESS {
                state.dialing = false;
                state.pending.clear();
            } else if state.completion.is_none() {
                state.phase = DialState::InProgress;
            }
            (state.handle.clone(), state.cancel_requested)
        };
        if code != codes::SUCCESS {
            log::warn!("RasDial rejected token {} with code {}", self.token, code);
            self.finish(Outcome::Failed(NativeError::new(code, EntryPoint::Dial).into()));
            return;
        }
        // A cancel that arrived mid-call had no handle to abort
        if cancel_requested {
            if let Some(handle) = handle {
                log::debug!("aborting dial {} after the native call returned", self.token);
                if let Err(e) = handle.release() {
                    log::warn!("abort of dial {} failed: {}", self.token, e);
                }
            }
        }
        log::debug!("dial {} in progress (handle {:#x})", self.token, raw);

        loop {
            let queued = {
                let mut state = self.state.lock();
                if state.pending.is_empty() {
                    state.dialing = false;
                    break;
                }
                std::mem::take(&mut state.pending)
            };
            for notification in queued {
                self.handle_notification(notification);
            }
        }
    }

    fn snapshot(&self) -> Option<DialCompleted> {
        self.state.lock().completion.clone()
    }

    /// Block until terminal or `deadline`; returns whether the session is terminal
    fn wait_terminal_until(&self, deadline: Instant) -> bool {
        let mut state = self.state.lock();
        while state.completion.is_none() {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.completion.is_some();
            }
        }
        true
    }

    fn spawn_timer<F>(self: &Arc<Self>, name: &str, after: Duration, on_expiry: F)
    where
        F: FnOnce(&DialSession) + Send + 'static,
    {
        let session = Arc::clone(self);
        let deadline = Instant::now() + after;
        let spawned = std::thread::Builder::new()
            .name(format!("{}-{}", name, self.token))
            .spawn(move || {
                if !session.wait_terminal_until(deadline) {
                    on_expiry(&session);
                }
            });
        if let Err(e) = spawned {
            log::error!("failed to start {} timer for dial {}: {}", name, self.token, e);
        }
    }

    fn arm_timeout(self: &Arc<Self>, timeout: Duration) {
        self.spawn_timer("rasdial-timeout", timeout, move |session| {
            session.finish(Outcome::TimedOut(timeout));
        });
    }

    /// Request a native abort. Returns false when the dial already finished.
    fn cancel(self: &Arc<Self>) -> bool {
        let handle = {
            let mut state = self.state.lock();
            if state.completion.is_some() {
                return false;
            }
            if state.cancel_requested {
                return true;
            }
            state.cancel_requested = true;
            state.handle.clone()
        };
        log::info!("cancelling dial {}", self.token);
        match handle {
            Some(handle) => {
                if let Err(e) = handle.release() {
                    log::warn!("abort of dial {} failed: {}", self.token, e);
                }
            }
            None => log::debug!("dial {} has no native handle to abort", self.token),
        }
        self.spawn_timer("rasdial-cancel", self.cancel_grace, |session| {
            log::warn!(
                "dial {} abort not confirmed after {:?}",
                session.token,
                session.cancel_grace
            );
            session.finish(Outcome::Cancelled);
        });
        true
    }

    /// Make the terminal transition. Returns false if another path got there first.
    fn finish(&self, outcome: Outcome) -> bool {
        let completed = {
            let mut state = self.state.lock();
            if state.completion.is_some() {
                return false;
            }
            let handle = state.handle.clone();
            let (phase, completed) = match outcome {
                Outcome::Connected => (
                    DialState::Connected,
                    DialCompleted {
                        connected: true,
                        cancelled: false,
                        timed_out: false,
                        error: None,
                        handle,
                    },
                ),
                Outcome::Cancelled => (
                    DialState::Cancelled,
                    DialCompleted {
                        connected: false,
                        cancelled: true,
                        timed_out: false,
                        error: Some(RasError::Cancelled),
                        handle,
                    },
                ),
                Outcome::TimedOut(budget) => (
                    DialState::TimedOut,
                    DialCompleted {
                        connected: false,
                        cancelled: false,
                        timed_out: true,
                        error: Some(RasError::Timeout(format!(
                            "dial did not complete within {budget:?}"
                        ))),
                        handle,
                    },
                ),
                Outcome::Failed(error) => (
                    DialState::Failed,
                    DialCompleted {
                        connected: false,
                        cancelled: false,
                        timed_out: false,
                        error: Some(error),
                        handle,
                    },
                ),
            };
            state.phase = phase;
            state.completion = Some(completed.clone());
            completed
        };
        self.changed.notify_all();
        self.bridge.unregister(self.token);
        self.api.release_dial_routing(self.token);

        let phase = completed.state();
        log::info!(
            "dial {} finished {:?} after {:?}",
            self.token,
            phase,
            self.started.elapsed()
        );
        // A failed or timed-out dial still holds the native port
        if matches!(phase, DialState::Failed | DialState::TimedOut) {
            if let Some(handle) = &completed.handle {
                if let Err(e) = handle.release() {
                    log::debug!("releasing handle of dial {}: {}", self.token, e);
                }
            }
        }

        if let Some(tx) = self.done_tx.lock().take() {
            let _ = tx.send(completed.clone());
        }
        let handlers = self.handlers.completed.clone();
        if !handlers.is_empty() {
            self.dispatcher.dispatch(Box::new(move || {
                for handler in &handlers {
                    handler(&completed);
                }
            }));
        }
        true
    }

    fn progress(&self, notification: DialNotification, state: ConnectionState) {
        {
            let mut session = self.state.lock();
            if session.completion.is_some() {
                return;
            }
            session.phase = DialState::InProgress;
            session.history.push(state);
        }
        self.changed.notify_all();
        log::debug!("dial {} -> {}", self.token, state);

        let handlers = self.handlers.state_changed.clone();
        if !handlers.is_empty() {
            let event = StateChanged {
                state,
                sub_entry: notification.sub_entry,
                handle: notification.handle,
                extended_error: notification.extended_error,
            };
            self.dispatcher.dispatch(Box::new(move || {
                for handler in &handlers {
                    handler(&event);
                }
            }));
        }
    }

    fn handle_notification(&self, notification: DialNotification) {
        let (cancel_requested, aborted) = {
            let state = self.state.lock();
            if state.completion.is_some() {
                log::warn!(
                    "late notification for finished dial {} (state {:#x})",
                    self.token,
                    notification.state
                );
                return;
            }
            let aborted = state.handle.as_ref().map_or(true, |h| !h.is_valid());
            (state.cancel_requested, aborted)
        };

        if notification.error != 0 {
            let error: RasError = NativeError::new(notification.error, EntryPoint::Dial).into();
            let outcome = match error {
                RasError::Cancelled => Outcome::Cancelled,
                _ if cancel_requested => Outcome::Cancelled,
                error => Outcome::Failed(error),
            };
            self.finish(outcome);
            return;
        }

        match notification.state {
            RASCS_CONNECTED => {
                if cancel_requested && aborted {
                    log::info!(
                        "dial {} connected after its handle was aborted; reporting cancelled",
                        self.token
                    );
                    self.finish(Outcome::Cancelled);
                } else {
                    if cancel_requested {
                        log::info!("dial {} connected before the abort took effect", self.token);
                    }
                    self.finish(Outcome::Connected);
                }
            }
            RASCS_DISCONNECTED => {
                let outcome = if cancel_requested {
                    Outcome::Cancelled
                } else {
                    Outcome::Failed(
                        NativeError::new(codes::ERROR_NO_CONNECTION, EntryPoint::Dial).into(),
                    )
                };
                self.finish(outcome);
            }
            raw => self.progress(notification, ConnectionState::from_raw(raw)),
        }
    }
}

impl CallbackTarget for DialSession {
    fn on_notification(&self, notification: DialNotification) {
        {
            let mut state = self.state.lock();
            if state.dialing {
                log::trace!(
                    "dial {} queued notification (state {:#x}) during the native call",
                    self.token,
                    notification.state
                );
                state.pending.push(notification);
                return;
            }
        }
        self.handle_notification(notification);
    }
}

/// Caller's view of one dial
#[derive(Clone)]
pub struct DialTicket {
    session: Arc<DialSession>,
}

impl fmt::Debug for DialTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialTicket")
            .field("token", &self.session.token)
            .field("state", &self.state())
            .finish()
    }
}

impl DialTicket {
    pub fn token(&self) -> Token {
        self.session.token
    }

    pub fn state(&self) -> DialState {
        self.session.state.lock().phase
    }

    /// Most recent native phase
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.session.state.lock().history.last().copied()
    }

    /// Every native phase reported so far, in order
    pub fn history(&self) -> Vec<ConnectionState> {
        self.session.state.lock().history.clone()
    }

    pub fn handle(&self) -> Option<RasHandle> {
        self.session.state.lock().handle.clone()
    }

    pub fn is_done(&self) -> bool {
        self.session.state.lock().completion.is_some()
    }

    /// Request cancellation. The terminal state arrives through completion;
    /// returns false when the dial had already finished.
    pub fn cancel(&self) -> bool {
        self.session.cancel()
    }

    /// Block until the dial is terminal
    pub fn wait(&self) -> DialCompleted {
        let mut state = self.session.state.lock();
        loop {
            if let Some(completed) = &state.completion {
                return completed.clone();
            }
            self.session.changed.wait(&mut state);
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<DialCompleted> {
        if self.session.wait_terminal_until(Instant::now() + timeout) {
            self.session.snapshot()
        } else {
            None
        }
    }

    /// Block until `target` has been reported. Returns false when the dial
    /// ends or `timeout` elapses first.
    pub fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.session.state.lock();
        loop {
            if state.history.contains(&target) {
                return true;
            }
            if state.completion.is_some() {
                return false;
            }
            if self
                .session
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.history.contains(&target);
            }
        }
    }

    /// Resolves once the dial is terminal; usable from any executor
    pub async fn completed(&self) -> DialCompleted {
        match self.session.done_rx.clone().await {
            Ok(completed) => completed,
            Err(_) => self.session.snapshot().unwrap_or(DialCompleted {
                connected: false,
                cancelled: true,
                timed_out: false,
                error: Some(RasError::Cancelled),
                handle: None,
            }),
        }
    }
}

/// Reusable dial configuration and session owner
pub struct RasDialer {
    pub entry_name: String,
    pub phonebook: Option<PathBuf>,
    pub phone_number: String,
    pub callback_number: String,
    /// Device to report the dial against; entries carry their own
    pub device: Option<RasDevice>,
    pub credentials: Option<Credentials>,
    pub sub_entry: u32,
    pub options: DialOptions,
    pub skip_ppp_auth: bool,
    pub if_index: u32,
    pub timeout: Option<Duration>,
    pub cancel_grace: Duration,

    api: Arc<dyn NativeApi>,
    capability: Capability,
    bridge: Arc<CallbackBridge>,
    dispatcher: Arc<dyn Dispatcher>,
    handlers: Mutex<Handlers>,
    active: Mutex<Option<Arc<DialSession>>>,
}

impl RasDialer {
    pub fn new(api: Arc<dyn NativeApi>, capability: Capability, bridge: Arc<CallbackBridge>) -> Self {
        Self {
            entry_name: String::new(),
            phonebook: None,
            phone_number: String::new(),
            callback_number: String::new(),
            device: None,
            credentials: None,
            sub_entry: 0,
            options: DialOptions::default(),
            skip_ppp_auth: false,
            if_index: 0,
            timeout: None,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            api,
            capability,
            bridge,
            dispatcher: Arc::new(InlineDispatcher),
            handlers: Mutex::new(Handlers::default()),
            active: Mutex::new(None),
        }
    }

    /// Deliver events through `dispatcher` instead of inline
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn set_dispatcher(&mut self, dispatcher: Arc<dyn Dispatcher>) {
        self.dispatcher = dispatcher;
    }

    pub fn with_entry(mut self, name: impl Into<String>, phonebook: Option<PathBuf>) -> Self {
        self.entry_name = name.into();
        self.phonebook = phonebook;
        self
    }

    pub fn with_phone_number(mut self, number: impl Into<String>) -> Self {
        self.phone_number = number.into();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_state_changed<F>(&self, handler: F)
    where
        F: Fn(&StateChanged) + Send + Sync + 'static,
    {
        self.handlers.lock().state_changed.push(Arc::new(handler));
    }

    pub fn on_completed<F>(&self, handler: F)
    where
        F: Fn(&DialCompleted) + Send + Sync + 'static,
    {
        self.handlers.lock().completed.push(Arc::new(handler));
    }

    /// Check that the configuration names something dialable
    pub fn validate(&self) -> Result<()> {
        let has_entry = !self.entry_name.trim().is_empty()
            && self
                .phonebook
                .as_ref()
                .is_some_and(|p| !p.as_os_str().is_empty());
        let has_number = !self.phone_number.trim().is_empty();
        if !has_entry && !has_number {
            return Err(RasError::InvalidConfiguration(
                "dial needs an entry name with a phonebook path, or a phone number".to_string(),
            ));
        }
        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(RasError::InvalidConfiguration(
                    "dial timeout must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn dial_params(&self, token: Token) -> DialParams {
        let credentials = self.credentials.clone().unwrap_or_default();
        DialParams {
            entry_name: self.entry_name.clone(),
            phone_number: self.phone_number.clone(),
            callback_number: self.callback_number.clone(),
            user_name: credentials.user_name.unwrap_or_default(),
            password: credentials.password.unwrap_or_default(),
            domain: credentials.domain.unwrap_or_default(),
            sub_entry: self.sub_entry,
            callback_id: token,
            if_index: self.if_index,
        }
    }

    /// Start a dial and return once the native call has been issued.
    ///
    /// # Errors
    /// Only configuration problems and `OperationAlreadyInProgress`; native
    /// failures arrive through the ticket.
    pub fn dial_async(&self) -> Result<DialTicket> {
        self.validate()?;
        let mut active = self.active.lock();
        if let Some(session) = active.as_ref() {
            if session.state.lock().phase.is_active() {
                return Err(RasError::OperationAlreadyInProgress(format!(
                    "dial {} is still running",
                    session.token
                )));
            }
        }

        let token = self.bridge.next_token();
        let params = self.dial_params(token).encode(self.capability)?;
        let extensions = DialExtensions {
            options: self.options,
            skip_ppp_auth: self.skip_ppp_auth,
        }
        .encode(self.capability)?;
        let phonebook = self
            .phonebook
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());

        let session = Arc::new(DialSession::new(
            token,
            Arc::clone(&self.api),
            Arc::clone(&self.bridge),
            Arc::clone(&self.dispatcher),
            self.handlers.lock().clone(),
            self.cancel_grace,
        ));
        let target: Arc<dyn CallbackTarget> = session.clone();
        self.bridge.register(token, Arc::downgrade(&target));
        *active = Some(Arc::clone(&session));
        drop(active);

        log::info!(
            "dialing '{}'{} (token {})",
            if self.entry_name.is_empty() { &self.phone_number } else { &self.entry_name },
            self.device
                .as_ref()
                .map(|d| format!(" via {}", d.name))
                .unwrap_or_default(),
            token
        );
        session.begin(phonebook, params, extensions);
        if let Some(timeout) = self.timeout {
            if !session.state.lock().phase.is_terminal() {
                session.arm_timeout(timeout);
            }
        }
        Ok(DialTicket { session })
    }

    /// Dial and block until the connection is up or the dial ends
    pub fn dial(&self) -> Result<RasHandle> {
        self.dial_async()?.wait().into_result()
    }

    pub fn current_state(&self) -> DialState {
        self.active
            .lock()
            .as_ref()
            .map_or(DialState::Idle, |s| s.state.lock().phase)
    }

    pub fn is_busy(&self) -> bool {
        self.current_state().is_active()
    }

    /// Ticket of the most recent dial
    pub fn ticket(&self) -> Option<DialTicket> {
        self.active.lock().as_ref().map(|session| DialTicket {
            session: Arc::clone(session),
        })
    }

    /// Cancel the running dial, if any
    pub fn cancel(&self) -> bool {
        let session = self.active.lock().clone();
        session.is_some_and(|s| s.cancel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::EventLoop;
    use crate::marshal::{Entry, VpnStrategy};
    use crate::native::simulated::{DialScript, SimulatedRas};
    use crate::error::ErrorKind;

    const PHONEBOOK: &str = "test.pbk";

    fn setup(script: DialScript) -> (Arc<SimulatedRas>, RasDialer) {
        let sim = Arc::new(SimulatedRas::default());
        sim.insert_entry(
            Some(PHONEBOOK),
            Entry::vpn("Office", "vpn.example.com", VpnStrategy::Default),
        );
        sim.set_dial_script(script);
        let capability = sim.capability();
        let dialer = RasDialer::new(sim.clone(), capability, Arc::new(CallbackBridge::new()))
            .with_entry("Office", Some(PathBuf::from(PHONEBOOK)))
            .with_credentials(Credentials::new("alice", "s3cret"));
        (sim, dialer)
    }

    #[test]
    fn test_dial_connects() {
        let (_sim, dialer) = setup(DialScript::connect(Duration::from_millis(2)));
        let ticket = dialer.dial_async().unwrap();
        let completed = ticket.wait();
        assert!(completed.connected);
        assert!(!completed.cancelled);
        assert!(completed.error.is_none());
        assert_eq!(ticket.state(), DialState::Connected);
        assert_eq!(dialer.current_state(), DialState::Connected);

        let history = ticket.history();
        let pos = |s| history.iter().position(|h| *h == s).unwrap();
        assert!(pos(ConnectionState::DeviceConnected) < pos(ConnectionState::Authenticate));
        assert!(completed.handle.unwrap().is_valid());
    }

    #[test]
    fn test_blocking_dial_returns_handle() {
        let (sim, dialer) = setup(DialScript::connect(Duration::from_millis(1)));
        let handle = dialer.dial().unwrap();
        assert!(sim.is_connected(handle.raw().unwrap()));
    }

    #[test]
    fn test_cancel_after_device_connected() {
        let (sim, dialer) = setup(DialScript::connect(Duration::from_millis(50)));
        let ticket = dialer.dial_async().unwrap();
        assert!(ticket.wait_for_state(ConnectionState::DeviceConnected, Duration::from_secs(5)));
        assert!(ticket.cancel());

        let completed = ticket.wait_timeout(Duration::from_secs(5)).unwrap();
        assert!(completed.cancelled);
        assert!(!completed.connected);
        assert_eq!(completed.error.as_ref().map(RasError::kind), Some(ErrorKind::Cancelled));
        assert_eq!(sim.call_count(EntryPoint::HangUp), 1);
        assert!(!ticket.cancel());
    }

    #[test]
    fn test_unconfirmed_cancel_finishes_after_grace() {
        let (sim, mut dialer) = setup(DialScript::no_response());
        sim.set_abort_confirms(false);
        dialer.cancel_grace = Duration::from_millis(50);
        let ticket = dialer.dial_async().unwrap();
        assert!(ticket.cancel());
        let completed = ticket.wait_timeout(Duration::from_secs(5)).unwrap();
        assert!(completed.cancelled);
    }

    #[test]
    fn test_unconfirmed_cancel_releases_notification_route() {
        let (sim, mut dialer) = setup(DialScript::no_response());
        sim.set_abort_confirms(false);
        dialer.cancel_grace = Duration::from_millis(50);
        let ticket = dialer.dial_async().unwrap();
        assert_eq!(sim.routed_dials(), 1);
        assert!(ticket.cancel());
        assert!(ticket.wait_timeout(Duration::from_secs(5)).unwrap().cancelled);
        assert_eq!(sim.routed_dials(), 0);
    }

    #[test]
    fn test_timed_out_dial_releases_notification_route() {
        let (sim, dialer) = setup(DialScript::no_response());
        sim.set_abort_confirms(false);
        let dialer = dialer.with_timeout(Duration::from_millis(50));
        let completed = dialer.dial_async().unwrap().wait();
        assert!(completed.timed_out);
        assert_eq!(sim.routed_dials(), 0);
    }

    #[test]
    fn test_connected_after_abort_reports_cancelled() {
        let bridge = Arc::new(CallbackBridge::new());
        let sim = Arc::new(SimulatedRas::default());
        sim.insert_entry(Some(PHONEBOOK), Entry::new("Office"));
        sim.set_dial_script(DialScript::no_response());
        sim.set_abort_confirms(false);
        let mut dialer = RasDialer::new(sim.clone(), sim.capability(), Arc::clone(&bridge))
            .with_entry("Office", Some(PathBuf::from(PHONEBOOK)));
        dialer.cancel_grace = Duration::from_secs(30);
        let ticket = dialer.dial_async().unwrap();
        assert!(ticket.cancel());
        let handle = ticket.handle().unwrap();
        assert!(!handle.is_valid());

        bridge.notify(DialNotification {
            callback_id: ticket.token(),
            sub_entry: 1,
            handle: handle.id(),
            state: RASCS_CONNECTED,
            error: 0,
            extended_error: 0,
        });
        let completed = ticket.wait_timeout(Duration::from_secs(1)).unwrap();
        assert!(completed.cancelled);
        assert!(!completed.connected);
        assert_eq!(
            completed.into_result().unwrap_err().kind(),
            ErrorKind::Cancelled
        );
    }

    #[test]
    fn test_notification_during_native_call_does_not_deadlock() {
        let (sim, dialer) = setup(DialScript::connect(Duration::from_millis(1)));
        sim.set_inline_notification(true);
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let ticket = dialer.dial_async().unwrap();
            let completed = ticket.wait_timeout(Duration::from_secs(5));
            let _ = tx.send((completed, ticket.history()));
        });
        let (completed, history) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(completed.unwrap().connected);
        assert_eq!(history.first(), Some(&ConnectionState::OpenPort));
    }

    #[test]
    fn test_cancel_from_replayed_notification() {
        let bridge = Arc::new(CallbackBridge::new());
        let sim = Arc::new(SimulatedRas::default());
        sim.insert_entry(Some(PHONEBOOK), Entry::new("Office"));
        sim.set_dial_script(DialScript::no_response());
        sim.set_inline_notification(true);
        let dialer = Arc::new(
            RasDialer::new(sim.clone(), sim.capability(), Arc::clone(&bridge))
                .with_entry("Office", Some(PathBuf::from(PHONEBOOK))),
        );
        // The queued OpenPort is replayed inside dial_async
        let weak = Arc::downgrade(&dialer);
        dialer.on_state_changed(move |_| {
            if let Some(dialer) = weak.upgrade() {
                dialer.cancel();
            }
        });
        let ticket = dialer.dial_async().unwrap();
        let completed = ticket.wait_timeout(Duration::from_secs(5)).unwrap();
        assert!(completed.cancelled);
        assert_eq!(sim.call_count(EntryPoint::HangUp), 1);
        assert_eq!(sim.routed_dials(), 0);
    }

    #[test]
    fn test_ticket_debug_names_token() {
        let (_sim, dialer) = setup(DialScript::connect(Duration::from_millis(1)));
        let ticket = dialer.dial_async().unwrap();
        ticket.wait();
        let text = format!("{ticket:?}");
        assert!(text.contains(&format!("token: {}", ticket.token())));
        assert!(text.contains("Connected"));
    }

    #[test]
    fn test_timeout_without_response() {
        let (sim, dialer) = setup(DialScript::no_response());
        let dialer = dialer
            .with_entry("", None)
            .with_phone_number("vpn.unresolved.example.com")
            .with_timeout(Duration::from_millis(2000));

        let started = Instant::now();
        let completed = dialer.dial_async().unwrap().wait();
        let elapsed = started.elapsed();
        assert!(completed.timed_out);
        assert_eq!(completed.state(), DialState::TimedOut);
        assert_eq!(completed.error.as_ref().map(RasError::kind), Some(ErrorKind::Timeout));
        assert!(elapsed >= Duration::from_millis(2000));
        assert!(elapsed < Duration::from_millis(3000));
        // The native dial was aborted
        assert_eq!(sim.call_count(EntryPoint::HangUp), 1);
    }

    #[test]
    fn test_nothing_to_dial_is_rejected_before_native_call() {
        let (sim, dialer) = setup(DialScript::default());
        let dialer = dialer.with_entry("", None).with_phone_number("");
        let err = dialer.dial_async().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        assert_eq!(sim.call_count(EntryPoint::Dial), 0);
        assert_eq!(dialer.current_state(), DialState::Idle);
    }

    #[test]
    fn test_second_dial_while_active_fails_fast() {
        let (sim, dialer) = setup(DialScript::no_response());
        let first = dialer.dial_async().unwrap();
        let err = dialer.dial_async().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationAlreadyInProgress);
        assert_eq!(sim.call_count(EntryPoint::Dial), 1);
        assert_eq!(first.state(), DialState::InProgress);
        assert!(dialer.is_busy());
        first.cancel();
        first.wait();
    }

    #[test]
    fn test_native_failure_reported_through_completion() {
        let (_sim, dialer) = setup(DialScript::fail(
            Duration::from_millis(1),
            codes::ERROR_AUTHENTICATION_FAILURE,
        ));
        let completed = dialer.dial_async().unwrap().wait();
        assert_eq!(completed.state(), DialState::Failed);
        assert_eq!(
            completed.error.unwrap().native_code(),
            Some(codes::ERROR_AUTHENTICATION_FAILURE as i32)
        );
    }

    #[test]
    fn test_synchronous_native_rejection_is_a_completion() {
        let (_sim, dialer) = setup(DialScript::default());
        let dialer = dialer.with_entry("Missing", Some(PathBuf::from(PHONEBOOK)));
        let ticket = dialer.dial_async().unwrap();
        let completed = ticket.wait();
        assert_eq!(completed.state(), DialState::Failed);
        assert!(!dialer.is_busy());
    }

    #[test]
    fn test_late_callback_after_completion_is_ignored() {
        let bridge = Arc::new(CallbackBridge::new());
        let sim = Arc::new(SimulatedRas::default());
        sim.insert_entry(Some(PHONEBOOK), Entry::new("Office"));
        sim.set_dial_script(DialScript::connect(Duration::from_millis(1)));
        let dialer = RasDialer::new(sim.clone(), sim.capability(), Arc::clone(&bridge))
            .with_entry("Office", Some(PathBuf::from(PHONEBOOK)));
        let ticket = dialer.dial_async().unwrap();
        let completed = ticket.wait();
        assert!(completed.connected);
        assert!(bridge.is_empty());

        bridge.notify(DialNotification {
            callback_id: ticket.token(),
            sub_entry: 1,
            handle: 0,
            state: RASCS_DISCONNECTED,
            error: codes::ERROR_USER_DISCONNECTION,
            extended_error: 0,
        });
        assert_eq!(ticket.state(), DialState::Connected);
    }

    #[test]
    fn test_events_are_redelivered_through_dispatcher() {
        let (_sim, dialer) = setup(DialScript::connect(Duration::from_millis(1)));
        let mut events = EventLoop::new();
        let dialer = dialer.with_dispatcher(Arc::new(events.dispatcher()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(Mutex::new(None));
        {
            let seen = Arc::clone(&seen);
            dialer.on_state_changed(move |e| {
                seen.lock().push((e.state, std::thread::current().id()))
            });
            let done = Arc::clone(&done);
            dialer.on_completed(move |c| *done.lock() = Some(c.connected));
        }

        let ticket = dialer.dial_async().unwrap();
        ticket.wait();
        // Nothing ran until the owning thread drained its loop
        assert!(done.lock().is_none());
        assert!(events.run_until(Duration::from_secs(2), || done.lock().is_some()));
        assert_eq!(*done.lock(), Some(true));

        let owner = std::thread::current().id();
        let seen = seen.lock();
        assert_eq!(seen.len(), ticket.history().len());
        assert!(seen.iter().all(|(_, thread)| *thread == owner));
    }

    #[test]
    fn test_completed_future_without_runtime() {
        let (_sim, dialer) = setup(DialScript::connect(Duration::from_millis(1)));
        let ticket = dialer.dial_async().unwrap();
        let completed = futures::executor::block_on(ticket.completed());
        assert!(completed.connected);
    }

    #[cfg(feature = "tokio-runtime")]
    #[tokio::test]
    async fn test_completed_future_on_tokio() {
        let (_sim, dialer) = setup(DialScript::connect(Duration::from_millis(1)));
        let ticket = dialer.dial_async().unwrap();
        let completed = tokio::time::timeout(Duration::from_secs(5), ticket.completed())
            .await
            .unwrap();
        assert!(completed.into_result().is_ok());
    }
}
