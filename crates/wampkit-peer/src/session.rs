//! Session state and request/response correlation.
//!
//! Caller threads register a correlation slot *before* transmitting a
//! request and then block on it with a deadline. The dispatch thread is the
//! only writer of inbound-driven state: it fulfills slots, records
//! registrations and subscriptions, and moves the state machine.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};
use wampkit_frame::{FrameError, FrameSink};

use crate::codec::{MessageCode, MAX_ID};
use crate::error::{PeerError, Result};
use crate::message::Message;
use crate::registry::{PeerId, Registry};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    AwaitingWelcome,
    Established,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::AwaitingWelcome => "awaiting_welcome",
            Self::Established => "established",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of a pending correlation slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Correlation {
    /// A request carrying a request id.
    Request(u64),
    /// HELLO waiting for WELCOME (or ABORT).
    Welcome,
    /// Our GOODBYE waiting for the router's echo.
    Goodbye,
}

impl fmt::Display for Correlation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(id) => write!(f, "request {id}"),
            Self::Welcome => f.write_str("welcome"),
            Self::Goodbye => f.write_str("goodbye"),
        }
    }
}

struct Slot {
    request: MessageCode,
    expected: MessageCode,
    subject: Option<String>,
    outcome: Mutex<Option<Result<Message>>>,
    ready: Condvar,
}

impl Slot {
    /// Store the outcome unless one is already present.
    fn resolve(&self, outcome: Result<Message>) -> bool {
        let mut guard = self.outcome.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(outcome);
        self.ready.notify_all();
        true
    }

    fn accepts(&self, message: &Message) -> bool {
        match message {
            Message::Error(reply) => self.answers(MessageCode::Error, Some(reply.request_type)),
            other => self.answers(other.code(), None),
        }
    }

    fn answers(&self, code: MessageCode, request_type: Option<u64>) -> bool {
        match code {
            MessageCode::Error => request_type == Some(self.request.as_u64()),
            other => other == self.expected,
        }
    }
}

#[derive(Default)]
struct Tables {
    registrations: BTreeMap<u64, String>,
    subscriptions: BTreeMap<u64, String>,
}

/// One session with a router over one frame channel.
pub struct Session {
    name: String,
    realm: String,
    owner: PeerId,
    registry: Arc<Registry>,
    sink: Mutex<Box<dyn FrameSink>>,
    state: Mutex<SessionState>,
    session_id: Mutex<Option<u64>>,
    next_request_id: AtomicU64,
    slots: Mutex<HashMap<Correlation, Arc<Slot>>>,
    tables: Mutex<Tables>,
    tables_changed: Condvar,
    rejected_frames: AtomicU64,
    orphaned_messages: AtomicU64,
    last_rejection: Mutex<Option<String>>,
}

impl Session {
    /// Create an unestablished session writing to `sink`.
    pub fn new(
        name: impl Into<String>,
        realm: impl Into<String>,
        sink: Box<dyn FrameSink>,
        registry: Arc<Registry>,
    ) -> Self {
        let name = name.into();
        let owner = registry.enroll(&name);
        Self {
            name,
            realm: realm.into(),
            owner,
            registry,
            sink: Mutex::new(sink),
            state: Mutex::new(SessionState::Init),
            session_id: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
            tables: Mutex::new(Tables::default()),
            tables_changed: Condvar::new(),
            rejected_frames: AtomicU64::new(0),
            orphaned_messages: AtomicU64::new(0),
            last_rejection: Mutex::new(None),
        }
    }

    /// Peer label used in logs and thread names.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Owner token in the shared registry.
    pub fn owner(&self) -> PeerId {
        self.owner
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_established(&self) -> bool {
        self.state() == SessionState::Established
    }

    /// Router-assigned session id, set on WELCOME.
    pub fn session_id(&self) -> Option<u64> {
        *self.session_id.lock()
    }

    /// Move to `next`, returning the previous state.
    pub(crate) fn set_state(&self, next: SessionState) -> SessionState {
        let mut state = self.state.lock();
        let previous = *state;
        if previous != next {
            debug!(peer = %self.name, from = %previous, to = %next, "session state change");
        }
        *state = next;
        previous
    }

    /// Move to `next` only if the current state is `from`.
    pub(crate) fn transition(&self, from: SessionState, next: SessionState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        debug!(peer = %self.name, from = %from, to = %next, "session state change");
        *state = next;
        true
    }

    /// Record the WELCOME session id and mark the session established.
    pub(crate) fn establish(&self, session_id: u64) -> bool {
        let mut state = self.state.lock();
        if *state != SessionState::AwaitingWelcome {
            return false;
        }
        *self.session_id.lock() = Some(session_id);
        *state = SessionState::Established;
        drop(state);
        info!(peer = %self.name, realm = %self.realm, session_id, "session established");
        true
    }

    /// Next request id, unique among outstanding requests.
    pub fn next_request_id(&self) -> u64 {
        loop {
            let id = self
                .next_request_id
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    Some(if current >= MAX_ID { 1 } else { current + 1 })
                })
                .unwrap_or(1);
            if !self.slots.lock().contains_key(&Correlation::Request(id)) {
                return id;
            }
        }
    }

    /// Encode and transmit one message.
    ///
    /// A transport failure tears the session down.
    pub fn send(&self, message: &Message) -> Result<()> {
        let text = message.to_text()?;
        let outcome = self.sink.lock().send_text(&text);
        match outcome {
            Ok(()) => {
                debug!(
                    peer = %self.name,
                    code = %message.code(),
                    request_id = message.request_id(),
                    "message sent"
                );
                Ok(())
            }
            Err(err @ FrameError::PayloadTooLarge { .. }) => Err(err.into()),
            Err(err) => {
                let reason = format!("send failed: {err}");
                self.fail_connection(&reason);
                Err(PeerError::Connection(reason))
            }
        }
    }

    /// Send a request and open a correlation slot for its response.
    ///
    /// A request id of 0 is replaced with a fresh one. The slot is registered
    /// before the frame leaves, so a fast response cannot be missed.
    pub fn send_request(&self, mut message: Message) -> Result<u64> {
        self.ensure_established()?;

        let expected = message.expected_response().ok_or_else(|| {
            PeerError::Protocol(format!("{} does not expect a response", message.code()))
        })?;
        let request_id = match message.request_id() {
            Some(0) => {
                let id = self.next_request_id();
                message.set_request_id(id);
                id
            }
            Some(id) => id,
            None => {
                return Err(PeerError::Protocol(format!(
                    "{} carries no request id",
                    message.code()
                )))
            }
        };

        let key = Correlation::Request(request_id);
        self.open_slot(key, message.code(), expected, subject_of(&message))?;
        if let Err(err) = self.send(&message) {
            self.discard_slot(key);
            return Err(err);
        }
        Ok(request_id)
    }

    /// Send a message that expects no response, assigning a request id when
    /// it carries one set to 0.
    pub fn send_unacknowledged(&self, mut message: Message) -> Result<Option<u64>> {
        self.ensure_established()?;
        let request_id = match message.request_id() {
            Some(0) => {
                let id = self.next_request_id();
                message.set_request_id(id);
                Some(id)
            }
            other => other,
        };
        self.send(&message)?;
        Ok(request_id)
    }

    /// Block until the response for `request_id` arrives or `timeout` elapses.
    ///
    /// The slot is removed either way; a response arriving later is an orphan.
    pub fn await_response(&self, request_id: u64, timeout: Duration) -> Result<Message> {
        self.await_slot(Correlation::Request(request_id), timeout)
    }

    /// `send_request` followed by `await_response`.
    pub fn send_and_await(&self, message: Message, timeout: Duration) -> Result<Message> {
        let request_id = self.send_request(message)?;
        self.await_response(request_id, timeout)
    }

    pub(crate) fn open_slot(
        &self,
        key: Correlation,
        request: MessageCode,
        expected: MessageCode,
        subject: Option<String>,
    ) -> Result<()> {
        let mut slots = self.slots.lock();
        if slots.contains_key(&key) {
            return Err(PeerError::Protocol(format!("{key} is already pending")));
        }
        slots.insert(
            key,
            Arc::new(Slot {
                request,
                expected,
                subject,
                outcome: Mutex::new(None),
                ready: Condvar::new(),
            }),
        );
        Ok(())
    }

    pub(crate) fn await_slot(&self, key: Correlation, timeout: Duration) -> Result<Message> {
        let slot = self
            .slots
            .lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| PeerError::Protocol(format!("no pending {key}")))?;

        let deadline = Instant::now() + timeout;
        {
            let mut outcome = slot.outcome.lock();
            while outcome.is_none() {
                if slot.ready.wait_until(&mut outcome, deadline).timed_out() {
                    break;
                }
            }
        }

        // Remove under the slots lock so a racing fulfill either lands before
        // this point or finds no slot.
        let outcome = {
            let mut slots = self.slots.lock();
            slots.remove(&key);
            slot.outcome.lock().take()
        };

        match outcome {
            Some(result) => result,
            None => {
                debug!(peer = %self.name, correlation = %key, ?timeout, "request timed out");
                Err(PeerError::Timeout(timeout))
            }
        }
    }

    /// Drop a slot that will never be awaited.
    pub(crate) fn discard_slot(&self, key: Correlation) {
        self.slots.lock().remove(&key);
    }

    /// Name of the procedure or topic a pending `request` was sent for.
    pub(crate) fn pending_subject(&self, key: Correlation, request: MessageCode) -> Option<String> {
        self.slots
            .lock()
            .get(&key)
            .filter(|slot| slot.request == request)
            .and_then(|slot| slot.subject.clone())
    }

    /// Deliver an inbound response to its slot.
    ///
    /// Returns false, and logs an orphan, when no slot is waiting for this
    /// message or the slot expects a different response.
    pub(crate) fn fulfill(&self, key: Correlation, message: Message) -> bool {
        let slots = self.slots.lock();
        let code = message.code();
        let delivered = match slots.get(&key) {
            Some(slot) if slot.accepts(&message) => slot.resolve(Ok(message)),
            Some(slot) => {
                warn!(
                    peer = %self.name,
                    correlation = %key,
                    code = %code,
                    expected = %slot.expected,
                    "response does not match pending request"
                );
                false
            }
            None => false,
        };
        drop(slots);

        if !delivered {
            self.orphaned_messages.fetch_add(1, Ordering::Relaxed);
            debug!(peer = %self.name, correlation = %key, code = %code, "orphan response dropped");
        }
        delivered
    }

    /// Fail one pending slot with `err`.
    pub(crate) fn fail(&self, key: Correlation, err: PeerError) -> bool {
        let slots = self.slots.lock();
        match slots.get(&key) {
            Some(slot) => slot.resolve(Err(err)),
            None => false,
        }
    }

    /// Fail the slot for `key` with `err` if a `code` response (an ERROR for
    /// `request_type`) is what it waits for. Anything else is an orphan.
    pub(crate) fn fail_matching(
        &self,
        key: Correlation,
        code: MessageCode,
        request_type: Option<u64>,
        err: PeerError,
    ) -> bool {
        let slots = self.slots.lock();
        let failed = match slots.get(&key) {
            Some(slot) if slot.answers(code, request_type) => slot.resolve(Err(err)),
            Some(slot) => {
                warn!(
                    peer = %self.name,
                    correlation = %key,
                    code = %code,
                    expected = %slot.expected,
                    "malformed response does not match pending request"
                );
                false
            }
            None => false,
        };
        drop(slots);

        if !failed {
            self.orphaned_messages.fetch_add(1, Ordering::Relaxed);
            debug!(peer = %self.name, correlation = %key, code = %code, "orphan response dropped");
        }
        failed
    }

    /// Tear the session down after a transport failure or a close.
    ///
    /// Every pending slot fails with a connection error, the state becomes
    /// `Closed` and this peer's registry entries are revoked.
    pub fn fail_connection(&self, reason: &str) {
        let previous = self.set_state(SessionState::Closed);
        if !matches!(previous, SessionState::Closing | SessionState::Closed) {
            warn!(peer = %self.name, state = %previous, reason, "session lost");
        }

        let slots = self.slots.lock();
        for slot in slots.values() {
            slot.resolve(Err(PeerError::Connection(reason.to_string())));
        }
        drop(slots);

        self.release();
    }

    /// Revoke registry entries and close the outbound half.
    pub(crate) fn release(&self) {
        self.registry.revoke(self.owner);
        if let Err(err) = self.sink.lock().close() {
            debug!(peer = %self.name, error = %err, "closing frame sink failed");
        }
        let _tables = self.tables.lock();
        self.tables_changed.notify_all();
    }

    pub(crate) fn record_registration(&self, registration_id: u64, procedure: &str) {
        self.registry
            .record_registration(self.owner, registration_id, procedure);
        self.tables
            .lock()
            .registrations
            .insert(registration_id, procedure.to_string());
        self.tables_changed.notify_all();
        info!(peer = %self.name, procedure, registration_id, "procedure registered");
    }

    pub(crate) fn record_subscription(&self, subscription_id: u64, topic: &str) {
        self.registry
            .record_subscription(self.owner, subscription_id, topic);
        self.tables
            .lock()
            .subscriptions
            .insert(subscription_id, topic.to_string());
        self.tables_changed.notify_all();
        info!(peer = %self.name, topic, subscription_id, "topic subscribed");
    }

    /// Registration id → procedure, as acknowledged so far.
    pub fn registrations(&self) -> BTreeMap<u64, String> {
        self.tables.lock().registrations.clone()
    }

    /// Subscription id → topic, as acknowledged so far.
    pub fn subscriptions(&self) -> BTreeMap<u64, String> {
        self.tables.lock().subscriptions.clone()
    }

    /// Block until at least `count` registrations are recorded.
    pub fn wait_for_registrations(&self, count: usize, timeout: Duration) -> Result<()> {
        self.wait_for_tables(timeout, |tables| tables.registrations.len() >= count)
    }

    /// Block until at least `count` subscriptions are recorded.
    pub fn wait_for_subscriptions(&self, count: usize, timeout: Duration) -> Result<()> {
        self.wait_for_tables(timeout, |tables| tables.subscriptions.len() >= count)
    }

    fn wait_for_tables(&self, timeout: Duration, ready: impl Fn(&Tables) -> bool) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut tables = self.tables.lock();
        while !ready(&tables) {
            if self.state() == SessionState::Closed {
                return Err(PeerError::Connection("session closed".to_string()));
            }
            if self
                .tables_changed
                .wait_until(&mut tables, deadline)
                .timed_out()
            {
                return if ready(&tables) {
                    Ok(())
                } else {
                    Err(PeerError::Timeout(timeout))
                };
            }
        }
        Ok(())
    }

    /// Count an inbound frame that could not be handled.
    pub(crate) fn note_rejected(&self, err: &PeerError) {
        self.rejected_frames.fetch_add(1, Ordering::Relaxed);
        *self.last_rejection.lock() = Some(err.to_string());
    }

    /// Inbound frames dropped because they failed to decode or were not allowed.
    pub fn rejected_frames(&self) -> u64 {
        self.rejected_frames.load(Ordering::Relaxed)
    }

    /// Description of the most recent rejected frame.
    pub fn last_rejection(&self) -> Option<String> {
        self.last_rejection.lock().clone()
    }

    /// Responses that arrived with no matching pending request.
    pub fn orphaned_messages(&self) -> u64 {
        self.orphaned_messages.load(Ordering::Relaxed)
    }

    /// Number of requests currently waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.slots.lock().len()
    }

    fn ensure_established(&self) -> Result<()> {
        match self.state() {
            SessionState::Established => Ok(()),
            SessionState::Closed => Err(PeerError::Connection("session is closed".to_string())),
            other => Err(PeerError::NotEstablished(other.as_str())),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("realm", &self.realm)
            .field("owner", &self.owner)
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .finish()
    }
}

fn subject_of(message: &Message) -> Option<String> {
    match message {
        Message::Register(m) => Some(m.procedure.clone()),
        Message::Subscribe(m) => Some(m.topic.clone()),
        Message::Call(m) => Some(m.procedure.clone()),
        _ => None,
    }
}
