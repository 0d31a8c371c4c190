//! Inbound message effects.
//!
//! [`MessageHandler::handle`] is the only place where decoded inbound
//! messages become state transitions, slot fulfillments, procedure
//! invocations and event deliveries. It runs on the dispatch thread.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::codec::MessageCode;
use crate::error::{PeerError, Result};
use crate::message::{
    Abort, Dict, ErrorReply, Event, Goodbye, Invocation, Message, Payload, Welcome, Yield,
};
use crate::session::{Correlation, Session, SessionState};
use crate::uri::{
    is_normal_close, InvocationPolicy, CLOSE_GOODBYE_AND_OUT, ERROR_INVALID_ARGUMENT,
    ERROR_NO_SUCH_REGISTRATION, ERROR_RUNTIME,
};

/// Message kinds a client accepts by default.
pub const DEFAULT_ALLOWED: [MessageCode; 10] = [
    MessageCode::Welcome,
    MessageCode::Abort,
    MessageCode::Goodbye,
    MessageCode::Registered,
    MessageCode::Invocation,
    MessageCode::Yield,
    MessageCode::Result,
    MessageCode::Error,
    MessageCode::Subscribed,
    MessageCode::Event,
];

/// Application failure returned by a local procedure; sent back as ERROR.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureError {
    pub uri: String,
    pub payload: Payload,
}

impl ProcedureError {
    pub fn new(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            payload: Payload::new().arg(message.into()),
        }
    }

    pub fn with_payload(uri: impl Into<String>, payload: Payload) -> Self {
        Self {
            uri: uri.into(),
            payload,
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ERROR_RUNTIME, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ERROR_INVALID_ARGUMENT, message)
    }
}

impl fmt::Display for ProcedureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload.first().and_then(Value::as_str) {
            Some(message) => write!(f, "{}: {message}", self.uri),
            None => f.write_str(&self.uri),
        }
    }
}

impl std::error::Error for ProcedureError {}

/// Callable behind a registered procedure.
pub type ProcedureFn =
    dyn Fn(&Payload) -> std::result::Result<Payload, ProcedureError> + Send + Sync;

/// Callable bound to a subscribed topic.
pub type EventFn = dyn Fn(&Payload) + Send + Sync;

/// A procedure this peer offers as callee.
#[derive(Clone)]
pub struct Procedure {
    pub name: String,
    pub policy: InvocationPolicy,
    pub func: Arc<ProcedureFn>,
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// A topic this peer subscribes to.
#[derive(Clone)]
pub struct Subscription {
    pub topic: String,
    pub handler_name: String,
    pub func: Arc<EventFn>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("handler_name", &self.handler_name)
            .finish_non_exhaustive()
    }
}

/// Applies inbound messages to a session.
pub struct MessageHandler {
    allowed: BTreeSet<MessageCode>,
    procedures: HashMap<String, Procedure>,
    subscriptions: HashMap<String, Subscription>,
}

impl MessageHandler {
    /// Handler with the default allow-list.
    pub fn new(procedures: Vec<Procedure>, subscriptions: Vec<Subscription>) -> Self {
        Self {
            allowed: DEFAULT_ALLOWED.into_iter().collect(),
            procedures: procedures
                .into_iter()
                .map(|procedure| (procedure.name.clone(), procedure))
                .collect(),
            subscriptions: subscriptions
                .into_iter()
                .map(|subscription| (subscription.topic.clone(), subscription))
                .collect(),
        }
    }

    /// Replace the allow-list.
    pub fn with_allowed(mut self, codes: impl IntoIterator<Item = MessageCode>) -> Self {
        self.allowed = codes.into_iter().collect();
        self
    }

    pub fn allows(&self, code: MessageCode) -> bool {
        self.allowed.contains(&code)
    }

    /// Declared procedures, sorted by name.
    pub fn procedures(&self) -> Vec<&Procedure> {
        let mut procedures: Vec<_> = self.procedures.values().collect();
        procedures.sort_by(|a, b| a.name.cmp(&b.name));
        procedures
    }

    /// Declared subscriptions, sorted by topic.
    pub fn subscriptions(&self) -> Vec<&Subscription> {
        let mut subscriptions: Vec<_> = self.subscriptions.values().collect();
        subscriptions.sort_by(|a, b| a.topic.cmp(&b.topic));
        subscriptions
    }

    /// Apply one inbound message. Errors name the offending message and are
    /// never fatal to the dispatch loop.
    pub fn handle(&self, session: &Session, message: Message) -> Result<()> {
        let code = message.code();
        if !self.allows(code) {
            return Err(PeerError::Unhandled(code));
        }

        match message {
            Message::Welcome(welcome) => on_welcome(session, welcome),
            Message::Abort(abort) => {
                on_abort(session, abort);
                Ok(())
            }
            Message::Goodbye(goodbye) => {
                on_goodbye(session, goodbye);
                Ok(())
            }
            Message::Registered(registered) => {
                let key = Correlation::Request(registered.request_id);
                if let Some(procedure) = session.pending_subject(key, MessageCode::Register) {
                    session.record_registration(registered.registration_id, &procedure);
                }
                session.fulfill(key, Message::Registered(registered));
                Ok(())
            }
            Message::Subscribed(subscribed) => {
                let key = Correlation::Request(subscribed.request_id);
                if let Some(topic) = session.pending_subject(key, MessageCode::Subscribe) {
                    session.record_subscription(subscribed.subscription_id, &topic);
                }
                session.fulfill(key, Message::Subscribed(subscribed));
                Ok(())
            }
            Message::Result(result) => {
                session.fulfill(Correlation::Request(result.request_id), Message::Result(result));
                Ok(())
            }
            Message::Error(reply) => {
                session.fulfill(Correlation::Request(reply.request_id), Message::Error(reply));
                Ok(())
            }
            Message::Invocation(invocation) => self.invoke(session, invocation),
            Message::Event(event) => {
                self.deliver(session, event);
                Ok(())
            }
            other => Err(PeerError::Protocol(format!(
                "{} is not valid inbound for a client",
                other.code()
            ))),
        }
    }

    fn invoke(&self, session: &Session, invocation: Invocation) -> Result<()> {
        let Invocation {
            request_id,
            registration_id,
            payload,
            ..
        } = invocation;

        let procedure = session
            .registry()
            .procedure_for(session.owner(), registration_id)
            .and_then(|name| self.procedures.get(&name));

        let reply = match procedure {
            None => {
                warn!(
                    peer = %session.name(),
                    request_id,
                    registration_id,
                    "invocation for unknown registration"
                );
                error_reply(
                    request_id,
                    ProcedureError::new(
                        ERROR_NO_SUCH_REGISTRATION,
                        format!("no procedure registered under id {registration_id}"),
                    ),
                )
            }
            Some(procedure) => {
                debug!(
                    peer = %session.name(),
                    procedure = %procedure.name,
                    request_id,
                    "invoking procedure"
                );
                match catch_unwind(AssertUnwindSafe(|| (procedure.func)(&payload))) {
                    Ok(Ok(result)) => Message::Yield(Yield {
                        request_id,
                        options: Dict::new(),
                        payload: result,
                    }),
                    Ok(Err(err)) => {
                        debug!(
                            procedure = %procedure.name,
                            request_id,
                            error = %err,
                            "procedure returned an error"
                        );
                        error_reply(request_id, err)
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        warn!(
                            peer = %session.name(),
                            procedure = %procedure.name,
                            request_id,
                            panic = %message,
                            "procedure panicked"
                        );
                        error_reply(request_id, ProcedureError::runtime(message))
                    }
                }
            }
        };

        session.send(&reply)
    }

    fn deliver(&self, session: &Session, event: Event) {
        let Some(topic) = session
            .registry()
            .topic_for(session.owner(), event.subscription_id)
        else {
            debug!(
                peer = %session.name(),
                subscription_id = event.subscription_id,
                "event for unknown subscription dropped"
            );
            return;
        };
        let Some(subscription) = self.subscriptions.get(&topic) else {
            warn!(peer = %session.name(), topic = %topic, "no handler bound to topic");
            return;
        };

        debug!(
            peer = %session.name(),
            topic = %topic,
            handler = %subscription.handler_name,
            publication_id = event.publication_id,
            "delivering event"
        );
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (subscription.func)(&event.payload))) {
            warn!(
                peer = %session.name(),
                topic = %topic,
                handler = %subscription.handler_name,
                panic = %panic_message(panic.as_ref()),
                "event handler panicked"
            );
        }
    }
}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandler")
            .field("allowed", &self.allowed)
            .field("procedures", &self.procedures())
            .field("subscriptions", &self.subscriptions())
            .finish()
    }
}

fn on_welcome(session: &Session, welcome: Welcome) -> Result<()> {
    if !session.establish(welcome.session_id) {
        return Err(PeerError::Protocol(format!(
            "WELCOME received in state {}",
            session.state()
        )));
    }
    session.fulfill(Correlation::Welcome, Message::Welcome(welcome));
    Ok(())
}

fn on_abort(session: &Session, abort: Abort) {
    let message = abort
        .details
        .get("message")
        .and_then(Value::as_str)
        .map(|message| format!("{} ({message})", abort.reason))
        .unwrap_or_else(|| abort.reason.clone());

    warn!(peer = %session.name(), reason = %abort.reason, "session aborted by router");
    session.fail(Correlation::Welcome, PeerError::HandshakeFailed(message.clone()));
    session.fail_connection(&format!("session aborted: {message}"));
}

fn on_goodbye(session: &Session, goodbye: Goodbye) {
    if !is_normal_close(&goodbye.reason) {
        warn!(
            peer = %session.name(),
            reason = %goodbye.reason,
            "GOODBYE with unexpected close reason"
        );
    }

    match session.state() {
        SessionState::Closing => {
            session.fulfill(Correlation::Goodbye, Message::Goodbye(goodbye));
        }
        SessionState::Established | SessionState::AwaitingWelcome => {
            info!(peer = %session.name(), reason = %goodbye.reason, "router closed the session");
            session.set_state(SessionState::Closing);
            if let Err(err) = session.send(&Message::goodbye(CLOSE_GOODBYE_AND_OUT)) {
                debug!(peer = %session.name(), error = %err, "GOODBYE reply not sent");
            }
            session.fail_connection(&format!("session closed by router: {}", goodbye.reason));
        }
        SessionState::Init | SessionState::Closed => {
            debug!(peer = %session.name(), "GOODBYE after close ignored");
        }
    }
}

fn error_reply(request_id: u64, err: ProcedureError) -> Message {
    Message::Error(ErrorReply {
        request_type: MessageCode::Invocation.as_u64(),
        request_id,
        details: Dict::new(),
        error: err.uri,
        payload: err.payload,
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "procedure panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use wampkit_frame::{pipe, FrameSource, PipeSource};

    use super::*;
    use crate::codec::decode;
    use crate::message::{CallResult, Registered, Subscribed};
    use crate::registry::Registry;

    fn session() -> (Session, PipeSource) {
        let (local, remote) = pipe();
        let (sink, _source) = local.split();
        let (_remote_sink, remote_source) = remote.split();
        let session = Session::new("handler", "realm1", Box::new(sink), Registry::shared());
        session.set_state(SessionState::AwaitingWelcome);
        session.establish(1);
        (session, remote_source)
    }

    fn echo() -> Procedure {
        Procedure {
            name: "echo".into(),
            policy: InvocationPolicy::Single,
            func: Arc::new(|payload: &Payload| -> std::result::Result<Payload, ProcedureError> {
                Ok(payload.clone())
            }),
        }
    }

    fn invocation(request_id: u64, registration_id: u64, payload: Payload) -> Message {
        Message::Invocation(Invocation {
            request_id,
            registration_id,
            details: Dict::new(),
            payload,
        })
    }

    fn next_reply(rx: &mut PipeSource) -> Message {
        let text = rx.recv_text().expect("recv").expect("frame");
        decode(&text).expect("decode")
    }

    #[test]
    fn disallowed_message_is_named() {
        let (session, _rx) = session();
        let handler = MessageHandler::new(vec![], vec![]).with_allowed([MessageCode::Welcome]);
        let err = handler
            .handle(
                &session,
                Message::Result(CallResult {
                    request_id: 1,
                    details: Dict::new(),
                    payload: Payload::new(),
                }),
            )
            .unwrap_err();
        assert!(matches!(err, PeerError::Unhandled(MessageCode::Result)));
        assert!(err.to_string().contains("RESULT(50)"));
    }

    #[test]
    fn registered_records_procedure_and_fulfills() {
        let (session, _rx) = session();
        let handler = MessageHandler::new(vec![echo()], vec![]);
        let id = session
            .send_request(Message::register("echo", Dict::new()))
            .expect("send");

        handler
            .handle(
                &session,
                Message::Registered(Registered {
                    request_id: id,
                    registration_id: 500,
                }),
            )
            .expect("handle");

        assert_eq!(session.registrations().get(&500).map(String::as_str), Some("echo"));
        assert!(matches!(
            session.await_response(id, std::time::Duration::from_secs(1)),
            Ok(Message::Registered(_))
        ));
    }

    #[test]
    fn invocation_yields_procedure_result() {
        let (session, mut rx) = session();
        let handler = MessageHandler::new(vec![echo()], vec![]);
        session.record_registration(500, "echo");

        handler
            .handle(&session, invocation(9, 500, Payload::new().arg("hi")))
            .expect("handle");

        match next_reply(&mut rx) {
            Message::Yield(reply) => {
                assert_eq!(reply.request_id, 9);
                assert_eq!(reply.payload.first(), Some(&json!("hi")));
            }
            other => panic!("expected YIELD, got {other:?}"),
        }
    }

    #[test]
    fn procedure_error_and_panic_become_error_replies() {
        let (session, mut rx) = session();
        let failing = Procedure {
            name: "fail".into(),
            policy: InvocationPolicy::Single,
            func: Arc::new(|_: &Payload| -> std::result::Result<Payload, ProcedureError> {
                Err(ProcedureError::invalid_argument("bad input"))
            }),
        };
        let panicking = Procedure {
            name: "boom".into(),
            policy: InvocationPolicy::Single,
            func: Arc::new(|_: &Payload| -> std::result::Result<Payload, ProcedureError> {
                panic!("kaboom")
            }),
        };
        let handler = MessageHandler::new(vec![failing, panicking], vec![]);
        session.record_registration(1, "fail");
        session.record_registration(2, "boom");

        handler
            .handle(&session, invocation(10, 1, Payload::new()))
            .expect("handle");
        match next_reply(&mut rx) {
            Message::Error(reply) => {
                assert_eq!(reply.request_type, 68);
                assert_eq!(reply.request_id, 10);
                assert_eq!(reply.error, ERROR_INVALID_ARGUMENT);
                assert_eq!(reply.payload.first(), Some(&json!("bad input")));
            }
            other => panic!("expected ERROR, got {other:?}"),
        }

        handler
            .handle(&session, invocation(11, 2, Payload::new()))
            .expect("handle");
        match next_reply(&mut rx) {
            Message::Error(reply) => {
                assert_eq!(reply.error, ERROR_RUNTIME);
                assert_eq!(reply.payload.first(), Some(&json!("kaboom")));
            }
            other => panic!("expected ERROR, got {other:?}"),
        }
    }

    #[test]
    fn unknown_registration_gets_no_such_registration() {
        let (session, mut rx) = session();
        let handler = MessageHandler::new(vec![echo()], vec![]);

        handler
            .handle(&session, invocation(12, 999, Payload::new()))
            .expect("handle");
        match next_reply(&mut rx) {
            Message::Error(reply) => assert_eq!(reply.error, ERROR_NO_SUCH_REGISTRATION),
            other => panic!("expected ERROR, got {other:?}"),
        }
    }

    #[test]
    fn event_runs_bound_handler_once() {
        let (session, _rx) = session();
        let hits = Arc::new(AtomicUsize::new(0));
        let subscription = Subscription {
            topic: "news".into(),
            handler_name: "on_news".into(),
            func: {
                let hits = Arc::clone(&hits);
                Arc::new(move |payload: &Payload| {
                    assert_eq!(payload.kwargs.get("headline"), Some(&json!("x")));
                    hits.fetch_add(1, Ordering::SeqCst);
                })
            },
        };
        let handler = MessageHandler::new(vec![], vec![subscription]);

        let id = session.send_request(Message::subscribe("news")).expect("send");
        handler
            .handle(
                &session,
                Message::Subscribed(Subscribed {
                    request_id: id,
                    subscription_id: 77,
                }),
            )
            .expect("subscribed");

        let mut kwargs = Dict::new();
        kwargs.insert("headline".into(), json!("x"));
        handler
            .handle(
                &session,
                Message::Event(Event {
                    subscription_id: 77,
                    publication_id: 1,
                    details: Dict::new(),
                    payload: Payload::from_kwargs(kwargs),
                }),
            )
            .expect("event");

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn router_goodbye_is_answered_and_closes() {
        let (session, mut rx) = session();
        let handler = MessageHandler::new(vec![], vec![]);
        let pending = session
            .send_request(Message::call("slow", Payload::new()))
            .expect("send");
        let _call = next_reply(&mut rx);

        handler
            .handle(&session, Message::goodbye("wamp.close.system_shutdown"))
            .expect("handle");

        match next_reply(&mut rx) {
            Message::Goodbye(reply) => assert_eq!(reply.reason, CLOSE_GOODBYE_AND_OUT),
            other => panic!("expected GOODBYE, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.await_response(pending, std::time::Duration::from_secs(1)),
            Err(PeerError::Connection(_))
        ));
    }

    #[test]
    fn welcome_outside_handshake_is_protocol_error() {
        let (session, _rx) = session();
        let handler = MessageHandler::new(vec![], vec![]);
        let err = handler
            .handle(
                &session,
                Message::Welcome(Welcome {
                    session_id: 5,
                    details: Dict::new(),
                }),
            )
            .unwrap_err();
        assert!(matches!(err, PeerError::Protocol(_)));
        assert_eq!(session.session_id(), Some(1));
    }
}
