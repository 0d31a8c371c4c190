//! Listener and dispatch threads.
//!
//! The listener owns the read half: it decodes frames and is the sole
//! producer into a capacity-1 inbox. The dispatcher drains the inbox and
//! applies each message through the [`MessageHandler`], so inbound
//! processing is serialized per peer.

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};
use wampkit_frame::FrameSource;

use crate::codec::{correlation_hint, decode};
use crate::error::{PeerError, Result};
use crate::handler::MessageHandler;
use crate::message::Message;
use crate::session::{Correlation, Session};

enum Inbound {
    Message(Message),
    Closed(String),
}

/// Join handles for one peer's listener and dispatcher.
pub struct DispatchHandle {
    listener: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl DispatchHandle {
    /// Wait for both threads to exit. A no-op when called from one of them.
    pub fn join(&mut self) {
        let current = thread::current().id();
        for handle in [&mut self.dispatcher, &mut self.listener] {
            let Some(worker) = handle.take() else {
                continue;
            };
            if thread_id(&worker) == current {
                continue;
            }
            let name = worker.thread().name().unwrap_or("wampkit-worker").to_string();
            if worker.join().is_err() {
                warn!(thread = %name, "worker thread panicked");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        [&self.listener, &self.dispatcher]
            .into_iter()
            .all(|handle| handle.as_ref().is_none_or(JoinHandle::is_finished))
    }
}

fn thread_id(handle: &JoinHandle<()>) -> ThreadId {
    handle.thread().id()
}

/// Spawn the listener and dispatcher for `session`.
pub fn spawn(
    session: Arc<Session>,
    handler: Arc<MessageHandler>,
    source: Box<dyn FrameSource>,
) -> Result<DispatchHandle> {
    let (inbox_tx, inbox_rx) = bounded(1);

    let dispatcher = {
        let session = Arc::clone(&session);
        thread::Builder::new()
            .name(format!("wampkit-dispatch-{}", session.name()))
            .spawn(move || dispatch(inbox_rx, session, handler))
            .map_err(|err| PeerError::Connection(format!("failed to spawn dispatcher: {err}")))?
    };

    let listener = {
        let session = Arc::clone(&session);
        thread::Builder::new()
            .name(format!("wampkit-listener-{}", session.name()))
            .spawn(move || listen(source, inbox_tx, session))
            .map_err(|err| PeerError::Connection(format!("failed to spawn listener: {err}")))?
    };

    Ok(DispatchHandle {
        listener: Some(listener),
        dispatcher: Some(dispatcher),
    })
}

fn listen(mut source: Box<dyn FrameSource>, inbox: Sender<Inbound>, session: Arc<Session>) {
    debug!(peer = %session.name(), "listener started");

    let reason = loop {
        match source.recv_text() {
            Ok(Some(text)) => match decode(&text) {
                Ok(message) => {
                    if inbox.send(Inbound::Message(message)).is_err() {
                        break "dispatcher stopped".to_string();
                    }
                }
                Err(err) => reject(&session, &text, err),
            },
            Ok(None) => break "connection closed by remote".to_string(),
            Err(err) => break format!("read failed: {err}"),
        }
    };

    debug!(peer = %session.name(), reason = %reason, "listener stopped");
    if inbox.send(Inbound::Closed(reason.clone())).is_err() {
        session.fail_connection(&reason);
    }
}

fn reject(session: &Session, text: &str, err: PeerError) {
    warn!(peer = %session.name(), error = %err, "rejected inbound frame");
    session.note_rejected(&err);

    if let Some(hint) = correlation_hint(text) {
        session.fail_matching(
            Correlation::Request(hint.request_id),
            hint.code,
            hint.request_type,
            PeerError::Protocol(format!("malformed {} response: {err}", hint.code)),
        );
    }
}

fn dispatch(inbox: Receiver<Inbound>, session: Arc<Session>, handler: Arc<MessageHandler>) {
    for item in inbox.iter() {
        match item {
            Inbound::Message(message) => {
                let code = message.code();
                if let Err(err) = handler.handle(&session, message) {
                    warn!(
                        peer = %session.name(),
                        code = %code,
                        error = %err,
                        "inbound message rejected"
                    );
                    session.note_rejected(&err);
                }
            }
            Inbound::Closed(reason) => {
                session.fail_connection(&reason);
                break;
            }
        }
    }
    debug!(peer = %session.name(), "dispatcher stopped");
}
