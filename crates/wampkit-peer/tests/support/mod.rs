//! In-process router for integration tests.
//!
//! Speaks just enough of the router side of the protocol over in-memory
//! pipes: session open/close, REGISTER/CALL/YIELD routing between
//! attached clients, and SUBSCRIBE/PUBLISH fan-out. The session id handed
//! out in WELCOME doubles as the connection id for `inject` and `drop_link`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use wampkit_frame::{pipe, FrameSink, FrameSource, PipeSink, PipeSource};
use wampkit_peer::message::{
    Abort, CallResult, ErrorReply, Event, Invocation, Registered, Subscribed, Welcome,
};
use wampkit_peer::{
    decode, Client, ClientBuilder, Dict, Message, MessageCode, CLOSE_GOODBYE_AND_OUT,
};

pub const REALM: &str = "realm1";

#[derive(Default)]
struct Routes {
    links: HashMap<u64, PipeSink>,
    registrations: HashMap<String, Vec<(u64, u64)>>,
    subscriptions: HashMap<String, Vec<(u64, u64)>>,
    // invocation request id -> (caller link, call request id)
    pending: HashMap<u64, (u64, u64)>,
    received: Vec<(u64, MessageCode)>,
}

#[derive(Default)]
struct Behavior {
    abort: Option<String>,
    echo_goodbye: bool,
}

pub struct MockRouter {
    routes: Arc<Mutex<Routes>>,
    behavior: Arc<Behavior>,
    ids: Arc<AtomicU64>,
}

impl MockRouter {
    pub fn new() -> Self {
        Self::with_behavior(Behavior {
            abort: None,
            echo_goodbye: true,
        })
    }

    /// A router that answers every HELLO with ABORT.
    pub fn aborting(reason: &str) -> Self {
        Self::with_behavior(Behavior {
            abort: Some(reason.to_string()),
            echo_goodbye: true,
        })
    }

    /// A router that never echoes GOODBYE.
    pub fn silent_on_goodbye() -> Self {
        Self::with_behavior(Behavior {
            abort: None,
            echo_goodbye: false,
        })
    }

    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            routes: Arc::new(Mutex::new(Routes::default())),
            behavior: Arc::new(behavior),
            ids: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Attach a new link and return the client's halves.
    pub fn link(&self) -> (PipeSink, PipeSource) {
        let (client_end, router_end) = pipe();
        let (router_sink, router_source) = router_end.split();
        let link_id = self.ids.fetch_add(1, Ordering::SeqCst);
        self.routes.lock().links.insert(link_id, router_sink);

        let routes = Arc::clone(&self.routes);
        let behavior = Arc::clone(&self.behavior);
        let ids = Arc::clone(&self.ids);
        thread::Builder::new()
            .name(format!("mock-router-{link_id}"))
            .spawn(move || serve(link_id, router_source, routes, behavior, ids))
            .expect("spawn mock router link");

        client_end.split()
    }

    /// Attach a client built from `builder`.
    pub fn attach(&self, builder: ClientBuilder) -> Client {
        let (sink, source) = self.link();
        builder
            .realm(REALM)
            .attach(Box::new(sink), Box::new(source))
            .expect("attach client")
    }

    /// Attach and start a client.
    pub fn start(&self, builder: ClientBuilder) -> Client {
        let client = self.attach(builder);
        client.start().expect("start client");
        client
    }

    /// Send a raw frame to the client on `link_id`.
    pub fn inject(&self, link_id: u64, text: &str) {
        let mut routes = self.routes.lock();
        let sink = routes.links.get_mut(&link_id).expect("link is open");
        sink.send_text(text).expect("inject frame");
    }

    /// Hang up on `link_id` as if the transport dropped.
    pub fn drop_link(&self, link_id: u64) {
        let mut routes = self.routes.lock();
        forget(&mut routes, link_id);
    }

    /// Message codes received from `link_id`, in order.
    pub fn received_from(&self, link_id: u64) -> Vec<MessageCode> {
        self.routes
            .lock()
            .received
            .iter()
            .filter(|(link, _)| *link == link_id)
            .map(|(_, code)| *code)
            .collect()
    }

    pub fn registration_count(&self, procedure: &str) -> usize {
        self.routes
            .lock()
            .registrations
            .get(procedure)
            .map_or(0, Vec::len)
    }
}

fn forget(routes: &mut Routes, link_id: u64) {
    routes.links.remove(&link_id);
    for owners in routes.registrations.values_mut() {
        owners.retain(|(link, _)| *link != link_id);
    }
    for owners in routes.subscriptions.values_mut() {
        owners.retain(|(link, _)| *link != link_id);
    }
}

fn send_to(routes: &mut Routes, link_id: u64, message: &Message) {
    let text = message.to_text().expect("encode router message");
    if let Some(sink) = routes.links.get_mut(&link_id) {
        let _ = sink.send_text(&text);
    }
}

fn serve(
    link_id: u64,
    mut source: PipeSource,
    routes: Arc<Mutex<Routes>>,
    behavior: Arc<Behavior>,
    ids: Arc<AtomicU64>,
) {
    while let Ok(Some(text)) = source.recv_text() {
        let Ok(message) = decode(&text) else {
            continue;
        };
        let mut routes = routes.lock();
        routes.received.push((link_id, message.code()));

        match message {
            Message::Hello(_) => {
                let reply = match &behavior.abort {
                    Some(reason) => Message::Abort(Abort {
                        details: Dict::new(),
                        reason: reason.clone(),
                    }),
                    None => Message::Welcome(Welcome {
                        session_id: link_id,
                        details: Dict::new(),
                    }),
                };
                send_to(&mut routes, link_id, &reply);
            }
            Message::Register(register) => {
                let registration_id = ids.fetch_add(1, Ordering::SeqCst);
                routes
                    .registrations
                    .entry(register.procedure)
                    .or_default()
                    .push((link_id, registration_id));
                let reply = Message::Registered(Registered {
                    request_id: register.request_id,
                    registration_id,
                });
                send_to(&mut routes, link_id, &reply);
            }
            Message::Subscribe(subscribe) => {
                let subscription_id = ids.fetch_add(1, Ordering::SeqCst);
                routes
                    .subscriptions
                    .entry(subscribe.topic)
                    .or_default()
                    .push((link_id, subscription_id));
                let reply = Message::Subscribed(Subscribed {
                    request_id: subscribe.request_id,
                    subscription_id,
                });
                send_to(&mut routes, link_id, &reply);
            }
            Message::Call(call) => {
                let callee = routes
                    .registrations
                    .get(&call.procedure)
                    .and_then(|owners| owners.first().copied());
                match callee {
                    Some((callee_link, registration_id)) => {
                        let invocation_id = ids.fetch_add(1, Ordering::SeqCst);
                        routes
                            .pending
                            .insert(invocation_id, (link_id, call.request_id));
                        let invocation = Message::Invocation(Invocation {
                            request_id: invocation_id,
                            registration_id,
                            details: Dict::new(),
                            payload: call.payload,
                        });
                        send_to(&mut routes, callee_link, &invocation);
                    }
                    None => {
                        let reply = Message::Error(ErrorReply {
                            request_type: MessageCode::Call.as_u64(),
                            request_id: call.request_id,
                            details: Dict::new(),
                            error: "wamp.error.no_such_procedure".to_string(),
                            payload: Default::default(),
                        });
                        send_to(&mut routes, link_id, &reply);
                    }
                }
            }
            Message::Yield(reply) => {
                if let Some((caller, request_id)) = routes.pending.remove(&reply.request_id) {
                    let result = Message::Result(CallResult {
                        request_id,
                        details: Dict::new(),
                        payload: reply.payload,
                    });
                    send_to(&mut routes, caller, &result);
                }
            }
            Message::Error(reply) => {
                if let Some((caller, request_id)) = routes.pending.remove(&reply.request_id) {
                    let error = Message::Error(ErrorReply {
                        request_type: MessageCode::Call.as_u64(),
                        request_id,
                        ..reply
                    });
                    send_to(&mut routes, caller, &error);
                }
            }
            Message::Publish(publish) => {
                let subscribers = routes
                    .subscriptions
                    .get(&publish.topic)
                    .cloned()
                    .unwrap_or_default();
                for (subscriber, subscription_id) in subscribers {
                    if subscriber == link_id {
                        continue;
                    }
                    let event = Message::Event(Event {
                        subscription_id,
                        publication_id: ids.fetch_add(1, Ordering::SeqCst),
                        details: Dict::new(),
                        payload: publish.payload.clone(),
                    });
                    send_to(&mut routes, subscriber, &event);
                }
            }
            // A silent router keeps the link open so the client's own
            // deadline decides when to give up.
            Message::Goodbye(_) if behavior.echo_goodbye => {
                send_to(&mut routes, link_id, &Message::goodbye(CLOSE_GOODBYE_AND_OUT));
                forget(&mut routes, link_id);
                return;
            }
            _ => {}
        }
    }

    forget(&mut routes.lock(), link_id);
}

/// Poll `check` until it holds or `deadline` passes.
pub fn eventually(deadline: Duration, check: impl Fn() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}
