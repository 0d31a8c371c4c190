//! End-to-end flows between clients through an in-process router.

mod support;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use support::{eventually, MockRouter};
use wampkit_peer::{
    Client, ErrorKind, MessageCode, Payload, PeerError, ProcedureError, Registry, SessionState,
    ERROR_INVALID_ARGUMENT, ERROR_RUNTIME,
};

fn echo_callee(router: &MockRouter) -> Client {
    router.start(
        Client::builder()
            .name("callee")
            .procedure("echo", |payload: &Payload| Ok(payload.clone())),
    )
}

#[test]
fn call_returns_callee_result() {
    let router = MockRouter::new();
    let callee = echo_callee(&router);
    let caller = router.start(Client::builder().name("caller"));

    let result = caller
        .call("echo", Payload::from_args([json!("hi")]))
        .expect("call echo");
    assert_eq!(result.first(), Some(&json!("hi")));

    assert_eq!(callee.registrations().values().collect::<Vec<_>>(), ["echo"]);
    caller.stop().expect("stop caller");
    callee.stop().expect("stop callee");
}

#[test]
fn published_event_reaches_subscriber_once() {
    let router = MockRouter::new();
    let seen: Arc<Mutex<Vec<Payload>>> = Arc::default();

    let subscriber = {
        let seen = Arc::clone(&seen);
        router.start(
            Client::builder()
                .name("subscriber")
                .subscription("news", move |payload: &Payload| {
                    seen.lock().push(payload.clone());
                }),
        )
    };
    let publisher = router.start(Client::builder().name("publisher"));

    let mut headline = wampkit_peer::Dict::new();
    headline.insert("headline".into(), json!("x"));
    publisher
        .publish("news", Payload::from_kwargs(headline.clone()))
        .expect("publish");

    assert!(eventually(Duration::from_secs(2), || seen.lock().len() == 1));
    thread::sleep(Duration::from_millis(50));
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].kwargs, headline);

    let subscriber_id = subscriber.session_id().expect("session id");
    let sent = router.received_from(subscriber_id);
    assert!(!sent.contains(&MessageCode::Yield));
    assert!(!sent.contains(&MessageCode::Error));
    assert_eq!(publisher.session().pending_requests(), 0);
}

#[test]
fn transport_drop_fails_inflight_call_with_connection_error() {
    let router = MockRouter::new();
    let invoked = Arc::new(AtomicBool::new(false));
    let _callee = {
        let invoked = Arc::clone(&invoked);
        router.start(Client::builder().name("slow").procedure(
            "slow",
            move |payload: &Payload| {
                invoked.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(300));
                Ok(payload.clone())
            },
        ))
    };
    let caller = Arc::new(router.start(Client::builder().name("caller")));
    let caller_id = caller.session_id().expect("session id");

    let pending = {
        let caller = Arc::clone(&caller);
        thread::spawn(move || {
            caller.call_with_timeout("slow", Payload::new(), Duration::from_secs(5))
        })
    };
    assert!(eventually(Duration::from_secs(2), || invoked
        .load(Ordering::SeqCst)));
    router.drop_link(caller_id);

    let err = pending.join().expect("caller thread").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(eventually(Duration::from_secs(1), || caller.state()
        == SessionState::Closed));

    let err = caller.call("slow", Payload::new()).unwrap_err();
    assert!(matches!(err, PeerError::Connection(_)));
}

#[test]
fn unknown_code_is_rejected_and_listener_continues() {
    let router = MockRouter::new();
    let _callee = echo_callee(&router);
    let caller = router.start(Client::builder().name("caller"));
    let caller_id = caller.session_id().expect("session id");

    router.inject(caller_id, "[999, 1, {}]");
    assert!(eventually(Duration::from_secs(1), || caller
        .session()
        .rejected_frames()
        == 1));
    assert!(caller
        .session()
        .last_rejection()
        .is_some_and(|reason| reason.contains("999")));

    let result = caller
        .call("echo", Payload::from_args([json!(7)]))
        .expect("call after rejection");
    assert_eq!(result.first(), Some(&json!(7)));
    assert_eq!(caller.state(), SessionState::Established);
}

#[test]
fn late_result_after_timeout_is_discarded() {
    let router = MockRouter::new();
    let _callee = router.start(Client::builder().name("sleepy").procedure(
        "sleepy",
        |payload: &Payload| {
            thread::sleep(Duration::from_millis(200));
            Ok(payload.clone())
        },
    ));
    let caller = router.start(Client::builder().name("caller"));

    let err = caller
        .call_with_timeout("sleepy", Payload::new(), Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, PeerError::Timeout(_)));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(caller.session().pending_requests(), 0);

    assert!(eventually(Duration::from_secs(2), || caller
        .session()
        .orphaned_messages()
        == 1));
    assert_eq!(caller.state(), SessionState::Established);

    let result = caller
        .call("sleepy", Payload::from_args([json!("again")]))
        .expect("session still usable");
    assert_eq!(result.first(), Some(&json!("again")));
}

#[test]
fn concurrent_calls_are_not_cross_wired() {
    let router = MockRouter::new();
    let _callee = echo_callee(&router);
    let caller = Arc::new(router.start(Client::builder().name("caller")));

    let workers: Vec<_> = (0..8)
        .map(|n| {
            let caller = Arc::clone(&caller);
            thread::spawn(move || {
                let result = caller
                    .call("echo", Payload::from_args([json!(n)]))
                    .expect("call");
                (n, result)
            })
        })
        .collect();

    for worker in workers {
        let (n, result) = worker.join().expect("worker");
        assert_eq!(result.first(), Some(&json!(n)));
    }
    assert_eq!(caller.session().orphaned_messages(), 0);
}

#[test]
fn stop_twice_sends_one_goodbye() {
    let router = MockRouter::new();
    let client = router.start(Client::builder().name("closer"));
    let id = client.session_id().expect("session id");

    client.stop().expect("first stop");
    client.stop().expect("second stop");
    assert_eq!(client.state(), SessionState::Closed);

    let goodbyes = router
        .received_from(id)
        .into_iter()
        .filter(|code| *code == MessageCode::Goodbye)
        .count();
    assert_eq!(goodbyes, 1);
}

#[test]
fn stop_completes_without_goodbye_echo() {
    let router = MockRouter::silent_on_goodbye();
    let client = router.start(
        Client::builder()
            .name("unanswered")
            .handshake_timeout(Duration::from_millis(100)),
    );

    client.stop().expect("stop still succeeds");
    assert_eq!(client.state(), SessionState::Closed);
}

#[test]
fn abort_fails_start_with_handshake_error() {
    let router = MockRouter::aborting("wamp.error.no_such_realm");
    let client = router.attach(Client::builder().name("refused"));

    let err = client.start().unwrap_err();
    assert!(
        matches!(&err, PeerError::HandshakeFailed(reason) if reason.contains("no_such_realm")),
        "unexpected error: {err}"
    );
    assert_eq!(client.state(), SessionState::Closed);
}

#[test]
fn procedure_errors_reach_the_caller() {
    let router = MockRouter::new();
    let _callee = router.start(
        Client::builder()
            .name("picky")
            .procedure("picky", |payload: &Payload| {
                if payload.is_empty() {
                    Err(ProcedureError::invalid_argument("need an argument"))
                } else {
                    Ok(payload.clone())
                }
            })
            .procedure(
                "broken",
                |_: &Payload| -> Result<Payload, ProcedureError> { panic!("boom") },
            ),
    );
    let caller = router.start(Client::builder().name("caller"));

    let err = caller.call("picky", Payload::new()).unwrap_err();
    assert_eq!(err.remote_uri(), Some(ERROR_INVALID_ARGUMENT));
    assert_eq!(err.kind(), ErrorKind::Protocol);

    let err = caller.call("broken", Payload::new()).unwrap_err();
    assert_eq!(err.remote_uri(), Some(ERROR_RUNTIME));

    let err = caller.call("missing", Payload::new()).unwrap_err();
    assert_eq!(err.remote_uri(), Some("wamp.error.no_such_procedure"));

    assert_eq!(caller.state(), SessionState::Established);
}

#[test]
fn router_goodbye_closes_session() {
    let router = MockRouter::new();
    let client = router.start(Client::builder().name("evicted"));
    let id = client.session_id().expect("session id");

    router.inject(id, r#"[6, {}, "wamp.close.system_shutdown"]"#);
    assert!(eventually(Duration::from_secs(1), || client.state()
        == SessionState::Closed));
    assert!(eventually(Duration::from_secs(1), || router
        .received_from(id)
        .contains(&MessageCode::Goodbye)));
    client.stop().expect("stop after router close");
}

#[test]
fn shared_registry_is_revoked_on_stop() {
    let router = MockRouter::new();
    let registry = Registry::shared();
    let calls = Arc::new(AtomicUsize::new(0));

    let callee = {
        let calls = Arc::clone(&calls);
        router.start(
            Client::builder()
                .name("shared")
                .registry(Arc::clone(&registry))
                .procedure("count", move |_: &Payload| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Payload::new())
                })
                .subscription("ticks", |_: &Payload| {}),
        )
    };
    callee
        .wait_for_registrations(1, Duration::from_secs(1))
        .expect("registered");
    callee
        .wait_for_subscriptions(1, Duration::from_secs(1))
        .expect("subscribed");
    assert_eq!(registry.registration_count(), 1);
    assert_eq!(registry.subscription_count(), 1);

    let caller = router.start(Client::builder().name("caller"));
    caller.call("count", Payload::new()).expect("call");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    callee.stop().expect("stop");
    assert_eq!(registry.registration_count(), 0);
    assert_eq!(registry.subscription_count(), 0);
    assert!(eventually(Duration::from_secs(1), || router
        .registration_count("count")
        == 0));
}

#[test]
fn duplicate_procedure_never_reaches_router() {
    let router = MockRouter::new();
    let (sink, source) = router.link();
    let err = Client::builder()
        .realm(support::REALM)
        .procedure("echo", |payload: &Payload| Ok(payload.clone()))
        .procedure("echo", |payload: &Payload| Ok(payload.clone()))
        .attach(Box::new(sink), Box::new(source))
        .err()
        .expect("duplicate procedure");
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
