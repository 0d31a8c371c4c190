//! Caller, callee, publisher and subscriber operations on an open session.

use std::time::Duration;

use tracing::debug;

use crate::error::{PeerError, Result};
use crate::message::{ErrorReply, Message, Payload};
use crate::session::Session;
use crate::uri::InvocationPolicy;

/// Register `procedure` and wait for REGISTERED. Returns the registration id.
pub fn register(
    session: &Session,
    procedure: &str,
    policy: InvocationPolicy,
    timeout: Duration,
) -> Result<u64> {
    let request = Message::register(procedure, policy.to_options());
    match session.send_and_await(request, timeout)? {
        Message::Registered(registered) => Ok(registered.registration_id),
        Message::Error(reply) => Err(remote_error(reply)),
        other => Err(unexpected("REGISTER", &other)),
    }
}

/// Subscribe to `topic` and wait for SUBSCRIBED. Returns the subscription id.
pub fn subscribe(session: &Session, topic: &str, timeout: Duration) -> Result<u64> {
    match session.send_and_await(Message::subscribe(topic), timeout)? {
        Message::Subscribed(subscribed) => Ok(subscribed.subscription_id),
        Message::Error(reply) => Err(remote_error(reply)),
        other => Err(unexpected("SUBSCRIBE", &other)),
    }
}

/// Call a remote procedure and wait for its RESULT.
///
/// An ERROR for the same request becomes [`PeerError::Remote`].
pub fn call(
    session: &Session,
    procedure: &str,
    payload: Payload,
    timeout: Duration,
) -> Result<Payload> {
    let request_id = session.send_request(Message::call(procedure, payload))?;
    debug!(peer = %session.name(), procedure, request_id, "call sent");

    match session.await_response(request_id, timeout)? {
        Message::Result(result) => Ok(result.payload),
        Message::Error(reply) => Err(remote_error(reply)),
        other => Err(unexpected("CALL", &other)),
    }
}

/// Publish an event. Fire-and-forget: returns the publish request id.
pub fn publish(session: &Session, topic: &str, payload: Payload) -> Result<u64> {
    let request_id = session
        .send_unacknowledged(Message::publish(topic, payload))?
        .unwrap_or_default();
    debug!(peer = %session.name(), topic, request_id, "event published");
    Ok(request_id)
}

fn remote_error(reply: ErrorReply) -> PeerError {
    PeerError::Remote {
        uri: reply.error,
        args: reply.payload.args,
        kwargs: reply.payload.kwargs,
    }
}

fn unexpected(request: &str, response: &Message) -> PeerError {
    PeerError::Protocol(format!(
        "unexpected {} in response to {request}",
        response.code()
    ))
}
