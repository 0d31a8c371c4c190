use std::time::Duration;

use tracing::{debug, info, warn};

use crate::codec::MessageCode;
use crate::error::{PeerError, Result};
use crate::message::{Dict, Message};
use crate::session::{Correlation, Session, SessionState};
use crate::uri::{is_valid_uri, Roles, CLOSE_NORMAL};

const MAX_REALM_LEN: usize = 255;

/// Configuration for opening and closing a session.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeConfig {
    /// Roles announced in HELLO.
    pub roles: Roles,
    /// Extra HELLO details merged over the roles dict.
    pub details: Dict,
    /// How long to wait for WELCOME after HELLO.
    pub welcome_timeout: Duration,
    /// How long to wait for the GOODBYE echo.
    pub goodbye_timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            roles: Roles::default(),
            details: Dict::new(),
            welcome_timeout: Duration::from_secs(5),
            goodbye_timeout: Duration::from_secs(5),
        }
    }
}

impl HandshakeConfig {
    /// HELLO details: the roles dict plus any extra details.
    pub fn hello_details(&self) -> Dict {
        let mut details = self.roles.to_details();
        for (key, value) in &self.details {
            details.insert(key.clone(), value.clone());
        }
        details
    }
}

/// Check a realm name before it goes on the wire.
pub fn validate_realm(realm: &str) -> Result<()> {
    if realm.len() > MAX_REALM_LEN {
        return Err(PeerError::Configuration(format!(
            "realm exceeds {MAX_REALM_LEN} bytes"
        )));
    }
    if !is_valid_uri(realm) {
        return Err(PeerError::Configuration(format!(
            "invalid realm '{realm}'"
        )));
    }
    Ok(())
}

/// Open the session: send HELLO and wait for WELCOME.
///
/// The dispatch loop must already be running. Returns the session id. Any
/// failure closes the session.
pub fn begin(session: &Session, config: &HandshakeConfig) -> Result<u64> {
    validate_realm(session.realm())?;

    if !session.transition(SessionState::Init, SessionState::AwaitingWelcome) {
        return Err(PeerError::Protocol(format!(
            "cannot open a session in state {}",
            session.state()
        )));
    }

    session.open_slot(
        Correlation::Welcome,
        MessageCode::Hello,
        MessageCode::Welcome,
        None,
    )?;
    let hello = Message::hello(session.realm(), config.hello_details());
    if let Err(err) = session.send(&hello) {
        session.discard_slot(Correlation::Welcome);
        session.fail_connection("HELLO could not be sent");
        return Err(err);
    }
    debug!(peer = %session.name(), realm = %session.realm(), "HELLO sent");

    match session.await_slot(Correlation::Welcome, config.welcome_timeout) {
        Ok(Message::Welcome(welcome)) => Ok(welcome.session_id),
        Ok(other) => {
            session.fail_connection("unexpected handshake response");
            Err(PeerError::HandshakeFailed(format!(
                "expected WELCOME, got {}",
                other.code()
            )))
        }
        Err(err) => {
            if matches!(err, PeerError::Timeout(_)) {
                warn!(peer = %session.name(), "no WELCOME before deadline");
            }
            session.fail_connection("handshake failed");
            Err(err)
        }
    }
}

/// Close the session: send GOODBYE and wait for the router's echo.
///
/// Calling this on a session that is already closing or closed does nothing.
/// Resources are released even when the echo never arrives.
pub fn end(session: &Session, config: &HandshakeConfig) -> Result<()> {
    match session.state() {
        SessionState::Closing | SessionState::Closed => {
            debug!(peer = %session.name(), "session already closed");
            return Ok(());
        }
        SessionState::Init | SessionState::AwaitingWelcome => {
            session.fail_connection("session closed before it was established");
            return Ok(());
        }
        SessionState::Established => {}
    }

    if !session.transition(SessionState::Established, SessionState::Closing) {
        return Ok(());
    }

    session.open_slot(
        Correlation::Goodbye,
        MessageCode::Goodbye,
        MessageCode::Goodbye,
        None,
    )?;
    let outcome = match session.send(&Message::goodbye(CLOSE_NORMAL)) {
        Ok(()) => session
            .await_slot(Correlation::Goodbye, config.goodbye_timeout)
            .map(|_| ()),
        Err(err) => {
            session.discard_slot(Correlation::Goodbye);
            Err(err)
        }
    };
    session.fail_connection("session closed");

    match outcome {
        Ok(()) => {
            info!(peer = %session.name(), "session closed");
            Ok(())
        }
        Err(PeerError::Timeout(timeout)) => {
            warn!(peer = %session.name(), ?timeout, "no GOODBYE echo before deadline");
            Ok(())
        }
        Err(PeerError::Connection(reason)) => {
            debug!(peer = %session.name(), reason = %reason, "connection ended during close");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn hello_details_merge_extra_keys() {
        let mut config = HandshakeConfig::default();
        config.details.insert("agent".into(), json!("wampkit"));
        let details = config.hello_details();
        assert_eq!(details.get("agent"), Some(&json!("wampkit")));
        assert!(details.get("roles").is_some_and(Value::is_object));
    }

    #[test]
    fn realm_validation() {
        validate_realm("realm1").expect("valid");
        validate_realm("com.example.app").expect("valid");
        assert!(matches!(
            validate_realm(""),
            Err(PeerError::Configuration(_))
        ));
        assert!(matches!(
            validate_realm("bad realm"),
            Err(PeerError::Configuration(_))
        ));
        assert!(matches!(
            validate_realm(&"r".repeat(MAX_REALM_LEN + 1)),
            Err(PeerError::Configuration(_))
        ));
    }

    #[test]
    fn defaults() {
        let config = HandshakeConfig::default();
        assert_eq!(config.welcome_timeout, Duration::from_secs(5));
        assert_eq!(config.goodbye_timeout, Duration::from_secs(5));
        assert_eq!(config.roles, Roles::default());
    }
}
