use std::fmt;
use std::str::FromStr;

use serde_json::{json, Value};

use crate::message::Dict;

/// GOODBYE reason: normal close initiated by this peer.
pub const CLOSE_NORMAL: &str = "wamp.close.normal";
/// GOODBYE reason: reply to a close initiated by the other side.
pub const CLOSE_GOODBYE_AND_OUT: &str = "wamp.close.goodbye_and_out";
/// GOODBYE reason: the router is shutting down.
pub const CLOSE_SYSTEM_SHUTDOWN: &str = "wamp.close.system_shutdown";
/// ERROR uri: a local procedure failed or panicked.
pub const ERROR_RUNTIME: &str = "wamp.error.runtime_error";
/// ERROR uri: an INVOCATION named a registration this peer does not own.
pub const ERROR_NO_SUCH_REGISTRATION: &str = "wamp.error.no_such_registration";
/// ERROR uri: a procedure rejected its arguments.
pub const ERROR_INVALID_ARGUMENT: &str = "wamp.error.invalid_argument";

/// Whether `reason` is an acceptable GOODBYE reason.
pub fn is_normal_close(reason: &str) -> bool {
    matches!(
        reason,
        CLOSE_NORMAL | CLOSE_GOODBYE_AND_OUT | CLOSE_SYSTEM_SHUTDOWN
    )
}

/// Loose URI check for realms, procedures and topics: dot-separated,
/// non-empty components without whitespace or `#`.
pub fn is_valid_uri(uri: &str) -> bool {
    !uri.is_empty()
        && uri.split('.').all(|component| {
            !component.is_empty()
                && !component
                    .chars()
                    .any(|c| c.is_whitespace() || c == '#')
        })
}

/// How the router picks a callee when several share a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvocationPolicy {
    #[default]
    Single,
    RoundRobin,
    Random,
    First,
    Last,
}

impl InvocationPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::RoundRobin => "roundrobin",
            Self::Random => "random",
            Self::First => "first",
            Self::Last => "last",
        }
    }

    /// REGISTER options carrying this policy.
    pub fn to_options(self) -> Dict {
        let mut options = Dict::new();
        options.insert("invoke".to_string(), Value::from(self.as_str()));
        options
    }
}

impl fmt::Display for InvocationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvocationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Self::Single),
            "roundrobin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            other => Err(format!("unknown invocation policy '{other}'")),
        }
    }
}

/// Roles announced in HELLO details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roles {
    pub caller: bool,
    pub callee: bool,
    pub publisher: bool,
    pub subscriber: bool,
}

impl Default for Roles {
    fn default() -> Self {
        Self {
            caller: true,
            callee: true,
            publisher: true,
            subscriber: true,
        }
    }
}

impl Roles {
    /// HELLO details: `{"roles": {...}}`.
    pub fn to_details(self) -> Dict {
        let mut roles = Dict::new();
        if self.subscriber {
            roles.insert("subscriber".into(), json!({}));
        }
        if self.publisher {
            roles.insert("publisher".into(), json!({}));
        }
        if self.callee {
            roles.insert("callee".into(), json!({ "shared_registration": true }));
        }
        if self.caller {
            roles.insert("caller".into(), json!({}));
        }

        let mut details = Dict::new();
        details.insert("roles".into(), Value::Object(roles));
        details
    }
}
