//! Wire codes and decoding of JSON array frames into [`Message`]s.

use std::fmt;

use serde_json::Value;

use crate::error::{PeerError, Result};
use crate::message::{
    Abort, Call, CallResult, Dict, ErrorReply, Event, Goodbye, Hello, Invocation, List, Message,
    Payload, Publish, Register, Registered, Subscribe, Subscribed, Welcome, Yield,
};

/// Largest id the protocol allows (2^53).
pub const MAX_ID: u64 = 1 << 53;

/// Wire identity of every message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageCode {
    Hello,
    Welcome,
    Abort,
    Goodbye,
    Error,
    Publish,
    Subscribe,
    Subscribed,
    Event,
    Call,
    Result,
    Register,
    Registered,
    Invocation,
    Yield,
}

impl MessageCode {
    pub const ALL: [MessageCode; 15] = [
        Self::Hello,
        Self::Welcome,
        Self::Abort,
        Self::Goodbye,
        Self::Error,
        Self::Publish,
        Self::Subscribe,
        Self::Subscribed,
        Self::Event,
        Self::Call,
        Self::Result,
        Self::Register,
        Self::Registered,
        Self::Invocation,
        Self::Yield,
    ];

    pub fn from_u64(code: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|known| known.as_u64() == code)
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Self::Hello => 1,
            Self::Welcome => 2,
            Self::Abort => 3,
            Self::Goodbye => 6,
            Self::Error => 8,
            Self::Publish => 16,
            Self::Subscribe => 32,
            Self::Subscribed => 33,
            Self::Event => 36,
            Self::Call => 48,
            Self::Result => 50,
            Self::Register => 64,
            Self::Registered => 65,
            Self::Invocation => 68,
            Self::Yield => 70,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Hello => "HELLO",
            Self::Welcome => "WELCOME",
            Self::Abort => "ABORT",
            Self::Goodbye => "GOODBYE",
            Self::Error => "ERROR",
            Self::Publish => "PUBLISH",
            Self::Subscribe => "SUBSCRIBE",
            Self::Subscribed => "SUBSCRIBED",
            Self::Event => "EVENT",
            Self::Call => "CALL",
            Self::Result => "RESULT",
            Self::Register => "REGISTER",
            Self::Registered => "REGISTERED",
            Self::Invocation => "INVOCATION",
            Self::Yield => "YIELD",
        }
    }

    /// Allowed number of fields after the code, inclusive.
    fn field_range(self) -> (usize, usize) {
        match self {
            Self::Hello | Self::Welcome | Self::Abort | Self::Goodbye => (2, 2),
            Self::Subscribed | Self::Registered => (2, 2),
            Self::Subscribe | Self::Register => (3, 3),
            Self::Error => (4, 6),
            Self::Publish | Self::Event | Self::Call | Self::Invocation => (3, 5),
            Self::Result | Self::Yield => (2, 4),
        }
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.as_u64())
    }
}

/// Decode one text frame into a typed message.
pub fn decode(text: &str) -> Result<Message> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| PeerError::Protocol(format!("frame is not JSON: {err}")))?;
    decode_value(value)
}

/// Decode an already-parsed frame array.
pub fn decode_value(value: Value) -> Result<Message> {
    let Value::Array(items) = value else {
        return Err(PeerError::Protocol("frame is not a JSON array".to_string()));
    };
    let Some((head, rest)) = items.split_first() else {
        return Err(PeerError::Protocol("empty frame".to_string()));
    };
    let raw_code = head
        .as_u64()
        .ok_or_else(|| PeerError::Protocol(format!("message code is not an integer: {head}")))?;
    let code = MessageCode::from_u64(raw_code).ok_or(PeerError::UnknownMessageCode(raw_code))?;

    let (min, max) = code.field_range();
    if rest.len() < min || rest.len() > max {
        return Err(PeerError::Protocol(format!(
            "{code} expects {min}..={max} fields, got {}",
            rest.len()
        )));
    }

    let f = Fields { code, items: rest };
    let message = match code {
        MessageCode::Hello => Message::Hello(Hello {
            realm: f.string(0, "realm")?,
            details: f.dict(1, "details")?,
        }),
        MessageCode::Welcome => Message::Welcome(Welcome {
            session_id: f.id(0, "session id")?,
            details: f.dict(1, "details")?,
        }),
        MessageCode::Abort => Message::Abort(Abort {
            details: f.dict(0, "details")?,
            reason: f.string(1, "reason")?,
        }),
        MessageCode::Goodbye => Message::Goodbye(Goodbye {
            details: f.dict(0, "details")?,
            reason: f.string(1, "reason")?,
        }),
        MessageCode::Error => Message::Error(ErrorReply {
            request_type: f.integer(0, "request type")?,
            request_id: f.id(1, "request id")?,
            details: f.dict(2, "details")?,
            error: f.string(3, "error uri")?,
            payload: f.payload(4)?,
        }),
        MessageCode::Publish => Message::Publish(Publish {
            request_id: f.id(0, "request id")?,
            options: f.dict(1, "options")?,
            topic: f.string(2, "topic")?,
            payload: f.payload(3)?,
        }),
        MessageCode::Subscribe => Message::Subscribe(Subscribe {
            request_id: f.id(0, "request id")?,
            options: f.dict(1, "options")?,
            topic: f.string(2, "topic")?,
        }),
        MessageCode::Subscribed => Message::Subscribed(Subscribed {
            request_id: f.id(0, "request id")?,
            subscription_id: f.id(1, "subscription id")?,
        }),
        MessageCode::Event => Message::Event(Event {
            subscription_id: f.id(0, "subscription id")?,
            publication_id: f.id(1, "publication id")?,
            details: f.dict(2, "details")?,
            payload: f.payload(3)?,
        }),
        MessageCode::Call => Message::Call(Call {
            request_id: f.id(0, "request id")?,
            options: f.dict(1, "options")?,
            procedure: f.string(2, "procedure")?,
            payload: f.payload(3)?,
        }),
        MessageCode::Result => Message::Result(CallResult {
            request_id: f.id(0, "request id")?,
            details: f.dict(1, "details")?,
            payload: f.payload(2)?,
        }),
        MessageCode::Register => Message::Register(Register {
            request_id: f.id(0, "request id")?,
            options: f.dict(1, "options")?,
            procedure: f.string(2, "procedure")?,
        }),
        MessageCode::Registered => Message::Registered(Registered {
            request_id: f.id(0, "request id")?,
            registration_id: f.id(1, "registration id")?,
        }),
        MessageCode::Invocation => Message::Invocation(Invocation {
            request_id: f.id(0, "request id")?,
            registration_id: f.id(1, "registration id")?,
            details: f.dict(2, "details")?,
            payload: f.payload(3)?,
        }),
        MessageCode::Yield => Message::Yield(Yield {
            request_id: f.id(0, "request id")?,
            options: f.dict(1, "options")?,
            payload: f.payload(2)?,
        }),
    };

    Ok(message)
}

/// What can still be read from a response frame that failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHint {
    pub code: MessageCode,
    /// Request code an ERROR answers, when readable.
    pub request_type: Option<u64>,
    pub request_id: u64,
}

/// Best-effort [`ResponseHint`] for a response frame that failed to decode,
/// so the waiting caller can be failed instead of timing out.
pub fn correlation_hint(text: &str) -> Option<ResponseHint> {
    let value: Value = serde_json::from_str(text).ok()?;
    let items = value.as_array()?;
    let code = MessageCode::from_u64(items.first()?.as_u64()?)?;
    let (index, request_type) = match code {
        MessageCode::Result | MessageCode::Registered | MessageCode::Subscribed => (1, None),
        MessageCode::Error => (2, items.get(1).and_then(Value::as_u64)),
        _ => return None,
    };
    let request_id = items.get(index)?.as_u64()?;
    Some(ResponseHint {
        code,
        request_type,
        request_id,
    })
}

struct Fields<'a> {
    code: MessageCode,
    items: &'a [Value],
}

impl Fields<'_> {
    fn invalid(&self, name: &str, expected: &str) -> PeerError {
        PeerError::Protocol(format!("{}: {name} must be {expected}", self.code))
    }

    fn integer(&self, index: usize, name: &str) -> Result<u64> {
        self.items
            .get(index)
            .and_then(Value::as_u64)
            .ok_or_else(|| self.invalid(name, "an unsigned integer"))
    }

    fn id(&self, index: usize, name: &str) -> Result<u64> {
        let id = self.integer(index, name)?;
        if id == 0 || id > MAX_ID {
            return Err(self.invalid(name, "in 1..=2^53"));
        }
        Ok(id)
    }

    fn string(&self, index: usize, name: &str) -> Result<String> {
        self.items
            .get(index)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| self.invalid(name, "a string"))
    }

    fn dict(&self, index: usize, name: &str) -> Result<Dict> {
        match self.items.get(index) {
            Some(Value::Object(map)) => Ok(map.clone()),
            _ => Err(self.invalid(name, "an object")),
        }
    }

    /// Optional trailing `args` then `kwargs`; absent or null means empty.
    fn payload(&self, index: usize) -> Result<Payload> {
        let args: List = match self.items.get(index) {
            None | Some(Value::Null) => List::new(),
            Some(Value::Array(args)) => args.clone(),
            Some(_) => return Err(self.invalid("args", "an array")),
        };
        let kwargs = match self.items.get(index + 1) {
            None | Some(Value::Null) => Dict::new(),
            Some(Value::Object(kwargs)) => kwargs.clone(),
            Some(_) => return Err(self.invalid("kwargs", "an object")),
        };
        Ok(Payload { args, kwargs })
    }
}
