//! Typed protocol messages.
//!
//! Each variant encodes to a JSON array: the numeric code first, then the
//! declared fields in fixed order. Trailing `args`/`kwargs` are always
//! written as explicit `[]`/`{}` placeholders.

use serde_json::{json, Value};

use crate::codec::MessageCode;
use crate::error::Result;

/// Keyword dictionary (`details`, `options`, `kwargs`).
pub type Dict = serde_json::Map<String, Value>;

/// Positional argument list.
pub type List = Vec<Value>;

/// Positional and keyword arguments carried by calls, results and events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub args: List,
    pub kwargs: Dict,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload with positional arguments only.
    pub fn from_args(args: impl IntoIterator<Item = Value>) -> Self {
        Self {
            args: args.into_iter().collect(),
            kwargs: Dict::new(),
        }
    }

    /// Payload with keyword arguments only.
    pub fn from_kwargs(kwargs: Dict) -> Self {
        Self {
            args: List::new(),
            kwargs,
        }
    }

    /// Append one positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set one keyword argument.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// The first positional argument, the usual single return value.
    pub fn first(&self) -> Option<&Value> {
        self.args.first()
    }

    /// JSON view used by the CLI: `{"args": [...], "kwargs": {...}}`.
    pub fn to_value(&self) -> Value {
        json!({ "args": self.args, "kwargs": self.kwargs })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hello {
    pub realm: String,
    pub details: Dict,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Welcome {
    pub session_id: u64,
    pub details: Dict,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Abort {
    pub details: Dict,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Goodbye {
    pub details: Dict,
    pub reason: String,
}

/// ERROR reply to a request. `request_type` is the code of the failed request.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReply {
    pub request_type: u64,
    pub request_id: u64,
    pub details: Dict,
    pub error: String,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Publish {
    pub request_id: u64,
    pub options: Dict,
    pub topic: String,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscribe {
    pub request_id: u64,
    pub options: Dict,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscribed {
    pub request_id: u64,
    pub subscription_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub subscription_id: u64,
    pub publication_id: u64,
    pub details: Dict,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub request_id: u64,
    pub options: Dict,
    pub procedure: String,
    pub payload: Payload,
}

/// RESULT of a call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub request_id: u64,
    pub details: Dict,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    pub request_id: u64,
    pub options: Dict,
    pub procedure: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registered {
    pub request_id: u64,
    pub registration_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub request_id: u64,
    pub registration_id: u64,
    pub details: Dict,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Yield {
    pub request_id: u64,
    pub options: Dict,
    pub payload: Payload,
}

/// Any message this peer sends or understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello(Hello),
    Welcome(Welcome),
    Abort(Abort),
    Goodbye(Goodbye),
    Error(ErrorReply),
    Publish(Publish),
    Subscribe(Subscribe),
    Subscribed(Subscribed),
    Event(Event),
    Call(Call),
    Result(CallResult),
    Register(Register),
    Registered(Registered),
    Invocation(Invocation),
    Yield(Yield),
}

impl Message {
    pub fn hello(realm: impl Into<String>, details: Dict) -> Self {
        Self::Hello(Hello {
            realm: realm.into(),
            details,
        })
    }

    pub fn goodbye(reason: impl Into<String>) -> Self {
        Self::Goodbye(Goodbye {
            details: Dict::new(),
            reason: reason.into(),
        })
    }

    /// A CALL with request id 0, to be assigned on send.
    pub fn call(procedure: impl Into<String>, payload: Payload) -> Self {
        Self::Call(Call {
            request_id: 0,
            options: Dict::new(),
            procedure: procedure.into(),
            payload,
        })
    }

    pub fn publish(topic: impl Into<String>, payload: Payload) -> Self {
        Self::Publish(Publish {
            request_id: 0,
            options: Dict::new(),
            topic: topic.into(),
            payload,
        })
    }

    pub fn register(procedure: impl Into<String>, options: Dict) -> Self {
        Self::Register(Register {
            request_id: 0,
            options,
            procedure: procedure.into(),
        })
    }

    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self::Subscribe(Subscribe {
            request_id: 0,
            options: Dict::new(),
            topic: topic.into(),
        })
    }

    /// Wire code of this message.
    pub fn code(&self) -> MessageCode {
        match self {
            Self::Hello(_) => MessageCode::Hello,
            Self::Welcome(_) => MessageCode::Welcome,
            Self::Abort(_) => MessageCode::Abort,
            Self::Goodbye(_) => MessageCode::Goodbye,
            Self::Error(_) => MessageCode::Error,
            Self::Publish(_) => MessageCode::Publish,
            Self::Subscribe(_) => MessageCode::Subscribe,
            Self::Subscribed(_) => MessageCode::Subscribed,
            Self::Event(_) => MessageCode::Event,
            Self::Call(_) => MessageCode::Call,
            Self::Result(_) => MessageCode::Result,
            Self::Register(_) => MessageCode::Register,
            Self::Registered(_) => MessageCode::Registered,
            Self::Invocation(_) => MessageCode::Invocation,
            Self::Yield(_) => MessageCode::Yield,
        }
    }

    /// Request id carried by request and response messages.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Self::Error(m) => Some(m.request_id),
            Self::Publish(m) => Some(m.request_id),
            Self::Subscribe(m) => Some(m.request_id),
            Self::Subscribed(m) => Some(m.request_id),
            Self::Call(m) => Some(m.request_id),
            Self::Result(m) => Some(m.request_id),
            Self::Register(m) => Some(m.request_id),
            Self::Registered(m) => Some(m.request_id),
            Self::Invocation(m) => Some(m.request_id),
            Self::Yield(m) => Some(m.request_id),
            Self::Hello(_)
            | Self::Welcome(_)
            | Self::Abort(_)
            | Self::Goodbye(_)
            | Self::Event(_) => None,
        }
    }

    /// Overwrite the request id of an outbound request. Returns false for
    /// messages that carry none.
    pub fn set_request_id(&mut self, id: u64) -> bool {
        let slot = match self {
            Self::Publish(m) => &mut m.request_id,
            Self::Subscribe(m) => &mut m.request_id,
            Self::Call(m) => &mut m.request_id,
            Self::Register(m) => &mut m.request_id,
            Self::Error(m) => &mut m.request_id,
            Self::Yield(m) => &mut m.request_id,
            _ => return false,
        };
        *slot = id;
        true
    }

    /// The response code that acknowledges this request, if it expects one.
    pub fn expected_response(&self) -> Option<MessageCode> {
        match self {
            Self::Hello(_) => Some(MessageCode::Welcome),
            Self::Goodbye(_) => Some(MessageCode::Goodbye),
            Self::Subscribe(_) => Some(MessageCode::Subscribed),
            Self::Call(_) => Some(MessageCode::Result),
            Self::Register(_) => Some(MessageCode::Registered),
            _ => None,
        }
    }

    /// Encode as the positional JSON array.
    pub fn to_value(&self) -> Value {
        let code = self.code().as_u64();
        match self {
            Self::Hello(m) => json!([code, m.realm, m.details]),
            Self::Welcome(m) => json!([code, m.session_id, m.details]),
            Self::Abort(m) => json!([code, m.details, m.reason]),
            Self::Goodbye(m) => json!([code, m.details, m.reason]),
            Self::Error(m) => json!([
                code,
                m.request_type,
                m.request_id,
                m.details,
                m.error,
                m.payload.args,
                m.payload.kwargs
            ]),
            Self::Publish(m) => json!([
                code,
                m.request_id,
                m.options,
                m.topic,
                m.payload.args,
                m.payload.kwargs
            ]),
            Self::Subscribe(m) => json!([code, m.request_id, m.options, m.topic]),
            Self::Subscribed(m) => json!([code, m.request_id, m.subscription_id]),
            Self::Event(m) => json!([
                code,
                m.subscription_id,
                m.publication_id,
                m.details,
                m.payload.args,
                m.payload.kwargs
            ]),
            Self::Call(m) => json!([
                code,
                m.request_id,
                m.options,
                m.procedure,
                m.payload.args,
                m.payload.kwargs
            ]),
            Self::Result(m) => json!([
                code,
                m.request_id,
                m.details,
                m.payload.args,
                m.payload.kwargs
            ]),
            Self::Register(m) => json!([code, m.request_id, m.options, m.procedure]),
            Self::Registered(m) => json!([code, m.request_id, m.registration_id]),
            Self::Invocation(m) => json!([
                code,
                m.request_id,
                m.registration_id,
                m.details,
                m.payload.args,
                m.payload.kwargs
            ]),
            Self::Yield(m) => json!([
                code,
                m.request_id,
                m.options,
                m.payload.args,
                m.payload.kwargs
            ]),
        }
    }

    /// Encode as a text frame.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_value())?)
    }
}
