//! Request/response value types and the typed property bag.
//!
//! Arguments and return values are dynamically typed [`Value`]s so the
//! dispatch core stays independent of any one payload schema.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use serde_json::Value;

/// Keyword arguments, ordered by name.
pub type Kwargs = BTreeMap<String, Value>;

// ── Property bag ─────────────────────────────────────────────

/// Closed set of keys a message can carry alongside its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropertyKey {
    SequenceId,
    Method,
}

/// Typed value stored under a [`PropertyKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    SequenceId(i32),
    Method(String),
}

impl Property {
    pub fn key(&self) -> PropertyKey {
        match self {
            Self::SequenceId(_) => PropertyKey::SequenceId,
            Self::Method(_) => PropertyKey::Method,
        }
    }
}

/// Properties travelling with a message so later stages can correlate
/// without reparsing the frame.
///
/// One slot per key; on the wire each slot is its own field, so a value of
/// the wrong type is a decode error rather than a property under another
/// key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Properties {
    #[serde(rename = "SequenceId", default, skip_serializing_if = "Option::is_none")]
    sequence_id: Option<i32>,
    #[serde(rename = "Method", default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `property` in its own slot, replacing any previous value.
    pub fn set(&mut self, property: Property) {
        match property {
            Property::SequenceId(id) => self.sequence_id = Some(id),
            Property::Method(name) => self.method = Some(name),
        }
    }

    pub fn get(&self, key: PropertyKey) -> Option<Property> {
        match key {
            PropertyKey::SequenceId => self.sequence_id.map(Property::SequenceId),
            PropertyKey::Method => self.method.clone().map(Property::Method),
        }
    }

    pub fn sequence_id(&self) -> Option<i32> {
        self.sequence_id
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn len(&self) -> usize {
        usize::from(self.sequence_id.is_some()) + usize::from(self.method.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Failures ─────────────────────────────────────────────────

/// Why a request produced an error instead of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// No invocable is registered under the requested name.
    UnknownMethod,
    /// The handler returned an error.
    Application,
    /// The handler panicked.
    Panicked,
}

/// Application-level failure, delivered to the peer as a reply payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Failure returned by a handler body.
    pub fn application(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Application, message)
    }

    pub fn unknown_method(method: &str) -> Self {
        Self::new(
            FailureKind::UnknownMethod,
            format!("unable to find callable for method {method}"),
        )
    }

    /// Convert a caught panic payload into a failure.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_owned());
        Self::new(FailureKind::Panicked, format!("handler panicked: {detail}"))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Failure {}

// ── Messages ─────────────────────────────────────────────────

/// An application call decoded from a dispatch frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Kwargs,
    #[serde(default)]
    pub properties: Properties,
}

impl RequestMessage {
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
            kwargs: Kwargs::new(),
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub fn with_kwarg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.set(property);
        self
    }
}

/// Outcome of a call. Holds a return value or an error, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnMessage {
    outcome: Result<Value, Failure>,
    pub properties: Properties,
}

impl ReturnMessage {
    pub fn value(value: Value) -> Self {
        Self {
            outcome: Ok(value),
            properties: Properties::new(),
        }
    }

    pub fn error(failure: Failure) -> Self {
        Self {
            outcome: Err(failure),
            properties: Properties::new(),
        }
    }

    /// Build the reply for a finished call. `SequenceId` and `Method` are
    /// carried over from the request so the peer can re-associate it.
    pub fn from_outcome(outcome: Result<Value, Failure>, request: &Properties) -> Self {
        Self {
            outcome,
            properties: Properties {
                sequence_id: request.sequence_id,
                method: request.method.clone(),
            },
        }
    }

    pub fn return_value(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.outcome.as_ref().err()
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn into_outcome(self) -> Result<Value, Failure> {
        self.outcome
    }
}
