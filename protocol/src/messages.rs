use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Messages sent from the host to a sandboxed child over its stdin channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostMessage {
    /// The single input object for a function-mode execution.
    Input { value: Value },
    /// Ask the child to shut down its listener and exit.
    Stop,
    /// Best-effort abort raised inside a running generator.
    Abort,
}

/// The bare content-type frame the adapter emits before a result or stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTypeFrame {
    #[serde(rename = "contentType")]
    pub content_type: String,
}

/// Console severity forwarded from the child's hooked `console` methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsoleLevel {
    Log,
    Warning,
    Error,
    Trace,
}

impl ConsoleLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Warning => "warning",
            ConsoleLevel::Error => "error",
            ConsoleLevel::Trace => "trace",
        }
    }
}

/// Tagged frames the adapter emits on the child's stdout channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChildEvent {
    /// Service mode: the HTTP listener is bound and accepting.
    Ready,
    /// One yielded value from a streaming function.
    Progress { value: Value },
    /// The single return value of a non-streaming function.
    Result { value: Value },
    /// The return value of a completed generator.
    StreamResult { value: Value },
    /// The user handler threw.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
    /// Output captured from the child's `console` hooks.
    Console { level: ConsoleLevel, data: Value },
}

/// Any frame read from a child: either the bare `{contentType}` shape or a
/// `type`-tagged [`ChildEvent`].
///
/// The content-type frame carries no `type` field on the wire, so the two
/// shapes are discriminated by field presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChildMessage {
    ContentType(ContentTypeFrame),
    Event(ChildEvent),
}
