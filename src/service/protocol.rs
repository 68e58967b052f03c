//! JSON-line request and reply types for the `serve` channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ConfigPatch;
use crate::supervisor::SessionError;

/// One request line. Arguments sit beside `id` and `op`.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// Echoed back verbatim; `null` when absent.
    #[serde(default)]
    pub id: Value,
    #[serde(flatten)]
    pub call: Call,
}

/// An operation and its arguments.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Call {
    Start {
        #[serde(default)]
        files: Vec<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        config: ConfigPatch,
    },
    QuickStart {
        workflow: String,
        #[serde(default)]
        files: Vec<String>,
        #[serde(default)]
        config: ConfigPatch,
    },
    Send {
        message: String,
    },
    AddFiles {
        paths: Vec<String>,
    },
    DropFiles {
        paths: Vec<String>,
    },
    RunCommand {
        command: String,
    },
    ListFiles,
    Configure {
        #[serde(flatten)]
        patch: ConfigPatch,
    },
    GetStatus,
    GetDebugInfo,
    TestConnection,
    SetLogLevel {
        level: String,
    },
    Stop,
    EmergencyStop,
}

impl Call {
    /// Wire name of the operation.
    #[must_use]
    pub fn op(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::QuickStart { .. } => "quick_start",
            Self::Send { .. } => "send",
            Self::AddFiles { .. } => "add_files",
            Self::DropFiles { .. } => "drop_files",
            Self::RunCommand { .. } => "run_command",
            Self::ListFiles => "list_files",
            Self::Configure { .. } => "configure",
            Self::GetStatus => "get_status",
            Self::GetDebugInfo => "get_debug_info",
            Self::TestConnection => "test_connection",
            Self::SetLogLevel { .. } => "set_log_level",
            Self::Stop => "stop",
            Self::EmergencyStop => "emergency_stop",
        }
    }
}

/// Error body of a failed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    /// Output received before a command timed out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<Vec<String>>,
}

impl From<&SessionError> for ErrorBody {
    fn from(error: &SessionError) -> Self {
        let partial = match error {
            SessionError::CommandTimeout { partial, .. } => Some(partial.lines.clone()),
            _ => None,
        };
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
            partial,
        }
    }
}

/// One reply line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: Value,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Reply {
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn failure(id: Value, error: ErrorBody) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    /// Reply for a line that could not be decoded.
    #[must_use]
    pub fn invalid_request(id: Value, message: impl Into<String>) -> Self {
        Self::failure(
            id,
            ErrorBody {
                kind: "invalid_request".to_string(),
                message: message.into(),
                partial: None,
            },
        )
    }
}
