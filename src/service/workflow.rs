//! Predefined quick-start workflows.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{ChatMode, ConfigPatch};
use crate::supervisor::SessionError;

/// Common task shapes a session can be started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Workflow {
    Debug,
    Refactor,
    Feature,
    Test,
    Review,
}

/// Opening message and settings for a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowPlan {
    pub message: &'static str,
    pub patch: ConfigPatch,
}

impl Workflow {
    pub const ALL: [Self; 5] = [
        Self::Debug,
        Self::Refactor,
        Self::Feature,
        Self::Test,
        Self::Review,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Refactor => "refactor",
            Self::Feature => "feature",
            Self::Test => "test",
            Self::Review => "review",
        }
    }

    #[must_use]
    pub fn plan(self) -> WorkflowPlan {
        match self {
            Self::Debug => WorkflowPlan {
                message: "Help me debug issues in the codebase. Start by analyzing the code for potential problems.",
                patch: ConfigPatch {
                    auto_test: Some(true),
                    lint: Some(true),
                    ..ConfigPatch::default()
                },
            },
            Self::Refactor => WorkflowPlan {
                message: "Help me refactor this code to improve structure, readability, and maintainability.",
                patch: ConfigPatch {
                    mode: Some(ChatMode::Architect),
                    auto_commit: Some(false),
                    ..ConfigPatch::default()
                },
            },
            Self::Feature => WorkflowPlan {
                message: "Help me implement a new feature. Let's start by understanding the requirements.",
                patch: ConfigPatch {
                    auto_commit: Some(true),
                    auto_test: Some(true),
                    ..ConfigPatch::default()
                },
            },
            Self::Test => WorkflowPlan {
                message: "Help me write comprehensive tests for this codebase.",
                patch: ConfigPatch {
                    auto_test: Some(true),
                    test_cmd: Some("python -m pytest -v".to_string()),
                    ..ConfigPatch::default()
                },
            },
            Self::Review => WorkflowPlan {
                message: "Please review this code and suggest improvements for quality, security, and performance.",
                patch: ConfigPatch {
                    mode: Some(ChatMode::Architect),
                    ..ConfigPatch::default()
                },
            },
        }
    }
}

impl std::fmt::Display for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Workflow {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|w| w.name() == wanted)
            .ok_or_else(|| {
                let available: Vec<&str> = Self::ALL.iter().map(|w| w.name()).collect();
                SessionError::InvalidArgument(format!(
                    "unknown workflow '{s}', available: {}",
                    available.join(", ")
                ))
            })
    }
}
