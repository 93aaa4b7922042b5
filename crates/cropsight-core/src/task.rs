//! Task selector — which model a request is routed to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Leaf disease classification.
    Leaf,
    /// Pepper cluster (bunga) ripeness grading.
    Bunga,
}

impl TaskKind {
    pub const ALL: [TaskKind; 2] = [TaskKind::Leaf, TaskKind::Bunga];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Leaf => "leaf",
            TaskKind::Bunga => "bunga",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown task: {0}")]
pub struct UnknownTask(pub String);

impl FromStr for TaskKind {
    type Err = UnknownTask;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "leaf" => Ok(TaskKind::Leaf),
            "bunga" => Ok(TaskKind::Bunga),
            _ => Err(UnknownTask(s.to_string())),
        }
    }
}
