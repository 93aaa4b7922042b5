//! Per-task worker wiring resolved from configuration.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cropsight_core::config::{TaskSettings, TasksConfig};
use cropsight_core::{ResultShape, TaskKind};

#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub kind: TaskKind,
    /// Script handed to the worker executable. `None` runs the executable
    /// directly with the image and model paths.
    pub script: Option<PathBuf>,
    pub model_path: PathBuf,
    /// Path appended to the resident service base URL.
    pub primary_route: String,
    pub shape: ResultShape,
}

impl TaskSpec {
    pub fn from_settings(kind: TaskKind, settings: &TaskSettings) -> Self {
        let script = Some(settings.script.clone()).filter(|p| !p.as_os_str().is_empty());
        Self {
            kind,
            script,
            model_path: settings.model_path.clone(),
            primary_route: settings.primary_route.clone(),
            shape: settings.shape.clone(),
        }
    }

    /// `[script] <staged image> <model>`
    pub fn worker_args(&self, staged: &Path) -> Vec<OsString> {
        let mut args = Vec::with_capacity(3);
        if let Some(script) = &self.script {
            args.push(script.clone().into_os_string());
        }
        args.push(staged.as_os_str().to_owned());
        args.push(self.model_path.clone().into_os_string());
        args
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    specs: Arc<HashMap<TaskKind, TaskSpec>>,
}

impl TaskRegistry {
    pub fn new(specs: impl IntoIterator<Item = TaskSpec>) -> Self {
        Self {
            specs: Arc::new(specs.into_iter().map(|s| (s.kind, s)).collect()),
        }
    }

    pub fn from_config(tasks: &TasksConfig) -> Self {
        Self::new(
            TaskKind::ALL
                .iter()
                .map(|&kind| TaskSpec::from_settings(kind, tasks.get(kind))),
        )
    }

    pub fn get(&self, kind: TaskKind) -> Option<&TaskSpec> {
        self.specs.get(&kind)
    }
}
