//! Handler registry: which executable runs which task type.
//!
//! Loaded from a directory of TOML files, one handler per file:
//!
//! ```toml
//! [handler]
//! task_type = "bags.extract.topics"
//! command = "./extract_topics.sh"
//! args = ["--verbose"]
//!
//! [handler.env]
//! EXTRACT_MODE = "fast"
//! ```
//!
//! A `command` containing a path separator is resolved against the directory
//! of its TOML file; a bare name is looked up on `PATH` at spawn time.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::validate_task_type;

#[derive(Debug, Deserialize)]
struct HandlerFile {
    handler: HandlerSpec,
}

/// How to run one task type.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HandlerSpec {
    pub task_type: String,
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl HandlerSpec {
    pub fn new(task_type: impl Into<String>, command: impl Into<PathBuf>) -> Self {
        Self {
            task_type: task_type.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Registry of handlers, indexed by task type.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerSpec>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load all `.toml` files from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut registry = Self::empty();

        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Config(format!("cannot read handlers dir {}: {e}", dir.display()))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            let file: HandlerFile = toml::from_str(&content).map_err(|e| {
                Error::Config(format!("bad handler config {}: {e}", path.display()))
            })?;
            let mut spec = file.handler;
            if spec.command.is_relative() && spec.command.components().count() > 1 {
                spec.command = dir.join(&spec.command);
            }
            registry.register(spec).map_err(|e| {
                Error::Config(format!("{}: {e}", path.display()))
            })?;
        }

        tracing::debug!(
            dir = %dir.display(),
            count = registry.handlers.len(),
            "handlers loaded"
        );
        Ok(registry)
    }

    /// Add a handler. Each task type may be registered once.
    pub fn register(&mut self, spec: HandlerSpec) -> Result<()> {
        validate_task_type(&spec.task_type)?;
        if self.handlers.contains_key(&spec.task_type) {
            return Err(Error::Config(format!(
                "task type {} registered twice",
                spec.task_type
            )));
        }
        self.handlers.insert(spec.task_type.clone(), spec);
        Ok(())
    }

    pub fn with(mut self, spec: HandlerSpec) -> Result<Self> {
        self.register(spec)?;
        Ok(self)
    }

    pub fn get(&self, task_type: &str) -> Option<&HandlerSpec> {
        self.handlers.get(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
