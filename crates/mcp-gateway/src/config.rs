//! Worker catalog and gateway tuning.
//!
//! The catalog is the static list of workers the gateway may launch. It is
//! read once at start-up, from a JSON file when one is given and otherwise
//! from the built-in table of node-based tool servers.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::router::DEFAULT_REQUEST_TIMEOUT;

/// Env var naming a catalog file, used when `--catalog` is not given.
pub const CATALOG_ENV: &str = "MCP_GATEWAY_CATALOG";

/// Root of the built-in catalog's `servers/` directory.
pub const BASE_DIR_ENV: &str = "MCP_BASE_DIR";

/// How to launch one worker. Immutable once the catalog is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Applied on top of the gateway's own environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl WorkerDescriptor {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid catalog {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate worker name in catalog: {0}")]
    DuplicateName(String),
    #[error("worker entry has an empty {0}")]
    EmptyField(&'static str),
}

#[derive(Deserialize)]
struct CatalogFile {
    workers: Vec<WorkerDescriptor>,
}

/// Built-in workers: (name, script under `servers/`, description).
const BUILTIN_WORKERS: &[(&str, &str, &str)] = &[
    ("filesystem", "filesystem-server.js", "File operations"),
    ("fetch", "fetch-server.js", "HTTP requests"),
    ("memory", "memory-server.js", "Persistent key-value storage"),
    ("git", "git-server.js", "Git operations"),
    ("sqlite", "sqlite-server.js", "SQLite database operations"),
    ("puppeteer", "puppeteer-server.js", "Browser automation"),
    ("webSearch", "web-search-server.js", "Web search"),
    ("docker", "docker-server.js", "Docker container management"),
    ("systemMonitor", "system-monitor-server.js", "System monitoring"),
    ("time", "time-server.js", "Time and timezone operations"),
    ("nodeSandbox", "node-sandbox-server.js", "JavaScript execution"),
    ("pythonSandbox", "python-sandbox-server.js", "Python execution"),
    ("selfLearning", "self-learning-server.js", "Documentation learning"),
    ("imageGeneration", "image-gen-server.js", "AI image generation"),
    ("everything", "everything-server.js", "Comprehensive test server"),
    (
        "sequentialThinking",
        "sequential-thinking-server.js",
        "Structured problem-solving",
    ),
    (
        "sequentialThinkingTools",
        "sequential-thinking-tools-server.js",
        "Enhanced tool guidance",
    ),
];

/// Ordered, name-unique list of worker descriptors.
#[derive(Debug, Clone, Default)]
pub struct WorkerCatalog {
    workers: Vec<WorkerDescriptor>,
}

impl WorkerCatalog {
    pub fn new(workers: Vec<WorkerDescriptor>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for worker in &workers {
            if worker.name.is_empty() {
                return Err(CatalogError::EmptyField("name"));
            }
            if worker.command.is_empty() {
                return Err(CatalogError::EmptyField("command"));
            }
            if !seen.insert(worker.name.as_str()) {
                return Err(CatalogError::DuplicateName(worker.name.clone()));
            }
        }
        Ok(Self { workers })
    }

    /// The node tool servers shipped alongside the gateway, resolved
    /// relative to `base_dir`.
    pub fn builtin(base_dir: &Path) -> Self {
        let servers = base_dir.join("servers");
        let workers = BUILTIN_WORKERS
            .iter()
            .map(|(name, file, description)| {
                WorkerDescriptor::new(*name, "node")
                    .with_description(*description)
                    .with_args([servers.join(file).to_string_lossy().into_owned()])
                    .with_env("NODE_ENV", "production")
            })
            .collect();
        Self { workers }
    }

    pub fn from_json_str(path: &Path, json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile =
            serde_json::from_str(json).map_err(|source| CatalogError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::new(file.workers)
    }

    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(path, &json)
    }

    /// Explicit path, then `MCP_GATEWAY_CATALOG`, then the built-in table
    /// rooted at `MCP_BASE_DIR` (or the working directory).
    pub fn load(explicit: Option<&Path>) -> Result<Self, CatalogError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var(CATALOG_ENV)
            && !path.is_empty()
        {
            return Self::from_file(Path::new(&path));
        }
        let base_dir = std::env::var_os(BASE_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self::builtin(&base_dir))
    }

    pub fn get(&self, name: &str) -> Option<&WorkerDescriptor> {
        self.workers.iter().find(|w| w.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerDescriptor> {
        self.workers.iter()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

/// Tuning shared by every worker handle.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long a request waits for its response, measured from the write.
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl GatewayConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
