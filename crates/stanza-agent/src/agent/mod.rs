//! Top-level agent lifecycle: configuration files in, running pipeline out.
//!
//! The builder gathers configuration globs, an optional plugin directory,
//! and an optional database path, then produces a [`LogAgent`] wrapping the
//! built pipeline. Startup and shutdown delegate to the pipeline's ordering
//! guarantees; shutdown additionally flushes the database.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use crate::database::{Database, PersistError, SledDatabase, StubDatabase};
use crate::operator::{BuildContext, BuildError, Operator, OperatorError, OperatorRegistry};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::plugin::{PluginError, PluginRegistry};

/// Errors from agent construction and configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The agent's YAML configuration document.
#[derive(Debug, Default, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl AgentConfig {
    /// Reads and merges every config file matched by `globs`, in order.
    /// Pipelines are appended together; zero matching files is an error.
    pub fn from_globs(globs: &[String]) -> Result<AgentConfig, AgentError> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for pattern in globs {
            let walker = glob::glob(pattern)
                .map_err(|e| AgentError::Config(format!("bad config glob '{pattern}': {e}")))?;
            for path in walker.flatten() {
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        if paths.is_empty() {
            return Err(AgentError::Config(format!(
                "no config files found for {globs:?}"
            )));
        }

        let mut merged = AgentConfig::default();
        for path in paths {
            let contents = std::fs::read_to_string(&path)?;
            let config: AgentConfig = serde_yaml::from_str(&contents)
                .map_err(|e| AgentError::Config(format!("parse {}: {e}", path.display())))?;
            merged.pipeline.0.extend(config.pipeline.0);
        }
        Ok(merged)
    }
}

/// Builder for a [`LogAgent`].
pub struct LogAgentBuilder {
    config_globs: Vec<String>,
    plugin_dir: Option<PathBuf>,
    database_path: Option<PathBuf>,
    registry: OperatorRegistry,
    default_output: Option<Arc<dyn Operator>>,
}

impl LogAgentBuilder {
    pub fn new() -> Self {
        LogAgentBuilder {
            config_globs: Vec::new(),
            plugin_dir: None,
            database_path: None,
            registry: OperatorRegistry::with_builtins(),
            default_output: None,
        }
    }

    /// Config file globs, expanded and merged in order.
    pub fn with_config_globs<I, S>(mut self, globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config_globs = globs.into_iter().map(Into::into).collect();
        self
    }

    /// Directory of plugin templates.
    pub fn with_plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugin_dir = Some(dir.into());
        self
    }

    /// Path of the on-disk checkpoint database. Without one, state lives
    /// in memory only.
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Replaces the operator registry (primarily for tests).
    pub fn with_registry(mut self, registry: OperatorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Routes operators with no downstream to this sink.
    pub fn with_default_output(mut self, output: Arc<dyn Operator>) -> Self {
        self.default_output = Some(output);
        self
    }

    /// Loads configuration from the globs and builds the agent.
    pub fn build(self) -> Result<LogAgent, AgentError> {
        let config = AgentConfig::from_globs(&self.config_globs)?;
        self.build_from_config(config)
    }

    /// Builds the agent from an already-loaded configuration.
    pub fn build_from_config(self, config: AgentConfig) -> Result<LogAgent, AgentError> {
        let database: Arc<dyn Database> = match &self.database_path {
            Some(path) => Arc::new(SledDatabase::open(path)?),
            None => Arc::new(StubDatabase::new()),
        };

        let plugins = match &self.plugin_dir {
            Some(dir) => PluginRegistry::load_dir(dir, &self.registry)?,
            None => PluginRegistry::new(),
        };

        let context = BuildContext::new(Arc::clone(&database));
        let pipeline = config.pipeline.build_pipeline(
            &context,
            &self.registry,
            &plugins,
            self.default_output,
        )?;

        Ok(LogAgent { pipeline, database })
    }
}

impl Default for LogAgentBuilder {
    fn default() -> Self {
        LogAgentBuilder::new()
    }
}

/// A built agent: the pipeline plus its backing database.
pub struct LogAgent {
    pipeline: Pipeline,
    database: Arc<dyn Database>,
}

impl LogAgent {
    /// The underlying pipeline, for inspection and rendering.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Starts the pipeline, sinks first.
    pub async fn start(&self) -> Result<(), OperatorError> {
        info!("starting agent");
        self.pipeline.start().await
    }

    /// Stops the pipeline, sources first, and flushes the database.
    /// Returns every stop error encountered.
    pub async fn stop(&self) -> Vec<OperatorError> {
        info!("stopping agent");
        let errors = self.pipeline.stop().await;
        if let Err(err) = self.database.sync() {
            error!(error = %err, "failed to sync database");
        }
        errors
    }
}
