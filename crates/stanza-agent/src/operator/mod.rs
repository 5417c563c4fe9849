//! The operator contract and the registry of operator types.
//!
//! Every pipeline node (input, transformer, or sink) implements
//! [`Operator`]. The contract is uniform: identity, lifecycle
//! (`start`/`stop`, both idempotent), capability flags
//! (`can_process`/`can_output`), wiring (`set_outputs`, called once after
//! every operator exists), and the synchronous-from-the-caller
//! [`Operator::process`] through which entries flow.
//!
//! Operator types are constructed through an [`OperatorRegistry`]: an
//! explicit object rather than process-global state, so tests can assemble
//! isolated registries with fake types.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::database::{Database, PersistError};
use crate::entry::Entry;
use crate::pipeline::Params;
use crate::plugin::PluginError;

pub mod builtin;
pub mod helper;

/// Errors produced while turning configuration into a runnable pipeline.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing required `type` field")]
    MissingType,

    #[error("unsupported `type` for operator config: {0}")]
    UnknownType(String),

    #[error("build operator {id}: {source}")]
    InvalidConfig {
        id: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("build operator {id}: {message}")]
    Invalid { id: String, message: String },

    #[error("operator {id} output '{output}' does not exist")]
    UnknownOutput { id: String, output: String },

    #[error("operator {id} output '{output}' cannot process entries")]
    OutputCannotProcess { id: String, output: String },

    #[error("pipeline contains a cycle through operator {id}")]
    Cycle { id: String },

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl BuildError {
    /// Convenience for operator-scoped validation failures.
    pub fn invalid(id: impl Into<String>, message: impl Into<String>) -> BuildError {
        BuildError::Invalid {
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by operator lifecycle and entry processing.
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("operator {operator}: {message}")]
    Process { operator: String, message: String },

    #[error("start operator {operator}: {message}")]
    Startup { operator: String, message: String },

    #[error("stop operator {operator}: {message}")]
    Shutdown { operator: String, message: String },
}

impl OperatorError {
    pub fn process(operator: impl Into<String>, message: impl Into<String>) -> OperatorError {
        OperatorError::Process {
            operator: operator.into(),
            message: message.into(),
        }
    }
}

/// A pipeline node.
///
/// Implementations are shared as `Arc<dyn Operator>`; interior mutability
/// covers the one-shot output wiring and any background task handles.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Unique ID within the built pipeline, after namespacing.
    fn id(&self) -> String;

    /// The registered factory name this operator was built from.
    fn operator_type(&self) -> &str;

    /// Begins background work. Idempotent; returns promptly.
    async fn start(&self) -> Result<(), OperatorError>;

    /// Signals background work to quiesce, waits for it, and flushes any
    /// pending state. Idempotent.
    async fn stop(&self) -> Result<(), OperatorError>;

    /// True if this operator accepts inbound entries.
    fn can_process(&self) -> bool;

    /// True if this operator emits to downstream operators.
    fn can_output(&self) -> bool;

    /// The declared downstream IDs, before or after resolution.
    fn output_ids(&self) -> Vec<String>;

    /// Replaces the declared downstream IDs. Used by the pipeline builder
    /// to apply default-output linkage to operators that declared none;
    /// sinks ignore it.
    fn set_output_ids(&self, _ids: Vec<String>) {}

    /// The resolved downstream operators. Empty for sinks and before
    /// wiring.
    fn outputs(&self) -> Vec<Arc<dyn Operator>>;

    /// Resolves declared downstream IDs against the full operator set.
    ///
    /// Fails if a declared ID is missing or names an operator that cannot
    /// process entries.
    fn set_outputs(&self, candidates: &[Arc<dyn Operator>]) -> Result<(), BuildError>;

    /// Handles one entry. Called by upstream operators; synchronous from
    /// the caller's viewpoint and free to block. Must return promptly once
    /// `ctx` is cancelled.
    async fn process(&self, ctx: &CancellationToken, entry: Entry) -> Result<(), OperatorError>;
}

/// Resources available to operator factories at build time.
pub struct BuildContext {
    /// Database from which operators mint their persistence scope.
    pub database: Arc<dyn Database>,
}

impl BuildContext {
    pub fn new(database: Arc<dyn Database>) -> Self {
        BuildContext { database }
    }
}

impl Default for BuildContext {
    fn default() -> Self {
        BuildContext {
            database: Arc::new(crate::database::StubDatabase::new()),
        }
    }
}

/// Factory signature: bind a parameter map to a typed config and build.
pub type BuilderFn = fn(Params, &BuildContext) -> Result<Arc<dyn Operator>, BuildError>;

/// Explicit mapping from operator type name to factory.
#[derive(Clone, Default)]
pub struct OperatorRegistry {
    builders: HashMap<String, BuilderFn>,
}

impl OperatorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        OperatorRegistry::default()
    }

    /// A registry with every builtin operator type registered.
    pub fn with_builtins() -> Self {
        let mut registry = OperatorRegistry::new();
        registry.register(builtin::input::generate::TYPE, builtin::input::generate::build);
        registry.register(builtin::input::file::TYPE, builtin::input::file::build);
        registry.register(builtin::transformer::noop::TYPE, builtin::transformer::noop::build);
        registry.register(
            builtin::transformer::rate_limit::TYPE,
            builtin::transformer::rate_limit::build,
        );
        registry.register(
            builtin::transformer::metadata::TYPE,
            builtin::transformer::metadata::build,
        );
        registry.register(builtin::parser::regex::TYPE, builtin::parser::regex::build);
        registry.register(
            builtin::parser::severity::TYPE,
            builtin::parser::severity::build,
        );
        registry.register(builtin::output::drop::TYPE, builtin::output::drop::build);
        registry.register(builtin::output::stdout::TYPE, builtin::output::stdout::build);
        registry
    }

    /// Registers `builder` under `operator_type`, replacing any previous
    /// registration of the same name.
    pub fn register(&mut self, operator_type: &str, builder: BuilderFn) {
        self.builders.insert(operator_type.to_string(), builder);
    }

    /// True if `operator_type` has a registered factory.
    pub fn is_registered(&self, operator_type: &str) -> bool {
        self.builders.contains_key(operator_type)
    }

    /// Builds an operator from its parameter map.
    pub fn build(
        &self,
        operator_type: &str,
        params: Params,
        context: &BuildContext,
    ) -> Result<Arc<dyn Operator>, BuildError> {
        let builder = self
            .builders
            .get(operator_type)
            .ok_or_else(|| BuildError::UnknownType(operator_type.to_string()))?;
        builder(params, context)
    }
}
