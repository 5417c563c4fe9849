//! An input that emits a configured entry a fixed number of times.
//!
//! Used for smoke-testing pipelines and as the canonical example of the
//! input lifecycle: a background task that writes downstream until it is
//! done or cancelled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::entry::{Entry, Severity, Value};
use crate::operator::builtin::decode_config;
use crate::operator::helper::{InputOperator, OutputIds};
use crate::operator::{BuildContext, BuildError, Operator, OperatorError};
use crate::pipeline::Params;

pub const TYPE: &str = "generate_input";

/// The entry emitted on every tick.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryTemplate {
    #[serde(default)]
    pub record: Value,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub severity: Option<Severity>,
}

impl EntryTemplate {
    fn build_entry(&self) -> Entry {
        let mut entry = Entry::from_record(self.record.clone());
        entry.labels = self.labels.clone();
        if let Some(severity) = self.severity {
            entry.severity = severity;
        }
        entry
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateInputConfig {
    pub id: Option<String>,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    operator_type: Option<String>,
    #[serde(default)]
    pub output: OutputIds,
    /// How many entries to emit; 0 means until stopped.
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub entry: EntryTemplate,
}

pub(crate) fn build(
    params: Params,
    _context: &BuildContext,
) -> Result<Arc<dyn Operator>, BuildError> {
    let config: GenerateInputConfig = decode_config(params)?;
    let id = config.id.unwrap_or_else(|| TYPE.to_string());
    Ok(Arc::new(GenerateInput {
        core: Arc::new(GenerateCore {
            input: InputOperator::new(id, TYPE, config.output.into_vec()),
            count: config.count,
            template: config.entry,
        }),
        task: Mutex::new(None),
    }))
}

struct GenerateCore {
    input: InputOperator,
    count: u64,
    template: EntryTemplate,
}

/// Emits the configured entry from a background task.
pub struct GenerateInput {
    core: Arc<GenerateCore>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

#[async_trait]
impl Operator for GenerateInput {
    fn id(&self) -> String {
        self.core.input.id()
    }

    fn operator_type(&self) -> &str {
        TYPE
    }

    async fn start(&self) -> Result<(), OperatorError> {
        let mut task = self.task.lock().expect("task lock");
        if task.is_some() {
            return Ok(());
        }

        let token = CancellationToken::new();
        let child = token.clone();
        let core = Arc::clone(&self.core);
        let handle = tokio::spawn(async move {
            let mut emitted = 0u64;
            loop {
                if child.is_cancelled() {
                    return;
                }
                if core.count > 0 && emitted >= core.count {
                    // Done generating; stay alive until stopped so the
                    // pipeline's shutdown ordering is undisturbed.
                    child.cancelled().await;
                    return;
                }
                let entry = core.template.build_entry();
                if let Err(err) = core.input.write(&child, entry).await {
                    warn!(operator = %core.input.id(), error = %err, "failed to write entry");
                }
                emitted += 1;
                tokio::task::yield_now().await;
            }
        });
        *task = Some((token, handle));
        Ok(())
    }

    async fn stop(&self) -> Result<(), OperatorError> {
        let taken = self.task.lock().expect("task lock").take();
        if let Some((token, handle)) = taken {
            token.cancel();
            let _ = handle.await;
        }
        Ok(())
    }

    fn can_process(&self) -> bool {
        false
    }

    fn can_output(&self) -> bool {
        true
    }

    fn output_ids(&self) -> Vec<String> {
        self.core.input.writer().output_ids()
    }

    fn set_output_ids(&self, ids: Vec<String>) {
        self.core.input.writer().set_output_ids(ids);
    }

    fn outputs(&self) -> Vec<Arc<dyn Operator>> {
        self.core.input.writer().outputs()
    }

    fn set_outputs(&self, candidates: &[Arc<dyn Operator>]) -> Result<(), BuildError> {
        self.core.input.writer().resolve_outputs(candidates)
    }

    async fn process(&self, _ctx: &CancellationToken, _entry: Entry) -> Result<(), OperatorError> {
        Err(OperatorError::process(
            self.id(),
            "input operators do not process entries",
        ))
    }
}
