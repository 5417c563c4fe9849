//! A transformer that forwards entries unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::entry::Entry;
use crate::operator::builtin::decode_config;
use crate::operator::helper::{OnError, OutputIds, TransformerOperator};
use crate::operator::{BuildContext, BuildError, Operator, OperatorError};
use crate::pipeline::Params;

pub const TYPE: &str = "noop";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoopConfig {
    pub id: Option<String>,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    operator_type: Option<String>,
    #[serde(default)]
    pub output: OutputIds,
    #[serde(default)]
    pub on_error: OnError,
}

pub(crate) fn build(
    params: Params,
    _context: &BuildContext,
) -> Result<Arc<dyn Operator>, BuildError> {
    let config: NoopConfig = decode_config(params)?;
    let id = config.id.unwrap_or_else(|| TYPE.to_string());
    Ok(Arc::new(Noop {
        transformer: TransformerOperator::new(id, TYPE, config.output.into_vec(), config.on_error),
    }))
}

pub struct Noop {
    transformer: TransformerOperator,
}

#[async_trait]
impl Operator for Noop {
    fn id(&self) -> String {
        self.transformer.id()
    }

    fn operator_type(&self) -> &str {
        TYPE
    }

    async fn start(&self) -> Result<(), OperatorError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), OperatorError> {
        Ok(())
    }

    fn can_process(&self) -> bool {
        true
    }

    fn can_output(&self) -> bool {
        true
    }

    fn output_ids(&self) -> Vec<String> {
        self.transformer.writer().output_ids()
    }

    fn set_output_ids(&self, ids: Vec<String>) {
        self.transformer.writer().set_output_ids(ids);
    }

    fn outputs(&self) -> Vec<Arc<dyn Operator>> {
        self.transformer.writer().outputs()
    }

    fn set_outputs(&self, candidates: &[Arc<dyn Operator>]) -> Result<(), BuildError> {
        self.transformer.writer().resolve_outputs(candidates)
    }

    async fn process(&self, ctx: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        self.transformer.process_with(ctx, entry, |_| Ok(())).await
    }
}
