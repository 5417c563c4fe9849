//! A sink that discards everything it receives.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::entry::Entry;
use crate::operator::builtin::decode_config;
use crate::operator::helper::OutputOperator;
use crate::operator::{BuildContext, BuildError, Operator, OperatorError};
use crate::pipeline::Params;

pub const TYPE: &str = "drop_output";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DropOutputConfig {
    pub id: Option<String>,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    operator_type: Option<String>,
}

pub(crate) fn build(
    params: Params,
    _context: &BuildContext,
) -> Result<Arc<dyn Operator>, BuildError> {
    let config: DropOutputConfig = decode_config(params)?;
    let id = config.id.unwrap_or_else(|| TYPE.to_string());
    Ok(DropOutput::new(&id))
}

pub struct DropOutput {
    output: OutputOperator,
}

impl DropOutput {
    /// Builds a drop sink directly, for use as a pipeline default output.
    pub fn new(id: &str) -> Arc<DropOutput> {
        Arc::new(DropOutput {
            output: OutputOperator::new(id, TYPE),
        })
    }
}

#[async_trait]
impl Operator for DropOutput {
    fn id(&self) -> String {
        self.output.id()
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
        false
    }

    fn output_ids(&self) -> Vec<String> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<Arc<dyn Operator>> {
        Vec::new()
    }

    fn set_outputs(&self, _candidates: &[Arc<dyn Operator>]) -> Result<(), BuildError> {
        Ok(())
    }

    async fn process(&self, _ctx: &CancellationToken, _entry: Entry) -> Result<(), OperatorError> {
        Ok(())
    }
}
