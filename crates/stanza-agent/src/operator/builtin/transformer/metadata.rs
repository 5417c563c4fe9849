//! A transformer that merges configured labels into each entry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::entry::Entry;
use crate::operator::builtin::decode_config;
use crate::operator::helper::{OnError, OutputIds, TransformerOperator};
use crate::operator::{BuildContext, BuildError, Operator, OperatorError};
use crate::pipeline::Params;

pub const TYPE: &str = "metadata";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataConfig {
    pub id: Option<String>,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    operator_type: Option<String>,
    #[serde(default)]
    pub output: OutputIds,
    #[serde(default)]
    pub on_error: OnError,
    /// Labels written onto every entry; existing keys are overwritten.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

pub(crate) fn build(
    params: Params,
    _context: &BuildContext,
) -> Result<Arc<dyn Operator>, BuildError> {
    let config: MetadataConfig = decode_config(params)?;
    let id = config.id.unwrap_or_else(|| TYPE.to_string());
    Ok(Arc::new(Metadata {
        transformer: TransformerOperator::new(id, TYPE, config.output.into_vec(), config.on_error),
        labels: config.labels,
    }))
}

pub struct Metadata {
    transformer: TransformerOperator,
    labels: HashMap<String, String>,
}

#[async_trait]
impl Operator for Metadata {
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
        self.transformer
            .process_with(ctx, entry, |entry| {
                for (key, value) in &self.labels {
                    entry.labels.insert(key.clone(), value.clone());
                }
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{build_context, FakeOutput};

    #[tokio::test]
    async fn labels_are_merged() {
        let params: Params = serde_yaml::from_str(
            "{id: $.meta, type: metadata, output: $.fake, labels: {env: prod}}",
        )
        .expect("valid yaml");
        let operator = build(params, &build_context()).expect("builds");

        let fake = FakeOutput::new("$.fake");
        let candidates: Vec<Arc<dyn Operator>> = vec![fake.clone()];
        operator.set_outputs(&candidates).expect("wiring");

        let ctx = CancellationToken::new();
        operator
            .process(&ctx, Entry::from_record("body"))
            .await
            .expect("processes");

        let entry = fake.next_entry().await.expect("forwarded");
        assert_eq!(entry.labels.get("env"), Some(&"prod".to_string()));
    }
}
