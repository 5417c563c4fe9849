//! A parser that assigns severity from a sample field.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::entry::{Entry, Field};
use crate::operator::builtin::decode_config;
use crate::operator::helper::severity::{MappingSet, SeverityMapper, SeverityMapperConfig};
use crate::operator::helper::{OnError, OutputIds, TransformerOperator};
use crate::operator::{BuildContext, BuildError, Operator, OperatorError};
use crate::pipeline::Params;

pub const TYPE: &str = "severity_parser";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeverityParserConfig {
    pub id: Option<String>,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    operator_type: Option<String>,
    #[serde(default)]
    pub output: OutputIds,
    #[serde(default)]
    pub on_error: OnError,
    /// The field whose value is matched against the mapping.
    pub parse_from: Field,
    #[serde(default)]
    pub mapping: serde_yaml::Mapping,
    #[serde(default, alias = "mappingSet")]
    pub mapping_set: MappingSet,
}

pub(crate) fn build(
    params: Params,
    _context: &BuildContext,
) -> Result<Arc<dyn Operator>, BuildError> {
    let config: SeverityParserConfig = decode_config(params)?;
    let id = config.id.unwrap_or_else(|| TYPE.to_string());
    let mapper = SeverityMapperConfig {
        mapping: config.mapping,
        mapping_set: config.mapping_set,
    }
    .build()
    .map_err(|e| BuildError::invalid(&id, e.to_string()))?;
    Ok(Arc::new(SeverityParser {
        transformer: TransformerOperator::new(id, TYPE, config.output.into_vec(), config.on_error),
        parse_from: config.parse_from,
        mapper,
    }))
}

pub struct SeverityParser {
    transformer: TransformerOperator,
    parse_from: Field,
    mapper: SeverityMapper,
}

#[async_trait]
impl Operator for SeverityParser {
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
        let id = self.id();
        self.transformer
            .process_with(ctx, entry, |entry| {
                let sample = entry.get(&self.parse_from).ok_or_else(|| {
                    OperatorError::process(&id, format!("field {} not present", self.parse_from))
                })?;
                let severity = self
                    .mapper
                    .lookup(&sample)
                    .map_err(|e| OperatorError::process(&id, e.to_string()))?;
                entry.severity = severity;
                Ok(())
            })
            .await
    }
}
