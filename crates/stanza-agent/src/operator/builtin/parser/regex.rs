//! A parser that restructures a string field using named capture groups.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::entry::{Entry, Field, Value};
use crate::operator::builtin::decode_config;
use crate::operator::helper::{OnError, OutputIds, TransformerOperator};
use crate::operator::{BuildContext, BuildError, Operator, OperatorError};
use crate::pipeline::Params;

pub const TYPE: &str = "regex_parser";

fn default_field() -> Field {
    Field::record_root()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegexParserConfig {
    pub id: Option<String>,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    operator_type: Option<String>,
    #[serde(default)]
    pub output: OutputIds,
    #[serde(default)]
    pub on_error: OnError,
    /// Pattern with at least one named capture group.
    pub regex: String,
    #[serde(default = "default_field")]
    pub parse_from: Field,
    #[serde(default = "default_field")]
    pub parse_to: Field,
}

pub(crate) fn build(
    params: Params,
    _context: &BuildContext,
) -> Result<Arc<dyn Operator>, BuildError> {
    let config: RegexParserConfig = decode_config(params)?;
    let id = config.id.unwrap_or_else(|| TYPE.to_string());

    let regex = Regex::new(&config.regex)
        .map_err(|e| BuildError::invalid(&id, format!("compile regex: {e}")))?;
    if regex.capture_names().flatten().next().is_none() {
        return Err(BuildError::invalid(
            id,
            "regex must contain at least one named capture group",
        ));
    }

    Ok(Arc::new(RegexParser {
        transformer: TransformerOperator::new(id, TYPE, config.output.into_vec(), config.on_error),
        regex,
        parse_from: config.parse_from,
        parse_to: config.parse_to,
    }))
}

pub struct RegexParser {
    transformer: TransformerOperator,
    regex: Regex,
    parse_from: Field,
    parse_to: Field,
}

#[async_trait]
impl Operator for RegexParser {
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
                let value = entry
                    .get(&self.parse_from)
                    .ok_or_else(|| {
                        OperatorError::process(&id, format!("field {} not present", self.parse_from))
                    })?;
                let text = value.as_str().ok_or_else(|| {
                    OperatorError::process(&id, format!("field {} is not a string", self.parse_from))
                })?;
                let captures = self.regex.captures(text).ok_or_else(|| {
                    OperatorError::process(&id, "regex pattern does not match field")
                })?;

                let mut parsed = BTreeMap::new();
                for name in self.regex.capture_names().flatten() {
                    if let Some(matched) = captures.name(name) {
                        parsed.insert(name.to_string(), Value::from(matched.as_str()));
                    }
                }
                entry.set(&self.parse_to, Value::Map(parsed));
                Ok(())
            })
            .await
    }
}
