//! A sink that writes one JSON object per entry to stdout.

use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::entry::Entry;
use crate::operator::builtin::decode_config;
use crate::operator::helper::OutputOperator;
use crate::operator::{BuildContext, BuildError, Operator, OperatorError};
use crate::pipeline::Params;

pub const TYPE: &str = "stdout";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StdoutConfig {
    pub id: Option<String>,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    operator_type: Option<String>,
}

pub(crate) fn build(
    params: Params,
    _context: &BuildContext,
) -> Result<Arc<dyn Operator>, BuildError> {
    let config: StdoutConfig = decode_config(params)?;
    let id = config.id.unwrap_or_else(|| TYPE.to_string());
    Ok(Arc::new(StdoutOutput {
        output: OutputOperator::new(id, TYPE),
        writer: Mutex::new(Box::new(std::io::stdout())),
    }))
}

pub struct StdoutOutput {
    output: OutputOperator,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl StdoutOutput {
    /// Builds a stdout sink with an injected writer, for tests.
    pub fn with_writer(id: &str, writer: Box<dyn Write + Send>) -> Arc<StdoutOutput> {
        Arc::new(StdoutOutput {
            output: OutputOperator::new(id, TYPE),
            writer: Mutex::new(writer),
        })
    }
}

#[async_trait]
impl Operator for StdoutOutput {
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
        let mut writer = self.writer.lock().expect("writer lock");
        writer
            .flush()
            .map_err(|e| OperatorError::Shutdown {
                operator: self.id(),
                message: e.to_string(),
            })
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

    async fn process(&self, _ctx: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        let line = serde_json::to_string(&entry)
            .map_err(|e| OperatorError::process(self.id(), format!("encode entry: {e}")))?;
        let mut writer = self.writer.lock().expect("writer lock");
        writeln!(writer, "{line}")
            .map_err(|e| OperatorError::process(self.id(), format!("write entry: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingWriter(Arc<AtomicUsize>);

    impl Write for CountingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.fetch_add(buf.len(), Ordering::SeqCst);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn writes_one_line_per_entry() {
        let written = Arc::new(AtomicUsize::new(0));
        let sink = StdoutOutput::with_writer("$.stdout", Box::new(CountingWriter(written.clone())));

        let ctx = CancellationToken::new();
        sink.process(&ctx, Entry::from_record(Value::from("hello")))
            .await
            .expect("processes");
        assert!(written.load(Ordering::SeqCst) > 0);
    }
}
