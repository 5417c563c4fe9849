//! Test support: capture operators and build scaffolding.
//!
//! Shipped as a normal module so integration tests (and downstream crates
//! testing their own operators) can use it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::entry::Entry;
use crate::operator::helper::OutputOperator;
use crate::operator::{BuildContext, BuildError, Operator, OperatorError};

/// A sink that captures every processed entry for later assertions.
pub struct FakeOutput {
    output: OutputOperator,
    tx: mpsc::UnboundedSender<Entry>,
    rx: Mutex<mpsc::UnboundedReceiver<Entry>>,
}

impl FakeOutput {
    /// Creates a capture sink with the given operator ID.
    pub fn new(id: &str) -> Arc<FakeOutput> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(FakeOutput {
            output: OutputOperator::new(id, "fake_output"),
            tx,
            rx: Mutex::new(rx),
        })
    }

    /// Waits up to five seconds for the next captured entry.
    pub async fn next_entry(&self) -> Option<Entry> {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Returns an already-captured entry without waiting.
    pub fn try_next_entry(&self) -> Option<Entry> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Asserts that nothing arrives within `window`.
    pub async fn expect_silence(&self, window: Duration) {
        let mut rx = self.rx.lock().await;
        let received = tokio::time::timeout(window, rx.recv()).await;
        assert!(
            received.is_err(),
            "expected no entries, got {:?}",
            received.expect("timeout elapsed")
        );
    }
}

#[async_trait]
impl Operator for FakeOutput {
    fn id(&self) -> String {
        self.output.id()
    }

    fn operator_type(&self) -> &str {
        self.output.operator_type()
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

    async fn process(&self, _ctx: &CancellationToken, entry: Entry) -> Result<(), OperatorError> {
        self.tx
            .send(entry)
            .map_err(|_| OperatorError::process(self.id(), "fake output receiver dropped"))
    }
}

/// A build context backed by the in-memory stub database.
pub fn build_context() -> BuildContext {
    BuildContext::default()
}
