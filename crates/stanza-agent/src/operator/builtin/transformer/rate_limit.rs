//! A transformer that limits entry throughput with a token bucket.
//!
//! A background task refills the bucket at `rate` tokens per second, up to
//! `burst` capacity. `process` takes one token per entry, blocking until a
//! token is available or the caller's context is cancelled, so
//! backpressure propagates upstream through the blocked call.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::entry::Entry;
use crate::operator::builtin::decode_config;
use crate::operator::helper::{OnError, OutputIds, TransformerOperator};
use crate::operator::{BuildContext, BuildError, Operator, OperatorError};
use crate::pipeline::Params;

pub const TYPE: &str = "rate_limit";

fn default_burst() -> u64 {
    10
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    pub id: Option<String>,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    operator_type: Option<String>,
    #[serde(default)]
    pub output: OutputIds,
    #[serde(default)]
    pub on_error: OnError,
    /// Tokens per second.
    pub rate: f64,
    /// Bucket capacity.
    #[serde(default = "default_burst")]
    pub burst: u64,
}

pub(crate) fn build(
    params: Params,
    _context: &BuildContext,
) -> Result<Arc<dyn Operator>, BuildError> {
    let config: RateLimitConfig = decode_config(params)?;
    let id = config.id.unwrap_or_else(|| TYPE.to_string());
    if !config.rate.is_finite() || config.rate <= 0.0 {
        return Err(BuildError::invalid(id, "`rate` must be a positive number"));
    }

    let capacity = config.burst.max(1) as usize;
    let (refill_tx, tokens) = mpsc::channel::<()>(capacity);
    Ok(Arc::new(RateLimit {
        transformer: Arc::new(TransformerOperator::new(
            id,
            TYPE,
            config.output.into_vec(),
            config.on_error,
        )),
        rate: config.rate,
        refill_tx,
        tokens: tokio::sync::Mutex::new(tokens),
        task: Mutex::new(None),
    }))
}

pub struct RateLimit {
    transformer: Arc<TransformerOperator>,
    rate: f64,
    refill_tx: mpsc::Sender<()>,
    tokens: tokio::sync::Mutex<mpsc::Receiver<()>>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

#[async_trait]
impl Operator for RateLimit {
    fn id(&self) -> String {
        self.transformer.id()
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
        let refill_tx = self.refill_tx.clone();
        let period = Duration::from_secs_f64(1.0 / self.rate);
        let handle = tokio::spawn(async move {
            // Start with a full bucket.
            while refill_tx.try_send(()).is_ok() {}

            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    () = child.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    () = child.cancelled() => return,
                    sent = refill_tx.send(()) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
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
        let received = {
            let mut tokens = self.tokens.lock().await;
            tokio::select! {
                () = ctx.cancelled() => return Err(OperatorError::Cancelled),
                received = tokens.recv() => received,
            }
        };
        match received {
            Some(()) => self.transformer.process_with(ctx, entry, |_| Ok(())).await,
            None => Err(OperatorError::process(self.id(), "rate limiter stopped")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{build_context, FakeOutput};
    use std::time::Instant;

    #[tokio::test]
    async fn throughput_tracks_configured_rate() {
        let params: Params = serde_yaml::from_str(
            "{id: $.my_rate_limit, type: rate_limit, rate: 10000, burst: 50, output: $.fake}",
        )
        .expect("valid yaml");
        let rate_limit = build(params, &build_context()).expect("builds");

        let fake = FakeOutput::new("$.fake");
        let candidates: Vec<Arc<dyn Operator>> = vec![fake.clone()];
        rate_limit.set_outputs(&candidates).expect("wiring");
        rate_limit.start().await.expect("starts");

        let ctx = CancellationToken::new();
        let producer_ctx = ctx.clone();
        let producer_limit = Arc::clone(&rate_limit);
        let producer = tokio::spawn(async move {
            while !producer_ctx.is_cancelled() {
                if producer_limit
                    .process(&producer_ctx, Entry::new())
                    .await
                    .is_err()
                {
                    return;
                }
            }
        });

        let deadline = Instant::now() + Duration::from_secs(1);
        let mut received = 0u64;
        while Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(20), fake.next_entry()).await {
                Ok(Some(_)) => received += 1,
                _ => {}
            }
        }

        ctx.cancel();
        let _ = producer.await;
        rate_limit.stop().await.expect("stops");

        assert!(
            (7000..=13000).contains(&received),
            "received {received} entries, expected 10000 +/- 3000"
        );
    }

    #[test]
    fn rate_must_be_positive() {
        let params: Params =
            serde_yaml::from_str("{id: $.rl, type: rate_limit, rate: 0}").expect("valid yaml");
        let err = build(params, &build_context()).err().expect("zero rate");
        assert!(err.to_string().contains("positive"));
    }
}
