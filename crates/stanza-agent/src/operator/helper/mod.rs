//! Shared building blocks for operator implementations.
//!
//! Concrete operators compose these helpers instead of re-implementing the
//! contract: [`BasicOperator`] carries identity, [`WriterOperator`] adds
//! declared/resolved outputs and fan-out, [`TransformerOperator`] adds the
//! per-entry on-error policy, and [`InputOperator`]/[`OutputOperator`] pin
//! the capability flags for sources and sinks.
//!
//! Config plumbing shared by the typed operator configs also lives here:
//! the string-or-list [`OutputIds`] codec and the humantime-or-seconds
//! duration codec.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::entry::Entry;
use crate::operator::{BuildError, Operator, OperatorError};

pub mod severity;

/// Per-entry failure policy for transformers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Log the failure and forward the entry unchanged.
    #[default]
    Send,
    /// Log the failure and discard the entry.
    Drop,
}

/// Identity shared by every operator.
#[derive(Debug, Clone)]
pub struct BasicOperator {
    id: String,
    operator_type: &'static str,
}

impl BasicOperator {
    pub fn new(id: impl Into<String>, operator_type: &'static str) -> Self {
        BasicOperator {
            id: id.into(),
            operator_type,
        }
    }

    pub fn id(&self) -> String {
        self.id.clone()
    }

    pub fn operator_type(&self) -> &'static str {
        self.operator_type
    }
}

/// An operator half that emits entries downstream.
///
/// Holds the declared downstream IDs and, after wiring, the resolved
/// operator handles. `write` fans out in declared order; every output after
/// the first receives a clone taken before the first call, so no branch
/// observes another's mutations.
pub struct WriterOperator {
    basic: BasicOperator,
    output_ids: RwLock<Vec<String>>,
    outputs: RwLock<Vec<Arc<dyn Operator>>>,
}

impl WriterOperator {
    pub fn new(
        id: impl Into<String>,
        operator_type: &'static str,
        output_ids: Vec<String>,
    ) -> Self {
        WriterOperator {
            basic: BasicOperator::new(id, operator_type),
            output_ids: RwLock::new(output_ids),
            outputs: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> String {
        self.basic.id()
    }

    pub fn operator_type(&self) -> &'static str {
        self.basic.operator_type()
    }

    pub fn output_ids(&self) -> Vec<String> {
        self.output_ids.read().expect("output id lock").clone()
    }

    pub fn set_output_ids(&self, ids: Vec<String>) {
        *self.output_ids.write().expect("output id lock") = ids;
    }

    pub fn outputs(&self) -> Vec<Arc<dyn Operator>> {
        self.outputs.read().expect("output lock").clone()
    }

    /// Resolves declared IDs against the full operator set.
    pub fn resolve_outputs(&self, candidates: &[Arc<dyn Operator>]) -> Result<(), BuildError> {
        let ids = self.output_ids();
        let mut resolved: Vec<Arc<dyn Operator>> = Vec::with_capacity(ids.len());
        for output_id in &ids {
            let found = candidates.iter().find(|c| c.id() == *output_id);
            match found {
                Some(candidate) if candidate.can_process() => resolved.push(Arc::clone(candidate)),
                Some(_) => {
                    return Err(BuildError::OutputCannotProcess {
                        id: self.id(),
                        output: output_id.clone(),
                    })
                }
                None => {
                    return Err(BuildError::UnknownOutput {
                        id: self.id(),
                        output: output_id.clone(),
                    })
                }
            }
        }
        *self.outputs.write().expect("output lock") = resolved;
        Ok(())
    }

    /// Sends `entry` to every resolved output in declared order.
    pub async fn write(
        &self,
        ctx: &CancellationToken,
        entry: Entry,
    ) -> Result<(), OperatorError> {
        let outputs = self.outputs();
        match outputs.as_slice() {
            [] => Ok(()),
            [only] => only.process(ctx, entry).await,
            [first, rest @ ..] => {
                // Clones are taken before the first call so downstream
                // mutation cannot leak across branches.
                let clones: Vec<Entry> = rest.iter().map(|_| entry.clone()).collect();
                first.process(ctx, entry).await?;
                for (output, clone) in rest.iter().zip(clones) {
                    output.process(ctx, clone).await?;
                }
                Ok(())
            }
        }
    }
}

/// Writer plus the per-entry on-error policy.
pub struct TransformerOperator {
    writer: WriterOperator,
    on_error: OnError,
}

impl TransformerOperator {
    pub fn new(
        id: impl Into<String>,
        operator_type: &'static str,
        output_ids: Vec<String>,
        on_error: OnError,
    ) -> Self {
        TransformerOperator {
            writer: WriterOperator::new(id, operator_type, output_ids),
            on_error,
        }
    }

    pub fn writer(&self) -> &WriterOperator {
        &self.writer
    }

    pub fn id(&self) -> String {
        self.writer.id()
    }

    /// Runs `transform` over the entry and forwards the result.
    ///
    /// A failed transform is logged and handled per the on-error policy:
    /// `send` forwards the entry exactly as it arrived, `drop` discards it.
    /// Either way the failure stays local to this entry.
    pub async fn process_with<F>(
        &self,
        ctx: &CancellationToken,
        entry: Entry,
        transform: F,
    ) -> Result<(), OperatorError>
    where
        F: FnOnce(&mut Entry) -> Result<(), OperatorError>,
    {
        let original = match self.on_error {
            OnError::Send => Some(entry.clone()),
            OnError::Drop => None,
        };
        let mut entry = entry;
        match transform(&mut entry) {
            Ok(()) => self.writer.write(ctx, entry).await,
            Err(err) => {
                warn!(operator = %self.id(), error = %err, "failed to process entry");
                match original {
                    Some(untouched) => self.writer.write(ctx, untouched).await,
                    None => Ok(()),
                }
            }
        }
    }
}

/// Writer specialization for source operators (`can_process` = false).
pub struct InputOperator {
    writer: WriterOperator,
}

impl InputOperator {
    pub fn new(
        id: impl Into<String>,
        operator_type: &'static str,
        output_ids: Vec<String>,
    ) -> Self {
        InputOperator {
            writer: WriterOperator::new(id, operator_type, output_ids),
        }
    }

    pub fn writer(&self) -> &WriterOperator {
        &self.writer
    }

    pub fn id(&self) -> String {
        self.writer.id()
    }

    pub async fn write(
        &self,
        ctx: &CancellationToken,
        entry: Entry,
    ) -> Result<(), OperatorError> {
        self.writer.write(ctx, entry).await
    }
}

/// Sink half: accepts entries, never emits (`can_output` = false).
pub struct OutputOperator {
    basic: BasicOperator,
}

impl OutputOperator {
    pub fn new(id: impl Into<String>, operator_type: &'static str) -> Self {
        OutputOperator {
            basic: BasicOperator::new(id, operator_type),
        }
    }

    pub fn id(&self) -> String {
        self.basic.id()
    }

    pub fn operator_type(&self) -> &'static str {
        self.basic.operator_type()
    }
}

/// Downstream references in config: a bare string or a list of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputIds(pub Vec<String>);

impl OutputIds {
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for OutputIds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdsVisitor;

        impl<'de> Visitor<'de> for IdsVisitor {
            type Value = OutputIds;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a string or a list of strings")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(OutputIds(vec![v.to_string()]))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut ids = Vec::new();
                while let Some(id) = seq.next_element::<String>()? {
                    ids.push(id);
                }
                Ok(OutputIds(ids))
            }
        }

        deserializer.deserialize_any(IdsVisitor)
    }
}

/// Deserializes a duration from a humantime string (`200ms`, `2s`) or a
/// bare number of seconds.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a duration string or a number of seconds")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            if v < 0 {
                return Err(E::custom("duration cannot be negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            if !v.is_finite() || v < 0.0 {
                return Err(E::custom("duration must be a non-negative number"));
            }
            Ok(Duration::from_secs_f64(v))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            humantime::parse_duration(v).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Value;
    use crate::testutil::FakeOutput;

    fn wired_writer(outputs: &[Arc<dyn Operator>]) -> WriterOperator {
        let ids = outputs.iter().map(|o| o.id()).collect();
        let writer = WriterOperator::new("$.writer", "test_writer", ids);
        writer.resolve_outputs(outputs).expect("wiring succeeds");
        writer
    }

    #[test]
    fn resolve_rejects_missing_output() {
        let writer = WriterOperator::new("$.writer", "test_writer", vec!["$.gone".to_string()]);
        let err = writer.resolve_outputs(&[]).expect_err("must fail");
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn fan_out_clones_are_isolated() {
        let first = FakeOutput::new("$.first");
        let second = FakeOutput::new("$.second");
        let outputs: Vec<Arc<dyn Operator>> = vec![first.clone(), second.clone()];
        let writer = wired_writer(&outputs);

        let ctx = CancellationToken::new();
        writer
            .write(&ctx, Entry::from_record("shared"))
            .await
            .expect("write succeeds");

        let a = first.next_entry().await.expect("first entry");
        let b = second.next_entry().await.expect("second entry");
        assert_eq!(a.record, Value::from("shared"));
        assert_eq!(b.record, Value::from("shared"));
    }

    #[tokio::test]
    async fn on_error_send_forwards_untouched_entry() {
        let sink = FakeOutput::new("$.sink");
        let outputs: Vec<Arc<dyn Operator>> = vec![sink.clone()];
        let transformer = TransformerOperator::new(
            "$.t",
            "test_transformer",
            vec!["$.sink".to_string()],
            OnError::Send,
        );
        transformer
            .writer()
            .resolve_outputs(&outputs)
            .expect("wiring");

        let ctx = CancellationToken::new();
        transformer
            .process_with(&ctx, Entry::from_record("original"), |entry| {
                entry.record = Value::from("half-mutated");
                Err(OperatorError::process("$.t", "boom"))
            })
            .await
            .expect("policy swallows the failure");

        let forwarded = sink.next_entry().await.expect("entry forwarded");
        assert_eq!(forwarded.record, Value::from("original"));
    }

    #[tokio::test]
    async fn on_error_drop_discards_entry() {
        let sink = FakeOutput::new("$.sink");
        let outputs: Vec<Arc<dyn Operator>> = vec![sink.clone()];
        let transformer = TransformerOperator::new(
            "$.t",
            "test_transformer",
            vec!["$.sink".to_string()],
            OnError::Drop,
        );
        transformer
            .writer()
            .resolve_outputs(&outputs)
            .expect("wiring");

        let ctx = CancellationToken::new();
        transformer
            .process_with(&ctx, Entry::from_record("doomed"), |_| {
                Err(OperatorError::process("$.t", "boom"))
            })
            .await
            .expect("policy swallows the failure");

        assert!(sink.try_next_entry().is_none());
    }

    #[test]
    fn output_ids_accepts_string_or_list() {
        #[derive(Deserialize)]
        struct Probe {
            output: OutputIds,
        }

        let single: Probe = serde_yaml::from_str("output: downstream").expect("string form");
        assert_eq!(single.output.0, vec!["downstream".to_string()]);

        let many: Probe = serde_yaml::from_str("output: [a, b]").expect("list form");
        assert_eq!(many.output.0, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn duration_accepts_humantime_and_seconds() {
        #[derive(Deserialize)]
        struct Probe {
            #[serde(deserialize_with = "deserialize_duration")]
            interval: Duration,
        }

        let p: Probe = serde_yaml::from_str("interval: 200ms").expect("humantime");
        assert_eq!(p.interval, Duration::from_millis(200));

        let p: Probe = serde_yaml::from_str("interval: 2").expect("seconds");
        assert_eq!(p.interval, Duration::from_secs(2));

        let p: Probe = serde_yaml::from_str("interval: 0.5").expect("fractional seconds");
        assert_eq!(p.interval, Duration::from_millis(500));

        assert!(serde_yaml::from_str::<Probe>("interval: nonsense").is_err());
    }
}
