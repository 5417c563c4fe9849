//! The validated operator graph and its start/stop discipline.
//!
//! Start visits operators in reverse topological order, sinks first and
//! sources last, so every downstream is ready before an input emits its
//! first entry. Stop visits in topological order: sources quiesce their
//! producers, then transformers and sinks drain naturally. If any start
//! fails, everything already started is stopped again and the error is
//! returned.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use petgraph::dot::{Config as DotConfig, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use tracing::{debug, error, warn};

use crate::operator::{BuildError, Operator, OperatorError};

/// A built pipeline: the operator set plus its validated graph.
pub struct Pipeline {
    operators: Vec<Arc<dyn Operator>>,
    graph: DiGraph<String, &'static str>,
    node_indices: HashMap<String, NodeIndex>,
    /// Operator indexes in topological order (sources first).
    topo_order: Vec<usize>,
    started: Mutex<bool>,
}

impl Pipeline {
    /// Validates the wired operator set as a DAG.
    pub(crate) fn new(operators: Vec<Arc<dyn Operator>>) -> Result<Pipeline, BuildError> {
        let mut graph = DiGraph::new();
        let mut node_indices = HashMap::new();
        for operator in &operators {
            let index = graph.add_node(operator.id());
            node_indices.insert(operator.id(), index);
        }
        for operator in &operators {
            let from = node_indices[&operator.id()];
            for output in operator.outputs() {
                let to = node_indices[&output.id()];
                graph.add_edge(from, to, "");
            }
        }

        let sorted = petgraph::algo::toposort(&graph, None).map_err(|cycle| {
            let id = graph[cycle.node_id()].clone();
            BuildError::Cycle { id }
        })?;

        let operator_index: HashMap<String, usize> = operators
            .iter()
            .enumerate()
            .map(|(i, op)| (op.id(), i))
            .collect();
        let topo_order: Vec<usize> = sorted
            .iter()
            .map(|node| operator_index[&graph[*node]])
            .collect();

        let pipeline = Pipeline {
            operators,
            graph,
            node_indices,
            topo_order,
            started: Mutex::new(false),
        };
        pipeline.warn_unreachable();
        Ok(pipeline)
    }

    /// Warns about operators no input can reach. Not fatal: the graph
    /// still runs, and the DOT render makes the orphan visible.
    fn warn_unreachable(&self) {
        let mut reached: HashSet<NodeIndex> = HashSet::new();
        for operator in &self.operators {
            if !operator.can_process() {
                let start = self.node_indices[&operator.id()];
                let mut bfs = Bfs::new(&self.graph, start);
                while let Some(node) = bfs.next(&self.graph) {
                    reached.insert(node);
                }
            }
        }
        for operator in &self.operators {
            if operator.can_process() && !reached.contains(&self.node_indices[&operator.id()]) {
                warn!(operator = %operator.id(), "operator is unreachable from any input");
            }
        }
    }

    /// The operators in this pipeline, in configuration order.
    pub fn operators(&self) -> &[Arc<dyn Operator>] {
        &self.operators
    }

    /// Looks up one operator by its fully qualified ID.
    pub fn operator(&self, id: &str) -> Option<Arc<dyn Operator>> {
        self.operators.iter().find(|op| op.id() == id).cloned()
    }

    /// True if the graph has a declared edge between the two IDs.
    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        match (self.node_indices.get(from), self.node_indices.get(to)) {
            (Some(a), Some(b)) => self.graph.find_edge(*a, *b).is_some(),
            _ => false,
        }
    }

    /// Starts every operator, sinks first. On failure, already-started
    /// operators are stopped again and the error is returned.
    pub async fn start(&self) -> Result<(), OperatorError> {
        {
            let mut started = self.started.lock().expect("start lock");
            if *started {
                return Ok(());
            }
            *started = true;
        }
        debug!("starting pipeline");

        let mut running: HashSet<usize> = HashSet::new();
        for &index in self.topo_order.iter().rev() {
            let operator = &self.operators[index];
            if let Err(err) = operator.start().await {
                error!(operator = %operator.id(), error = %err, "failed to start operator");
                for &stop_index in &self.topo_order {
                    if running.contains(&stop_index) {
                        let op = &self.operators[stop_index];
                        if let Err(stop_err) = op.stop().await {
                            error!(operator = %op.id(), error = %stop_err, "failed to stop operator during rollback");
                        }
                    }
                }
                *self.started.lock().expect("start lock") = false;
                return Err(err);
            }
            running.insert(index);
        }
        Ok(())
    }

    /// Stops every operator, sources first, collecting every failure.
    /// Idempotent; a no-op unless the pipeline is running.
    pub async fn stop(&self) -> Vec<OperatorError> {
        {
            let mut started = self.started.lock().expect("start lock");
            if !*started {
                return Vec::new();
            }
            *started = false;
        }
        debug!("stopping pipeline");

        let mut errors = Vec::new();
        for &index in &self.topo_order {
            let operator = &self.operators[index];
            if let Err(err) = operator.stop().await {
                error!(operator = %operator.id(), error = %err, "failed to stop operator");
                errors.push(err);
            }
        }
        errors
    }

    /// Renders the operator graph in Graphviz DOT form.
    pub fn render_dot(&self) -> String {
        format!(
            "{}",
            Dot::with_config(&self.graph, &[DotConfig::EdgeNoLabel])
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::helper::{OnError, TransformerOperator};
    use crate::testutil::FakeOutput;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use crate::entry::Entry;

    /// Minimal forwarding transformer for graph shape tests.
    struct Passthrough {
        transformer: TransformerOperator,
    }

    impl Passthrough {
        fn new(id: &str, outputs: Vec<String>) -> Arc<Passthrough> {
            Arc::new(Passthrough {
                transformer: TransformerOperator::new(id, "passthrough", outputs, OnError::Send),
            })
        }
    }

    #[async_trait]
    impl Operator for Passthrough {
        fn id(&self) -> String {
            self.transformer.id()
        }
        fn operator_type(&self) -> &str {
            "passthrough"
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
        async fn process(
            &self,
            ctx: &CancellationToken,
            entry: Entry,
        ) -> Result<(), OperatorError> {
            self.transformer.process_with(ctx, entry, |_| Ok(())).await
        }
    }

    fn wire(operators: &[Arc<dyn Operator>]) {
        for op in operators {
            if op.can_output() {
                op.set_outputs(operators).expect("wiring succeeds");
            }
        }
    }

    #[tokio::test]
    async fn cycle_is_rejected_naming_a_participant() {
        let a = Passthrough::new("$.a", vec!["$.b".to_string()]);
        let b = Passthrough::new("$.b", vec!["$.a".to_string()]);
        let operators: Vec<Arc<dyn Operator>> = vec![a, b];
        wire(&operators);

        let err = Pipeline::new(operators).err().expect("cycle must fail");
        let text = err.to_string();
        assert!(text.contains("cycle"), "unexpected error: {text}");
        assert!(
            text.contains("$.a") || text.contains("$.b"),
            "cycle error must name a participant: {text}"
        );
    }

    #[tokio::test]
    async fn linear_graph_renders_dot_and_edges() {
        let sink = FakeOutput::new("$.sink");
        let mid = Passthrough::new("$.mid", vec!["$.sink".to_string()]);
        let operators: Vec<Arc<dyn Operator>> = vec![mid, sink];
        wire(&operators);

        let pipeline = Pipeline::new(operators).expect("valid dag");
        assert!(pipeline.has_edge("$.mid", "$.sink"));
        assert!(!pipeline.has_edge("$.sink", "$.mid"));

        let dot = pipeline.render_dot();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("$.mid"));
        assert!(dot.contains("$.sink"));
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let sink = FakeOutput::new("$.sink");
        let operators: Vec<Arc<dyn Operator>> = vec![sink];
        let pipeline = Pipeline::new(operators).expect("valid dag");

        pipeline.start().await.expect("first start");
        pipeline.start().await.expect("second start is a no-op");
        assert!(pipeline.stop().await.is_empty());
        assert!(pipeline.stop().await.is_empty());
    }
}
