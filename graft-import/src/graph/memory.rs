//! In-process graph with the same merge semantics as the Neo4j backend
//!
//! Used by tests and by `--dry-run`. Nodes are keyed by `(label, key)`,
//! detail properties are written only on creation, and every write reports
//! creations the way the Cypher statements do.

use graft_common::config::{GraphSchema, PostLoadPass};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{DetailRecord, GraphBackend, GraphError, GraphSession, PropertyValue, WriteCounters};

type NodeId = (String, String);

#[derive(Debug, Default)]
struct GraphData {
    /// Summary nodes with their numeric aggregates
    summaries: BTreeMap<NodeId, BTreeMap<String, f64>>,
    details: BTreeMap<NodeId, BTreeMap<String, PropertyValue>>,
    /// (detail, relationship type, summary)
    edges: BTreeSet<(NodeId, String, NodeId)>,
    /// (summary, relationship type, summary)
    links: BTreeSet<(NodeId, String, NodeId)>,
    schema_calls: u64,
}

/// Shared in-memory graph; clones see the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    data: Arc<Mutex<GraphData>>,
    unreachable: Arc<AtomicBool>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `open_session` fail at connection level
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub async fn summary_count(&self) -> usize {
        self.data.lock().await.summaries.len()
    }

    pub async fn detail_count(&self) -> usize {
        self.data.lock().await.details.len()
    }

    pub async fn relationship_count(&self) -> usize {
        let data = self.data.lock().await;
        data.edges.len() + data.links.len()
    }

    pub async fn link_count(&self) -> usize {
        self.data.lock().await.links.len()
    }

    pub async fn schema_calls(&self) -> u64 {
        self.data.lock().await.schema_calls
    }

    /// Whether detail `id` is linked to summary `key`
    pub async fn has_edge(&self, schema: &GraphSchema, id: &str, key: &str) -> bool {
        let edge = (
            node(&schema.detail_label, id),
            schema.relationship.clone(),
            node(&schema.summary_label, key),
        );
        self.data.lock().await.edges.contains(&edge)
    }

    pub async fn detail_property(&self, schema: &GraphSchema, id: &str, name: &str) -> Option<PropertyValue> {
        self.data
            .lock()
            .await
            .details
            .get(&node(&schema.detail_label, id))
            .and_then(|props| props.get(name).cloned())
    }

    pub async fn summary_property(&self, schema: &GraphSchema, key: &str, name: &str) -> Option<f64> {
        self.data
            .lock()
            .await
            .summaries
            .get(&node(&schema.summary_label, key))
            .and_then(|props| props.get(name).copied())
    }
}

fn node(label: &str, key: &str) -> NodeId {
    (label.to_string(), key.to_string())
}

#[async_trait::async_trait]
impl GraphBackend for MemoryGraph {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open_session(&self) -> Result<Box<dyn GraphSession>, GraphError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GraphError::Connection("memory graph marked unreachable".to_string()));
        }
        Ok(Box::new(MemorySession {
            graph: self.clone(),
        }))
    }
}

struct MemorySession {
    graph: MemoryGraph,
}

impl MemorySession {
    fn check(&self) -> Result<(), GraphError> {
        if self.graph.unreachable.load(Ordering::SeqCst) {
            return Err(GraphError::Connection("memory graph connection lost".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl GraphSession for MemorySession {
    async fn ensure_schema(&mut self, schema: &GraphSchema) -> Result<(), GraphError> {
        self.check()?;
        super::cypher::schema_statements(schema)?;
        self.graph.data.lock().await.schema_calls += 1;
        Ok(())
    }

    async fn merge_summary_nodes(
        &mut self,
        schema: &GraphSchema,
        keys: &[String],
    ) -> Result<WriteCounters, GraphError> {
        self.check()?;
        let mut data = self.graph.data.lock().await;
        let mut counters = WriteCounters::default();
        for key in keys {
            let id = node(&schema.summary_label, key);
            if !data.summaries.contains_key(&id) {
                data.summaries.insert(id, BTreeMap::new());
                counters.nodes_created += 1;
            }
        }
        Ok(counters)
    }

    async fn merge_detail_batch(
        &mut self,
        schema: &GraphSchema,
        rows: &[DetailRecord],
    ) -> Result<WriteCounters, GraphError> {
        self.check()?;
        let mut data = self.graph.data.lock().await;
        let mut counters = WriteCounters::default();

        for row in rows {
            let summary = node(&schema.summary_label, &row.summary_key);
            if !data.summaries.contains_key(&summary) {
                counters.rows_skipped += 1;
                continue;
            }
            counters.rows_matched += 1;

            let detail = node(&schema.detail_label, &row.id);
            if !data.details.contains_key(&detail) {
                let props = row
                    .properties
                    .iter()
                    .filter(|(_, v)| **v != PropertyValue::Null)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                data.details.insert(detail.clone(), props);
                counters.nodes_created += 1;
            }

            if data
                .edges
                .insert((detail, schema.relationship.clone(), summary))
            {
                counters.relationships_created += 1;
            }
        }
        Ok(counters)
    }

    async fn run_post_load(
        &mut self,
        schema: &GraphSchema,
        pass: &PostLoadPass,
    ) -> Result<WriteCounters, GraphError> {
        self.check()?;
        let mut data = self.graph.data.lock().await;
        let mut counters = WriteCounters::default();

        match pass {
            PostLoadPass::Aggregate { measures } => {
                let measures = if measures.is_empty() {
                    &schema.measure_fields
                } else {
                    measures
                };

                let mut totals: BTreeMap<NodeId, (u64, Vec<f64>)> = data
                    .summaries
                    .keys()
                    .filter(|(label, _)| *label == schema.summary_label)
                    .map(|id| (id.clone(), (0, vec![0.0; measures.len()])))
                    .collect();

                for (detail, rel, summary) in &data.edges {
                    if *rel != schema.relationship || detail.0 != schema.detail_label {
                        continue;
                    }
                    let (Some(entry), Some(props)) = (totals.get_mut(summary), data.details.get(detail)) else {
                        continue;
                    };
                    entry.0 += 1;
                    for (i, measure) in measures.iter().enumerate() {
                        entry.1[i] += props.get(measure).and_then(PropertyValue::as_f64).unwrap_or(0.0);
                    }
                }

                for (id, (count, sums)) in totals {
                    if let Some(props) = data.summaries.get_mut(&id) {
                        props.insert("detail_count".to_string(), count as f64);
                        for (measure, sum) in measures.iter().zip(sums) {
                            props.insert(format!("total_{}", measure), sum);
                        }
                        counters.rows_matched += 1;
                    }
                }
            }
            PostLoadPass::LinkSummaries {
                via_field,
                relationship,
            } => {
                let mut groups: BTreeMap<String, BTreeSet<NodeId>> = BTreeMap::new();
                for (detail, rel, summary) in &data.edges {
                    if *rel != schema.relationship || summary.0 != schema.summary_label {
                        continue;
                    }
                    let shared = match data.details.get(detail).and_then(|p| p.get(via_field)) {
                        Some(PropertyValue::Text(s)) if !s.is_empty() => s.clone(),
                        Some(PropertyValue::Float(v)) => v.to_string(),
                        _ => continue,
                    };
                    groups.entry(shared).or_default().insert(summary.clone());
                }

                let mut new_links = Vec::new();
                for summaries in groups.values() {
                    for a in summaries {
                        for b in summaries.iter().filter(|b| a.1 < b.1) {
                            new_links.push((a.clone(), relationship.clone(), b.clone()));
                        }
                    }
                }
                for link in new_links {
                    if data.links.insert(link) {
                        counters.relationships_created += 1;
                    }
                }
            }
        }
        Ok(counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, key: &str, amount: f64, cagid: &str) -> DetailRecord {
        let mut properties = BTreeMap::new();
        properties.insert("transaction_id".into(), PropertyValue::Text(id.into()));
        properties.insert("gfcid".into(), PropertyValue::Text(key.into()));
        properties.insert("mtm_usd_amount".into(), PropertyValue::Float(amount));
        properties.insert("cagid".into(), PropertyValue::Text(cagid.into()));
        DetailRecord {
            id: id.into(),
            summary_key: key.into(),
            properties,
        }
    }

    #[tokio::test]
    async fn test_detail_without_summary_is_skipped() {
        let graph = MemoryGraph::new();
        let schema = GraphSchema::default();
        let mut session = graph.open_session().await.unwrap();

        let counters = session
            .merge_detail_batch(&schema, &[row("T1", "G1", 1.0, "C1")])
            .await
            .unwrap();
        assert_eq!(counters.rows_skipped, 1);
        assert_eq!(counters.nodes_created, 0);
        assert_eq!(graph.detail_count().await, 0);
    }

    #[tokio::test]
    async fn test_replay_creates_nothing_and_keeps_first_values() {
        let graph = MemoryGraph::new();
        let schema = GraphSchema::default();
        let mut session = graph.open_session().await.unwrap();
        session
            .merge_summary_nodes(&schema, &["G1".to_string()])
            .await
            .unwrap();

        let first = session
            .merge_detail_batch(&schema, &[row("T1", "G1", 5.0, "C1")])
            .await
            .unwrap();
        let second = session
            .merge_detail_batch(&schema, &[row("T1", "G1", 99.0, "C1")])
            .await
            .unwrap();

        assert_eq!((first.nodes_created, first.relationships_created), (1, 1));
        assert_eq!((second.nodes_created, second.relationships_created), (0, 0));
        assert_eq!(
            graph.detail_property(&schema, "T1", "mtm_usd_amount").await,
            Some(PropertyValue::Float(5.0))
        );
    }

    #[tokio::test]
    async fn test_post_load_passes() {
        let graph = MemoryGraph::new();
        let schema = GraphSchema::default();
        let mut session = graph.open_session().await.unwrap();
        session
            .merge_summary_nodes(&schema, &["G1".into(), "G2".into(), "G3".into()])
            .await
            .unwrap();
        session
            .merge_detail_batch(
                &schema,
                &[
                    row("T1", "G1", 2.0, "C1"),
                    row("T2", "G1", 3.0, "C2"),
                    row("T3", "G2", 4.0, "C1"),
                    row("T4", "G3", 1.0, "C9"),
                ],
            )
            .await
            .unwrap();

        let aggregate = PostLoadPass::Aggregate { measures: vec![] };
        session.run_post_load(&schema, &aggregate).await.unwrap();
        assert_eq!(graph.summary_property(&schema, "G1", "detail_count").await, Some(2.0));
        assert_eq!(
            graph.summary_property(&schema, "G1", "total_mtm_usd_amount").await,
            Some(5.0)
        );

        let link = PostLoadPass::LinkSummaries {
            via_field: "cagid".into(),
            relationship: "SHARES_CAGID".into(),
        };
        let first = session.run_post_load(&schema, &link).await.unwrap();
        let again = session.run_post_load(&schema, &link).await.unwrap();
        assert_eq!(first.relationships_created, 1);
        assert_eq!(again.relationships_created, 0);
        assert_eq!(graph.link_count().await, 1);
    }

    #[tokio::test]
    async fn test_unreachable_fails_open() {
        let graph = MemoryGraph::new();
        graph.set_unreachable(true);
        let err = graph.open_session().await.err().unwrap();
        assert!(err.is_connection());
    }
}
