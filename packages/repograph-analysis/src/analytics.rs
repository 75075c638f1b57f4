//! Graph analytics (optional, non-fatal).
//!
//! Computes PageRank over the `CALLS` edges and writes each participating
//! node's score back as a `pagerank` property. Callers treat any failure
//! here as a warning, never as a run failure.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::{json, Map};
use tracing::debug;

use repograph_model::rel_types;
use repograph_storage::GraphStore;

use crate::error::Result;

const DAMPING: f64 = 0.85;
const ITERATIONS: usize = 20;

/// Run PageRank over the stored call graph; returns how many nodes were
/// annotated with a score.
pub async fn compute_pagerank(store: &dyn GraphStore) -> Result<usize> {
    let calls = store.find_relationships(Some(rel_types::CALLS)).await?;
    if calls.is_empty() {
        debug!("no CALLS edges, skipping pagerank");
        return Ok(0);
    }

    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut indices: HashMap<String, NodeIndex> = HashMap::new();
    {
        let mut index_of = |graph: &mut DiGraph<String, ()>, id: &str| -> NodeIndex {
            if let Some(&idx) = indices.get(id) {
                return idx;
            }
            let idx = graph.add_node(id.to_string());
            indices.insert(id.to_string(), idx);
            idx
        };
        for rel in &calls {
            let source = index_of(&mut graph, &rel.source_id);
            let target = index_of(&mut graph, &rel.target_id);
            graph.add_edge(source, target, ());
        }
    }

    let ranks = petgraph::algo::page_rank(&graph, DAMPING, ITERATIONS);

    let updates: Vec<(String, Map<String, serde_json::Value>)> = graph
        .node_indices()
        .map(|idx| {
            let mut properties = Map::new();
            properties.insert("pagerank".to_string(), json!(ranks[idx.index()]));
            (graph[idx].clone(), properties)
        })
        .collect();

    let annotated = store.merge_node_properties(updates).await?;
    debug!(
        "pagerank: annotated {} of {} call-graph nodes",
        annotated,
        graph.node_count()
    );
    Ok(annotated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use repograph_model::{Node, Relationship};
    use repograph_storage::SqliteGraphStore;

    fn node(id: &str) -> Node {
        Node::builder("Method", id)
            .entity_id(id)
            .instance_id(format!("i-{}", id))
            .build()
    }

    #[tokio::test]
    async fn test_pagerank_annotates_called_nodes() {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        store.initialize().await.unwrap();

        store
            .save_nodes_batch(vec![node("a"), node("b"), node("c")], None)
            .await
            .unwrap();
        // a -> c, b -> c: c should outrank a and b
        store
            .save_relationships_batch(
                rel_types::CALLS,
                vec![
                    Relationship::new(rel_types::CALLS, "a", "c", "i1"),
                    Relationship::new(rel_types::CALLS, "b", "c", "i2"),
                ],
                None,
            )
            .await
            .unwrap();

        let annotated = compute_pagerank(&store).await.unwrap();
        assert_eq!(annotated, 3);

        async fn rank(store: &SqliteGraphStore, id: &str) -> f64 {
            store
                .get_node(id)
                .await
                .unwrap()
                .unwrap()
                .property("pagerank")
                .and_then(|v| v.as_f64())
                .unwrap()
        }
        let (ra, rb, rc) = (
            rank(&store, "a").await,
            rank(&store, "b").await,
            rank(&store, "c").await,
        );
        assert!(rc > ra);
        assert!(rc > rb);
    }

    #[tokio::test]
    async fn test_pagerank_without_calls_is_noop() {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        store.initialize().await.unwrap();
        assert_eq!(compute_pagerank(&store).await.unwrap(), 0);
    }
}
