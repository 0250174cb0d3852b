//! The directed version graph: nodes are version labels, an edge `(a, b)`
//! means "a patch archive exists that transforms a working tree at `a` into
//! one at `b`". Persisted as a minimal GML-subset text format, sufficient to
//! round-trip the node attribute `isMajorVersion` and the graph attribute
//! `isMajorMinor` spec.md §3/§9 require.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use petgraph::graph::{DiGraph, NodeIndex};

#[derive(Debug, Clone, Default)]
pub struct VersionGraph {
    graph: DiGraph<VersionNode, ()>,
    index: HashMap<String, NodeIndex>,
    /// Graph-level attribute, e.g. `isMajorMinor`.
    pub is_major_minor: bool,
}

#[derive(Debug, Clone)]
struct VersionNode {
    label: String,
    is_major_version: bool,
}

impl VersionGraph {
    pub fn new(first_version: impl Into<String>) -> Self {
        let mut g = VersionGraph::default();
        g.add_node(first_version);
        g
    }

    pub fn add_node(&mut self, version: impl Into<String>) -> NodeIndex {
        let version = version.into();
        if let Some(&idx) = self.index.get(&version) {
            return idx;
        }
        let idx = self.graph.add_node(VersionNode {
            label: version.clone(),
            is_major_version: false,
        });
        self.index.insert(version, idx);
        idx
    }

    pub fn add_edge(&mut self, from: &str, to: &str) {
        let from_idx = self.add_node(from);
        let to_idx = self.add_node(to);
        if !self.graph.contains_edge(from_idx, to_idx) {
            self.graph.add_edge(from_idx, to_idx, ());
        }
    }

    pub fn has_version(&self, version: &str) -> bool {
        self.index.contains_key(version)
    }

    pub fn set_major_version(&mut self, version: &str) {
        if let Some(&idx) = self.index.get(version) {
            self.graph[idx].is_major_version = true;
        }
    }

    pub fn is_major_version(&self, version: &str) -> bool {
        self.index
            .get(version)
            .map(|&idx| self.graph[idx].is_major_version)
            .unwrap_or(false)
    }

    pub fn major_versions(&self) -> Vec<String> {
        self.graph
            .node_weights()
            .filter(|n| n.is_major_version)
            .map(|n| n.label.clone())
            .collect()
    }

    pub fn versions(&self) -> Vec<String> {
        self.graph.node_weights().map(|n| n.label.clone()).collect()
    }

    /// All nodes reachable from `version` by one edge in either direction
    /// (the original's `networkx.all_neighbors`, which is direction-agnostic
    /// on a DiGraph).
    pub fn all_neighbors(&self, version: &str) -> Vec<String> {
        let Some(&idx) = self.index.get(version) else {
            return Vec::new();
        };
        let mut seen = Vec::new();
        for neighbor in self
            .graph
            .neighbors_directed(idx, petgraph::Direction::Outgoing)
            .chain(self.graph.neighbors_directed(idx, petgraph::Direction::Incoming))
        {
            let label = self.graph[neighbor].label.clone();
            if !seen.contains(&label) {
                seen.push(label);
            }
        }
        seen
    }

    /// Shortest path (by hop count) from `from` to `to`, inclusive of both
    /// endpoints, or `None` if no path exists.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let &from_idx = self.index.get(from)?;
        let &to_idx = self.index.get(to)?;

        let (_, path_map) = petgraph::algo::astar(&self.graph, from_idx, |n| n == to_idx, |_| 1u32, |_| 0u32)?;
        Some(path_map.into_iter().map(|idx| self.graph[idx].label.clone()).collect())
    }

    pub fn write_gml(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        out.push_str("graph [\n");
        out.push_str("  directed 1\n");
        if self.is_major_minor {
            out.push_str("  isMajorMinor \"yes\"\n");
        }
        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            out.push_str("  node [\n");
            out.push_str(&format!("    id {}\n", idx.index()));
            out.push_str(&format!("    label \"{}\"\n", escape_gml(&node.label)));
            if node.is_major_version {
                out.push_str("    isMajorVersion \"yes\"\n");
            }
            out.push_str("  ]\n");
        }
        for edge in self.graph.edge_indices() {
            let (source, target) = self.graph.edge_endpoints(edge).unwrap();
            out.push_str("  edge [\n");
            out.push_str(&format!("    source {}\n", source.index()));
            out.push_str(&format!("    target {}\n", target.index()));
            out.push_str("  ]\n");
        }
        out.push_str("]\n");

        std::fs::write(path, out).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn read_gml(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        parse_gml(&text)
    }
}

fn escape_gml(s: &str) -> String {
    s.replace('"', "\\\"")
}

/// Parses the GML subset [`VersionGraph::write_gml`] emits: `graph [...]`
/// with `node [...]`/`edge [...]` blocks and simple `key value` or
/// `key "value"` lines. Not a general GML parser.
fn parse_gml(text: &str) -> Result<VersionGraph> {
    let mut graph = VersionGraph::default();
    let mut id_to_label: HashMap<i64, String> = HashMap::new();
    let mut pending_edges: Vec<(i64, i64)> = Vec::new();

    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if trimmed.starts_with("isMajorMinor") {
            graph.is_major_minor = true;
        } else if trimmed.starts_with("node [") {
            let mut id: Option<i64> = None;
            let mut label: Option<String> = None;
            let mut is_major = false;
            for inner in lines.by_ref() {
                let inner_trim = inner.trim();
                if inner_trim == "]" {
                    break;
                }
                if let Some(rest) = inner_trim.strip_prefix("id ") {
                    id = rest.trim().parse().ok();
                } else if let Some(rest) = inner_trim.strip_prefix("label ") {
                    label = Some(unquote(rest.trim()));
                } else if inner_trim.starts_with("isMajorVersion") {
                    is_major = true;
                }
            }
            let (id, label) = (
                id.ok_or_else(|| anyhow!("node missing id"))?,
                label.ok_or_else(|| anyhow!("node missing label"))?,
            );
            let idx = graph.add_node(label.clone());
            if is_major {
                graph.graph[idx].is_major_version = true;
            }
            id_to_label.insert(id, label);
        } else if trimmed.starts_with("edge [") {
            let mut source: Option<i64> = None;
            let mut target: Option<i64> = None;
            for inner in lines.by_ref() {
                let inner_trim = inner.trim();
                if inner_trim == "]" {
                    break;
                }
                if let Some(rest) = inner_trim.strip_prefix("source ") {
                    source = rest.trim().parse().ok();
                } else if let Some(rest) = inner_trim.strip_prefix("target ") {
                    target = rest.trim().parse().ok();
                }
            }
            let (source, target) = (
                source.ok_or_else(|| anyhow!("edge missing source"))?,
                target.ok_or_else(|| anyhow!("edge missing target"))?,
            );
            pending_edges.push((source, target));
        }
    }

    for (source, target) in pending_edges {
        let source_label = id_to_label.get(&source).ok_or_else(|| anyhow!("unknown node id {source}"))?;
        let target_label = id_to_label.get(&target).ok_or_else(|| anyhow!("unknown node id {target}"))?;
        graph.add_edge(&source_label.clone(), &target_label.clone());
    }

    Ok(graph)
}

fn unquote(s: &str) -> String {
    s.trim_matches('"').replace("\\\"", "\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn shortest_path_multi_hop() {
        let mut g = VersionGraph::new("v1");
        g.add_edge("v1", "v2");
        g.add_edge("v2", "v1");
        g.add_edge("v2", "v3");
        g.add_edge("v3", "v2");

        let path = g.shortest_path("v1", "v3").unwrap();
        assert_eq!(path, vec!["v1", "v2", "v3"]);
    }

    #[test]
    fn no_path_returns_none() {
        let mut g = VersionGraph::new("v1");
        g.add_node("v2");
        assert!(g.shortest_path("v1", "v2").is_none());
    }

    #[test]
    fn gml_round_trip_preserves_attributes() {
        let mut g = VersionGraph::new("v1");
        g.is_major_minor = true;
        g.add_edge("v1", "v2");
        g.set_major_version("v1");

        let dir = tempdir().unwrap();
        let path = dir.path().join("versions.gml");
        g.write_gml(&path).unwrap();

        let loaded = VersionGraph::read_gml(&path).unwrap();
        assert!(loaded.is_major_minor);
        assert!(loaded.is_major_version("v1"));
        assert!(loaded.has_version("v2"));
        assert_eq!(loaded.shortest_path("v1", "v2"), Some(vec!["v1".to_string(), "v2".to_string()]));
    }
}
