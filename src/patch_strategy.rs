//! Patch strategies decide which version pairs need a patch archive whenever
//! a new version is added to a repository. Represented as a closed Rust enum
//! dispatched by `match`, rather than the original's reflective subclass
//! registry.

use anyhow::{bail, Result};

use crate::error::BireusError;
use crate::version_graph::VersionGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStrategy {
    Incremental { bidirectional: bool },
    Instant { bidirectional: bool },
    MajorMinor { bidirectional: bool, minor_range: usize },
}

impl PatchStrategy {
    /// Initializes the version graph for a brand-new repository.
    pub fn new_repo(&self, first_version: &str) -> VersionGraph {
        let mut graph = VersionGraph::new(first_version);
        if let PatchStrategy::MajorMinor { .. } = self {
            graph.is_major_minor = true;
        }
        graph
    }

    /// Adds `new_version` (a successor of `last_version`) to `version_graph`,
    /// returning the `(base, target)` pairs that now need a patch archive.
    pub fn add_version(
        &self,
        version_graph: &mut VersionGraph,
        last_version: &str,
        new_version: &str,
    ) -> Result<Vec<(String, String)>> {
        match *self {
            PatchStrategy::Incremental { bidirectional } => {
                Ok(incremental(version_graph, last_version, new_version, bidirectional))
            }
            PatchStrategy::Instant { bidirectional } => {
                Ok(instant(version_graph, last_version, new_version, bidirectional))
            }
            PatchStrategy::MajorMinor { bidirectional, minor_range } => {
                major_minor(version_graph, last_version, new_version, bidirectional, minor_range)
            }
        }
    }
}

fn incremental(graph: &mut VersionGraph, last: &str, new: &str, bidirectional: bool) -> Vec<(String, String)> {
    let mut required = vec![(last.to_string(), new.to_string())];

    graph.add_node(new);
    graph.add_edge(last, new);

    if bidirectional {
        graph.add_edge(new, last);
        required.push((new.to_string(), last.to_string()));
    }

    required
}

fn instant(graph: &mut VersionGraph, _last: &str, new: &str, bidirectional: bool) -> Vec<(String, String)> {
    let mut required = Vec::new();
    let versions = graph.versions();
    graph.add_node(new);

    for version in versions {
        required.push((version.clone(), new.to_string()));
        graph.add_edge(&version, new);

        if bidirectional {
            required.push((new.to_string(), version.clone()));
            graph.add_edge(new, &version);
        }
    }

    required
}

fn major_minor(
    graph: &mut VersionGraph,
    last: &str,
    new: &str,
    bidirectional: bool,
    minor_range: usize,
) -> Result<Vec<(String, String)>> {
    if !graph.is_major_minor {
        return Err(BireusError::InvalidStrategyConfig("graph lacks isMajorMinor=yes".to_string()).into());
    }
    if !graph.has_version(last) {
        bail!("version {last} not found");
    }

    let all_existing_versions = graph.versions();
    let all_major_versions = graph.major_versions();

    let mut new_version_is_major = false;
    let mut patches_required: Vec<String> = Vec::new();

    if all_major_versions.is_empty() {
        // -1 because the first version of a graph is never major.
        if all_existing_versions.len() >= minor_range - 1 {
            new_version_is_major = true;
        }
        patches_required.extend(all_existing_versions);
    } else if graph.is_major_version(last) {
        patches_required.push(last.to_string());
    } else {
        let mut neighbors = graph.all_neighbors(last);
        if !neighbors.contains(&last.to_string()) {
            neighbors.push(last.to_string());
        }

        if neighbors.len() >= minor_range {
            new_version_is_major = true;
            for major in &all_major_versions {
                if !neighbors.contains(major) {
                    neighbors.push(major.clone());
                }
            }
        }

        patches_required.extend(neighbors);
    }

    graph.add_node(new);
    if new_version_is_major {
        graph.set_major_version(new);
    }

    let mut required_patches = Vec::new();
    for version in patches_required {
        graph.add_edge(&version, new);
        required_patches.push((version.clone(), new.to_string()));

        if bidirectional {
            graph.add_edge(new, &version);
            required_patches.push((new.to_string(), version));
        }
    }

    Ok(required_patches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_bidirectional_adds_both_edges() {
        let strategy = PatchStrategy::Incremental { bidirectional: true };
        let mut graph = strategy.new_repo("v1");
        let patches = strategy.add_version(&mut graph, "v1", "v2").unwrap();
        assert_eq!(patches, vec![("v1".to_string(), "v2".to_string()), ("v2".to_string(), "v1".to_string())]);
        assert_eq!(graph.shortest_path("v2", "v1"), Some(vec!["v2".to_string(), "v1".to_string()]));
    }

    #[test]
    fn instant_connects_new_version_to_every_existing_one() {
        let strategy = PatchStrategy::Instant { bidirectional: false };
        let mut graph = strategy.new_repo("v1");
        strategy.add_version(&mut graph, "v1", "v2").unwrap();
        let patches = strategy.add_version(&mut graph, "v2", "v3").unwrap();
        assert_eq!(patches.len(), 2);
        assert!(patches.contains(&("v1".to_string(), "v3".to_string())));
        assert!(patches.contains(&("v2".to_string(), "v3".to_string())));
    }

    #[test]
    fn major_minor_promotes_after_range_exhausted() {
        let strategy = PatchStrategy::MajorMinor { bidirectional: true, minor_range: 3 };
        let mut graph = strategy.new_repo("v1");
        strategy.add_version(&mut graph, "v1", "v2").unwrap();
        // v1, v2 exist (2 >= minor_range - 1 == 2) so v3 becomes major.
        strategy.add_version(&mut graph, "v2", "v3").unwrap();
        assert!(graph.is_major_version("v3"));
    }

    #[test]
    fn major_minor_rejects_plain_graph() {
        let strategy = PatchStrategy::Incremental { bidirectional: true };
        let mut graph = strategy.new_repo("v1");
        let major_minor = PatchStrategy::MajorMinor { bidirectional: true, minor_range: 10 };
        assert!(major_minor.add_version(&mut graph, "v1", "v2").is_err());
    }
}
