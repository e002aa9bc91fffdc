//! Worker node list parsing.
//!
//! `PIPELINE_WORKER_NODES` holds comma separated entries of the form
//! `id@address#region[+q][:capacity]`:
//!
//! ```text
//! gpu-1@10.0.0.5:9000#us-east+q:128, cpu-1@10.0.0.6:9000#eu-west
//! ```
//!
//! `+q` marks a quantum-ready node. Capacity defaults to
//! [`DEFAULT_NODE_CAPACITY`].

use thiserror::Error;
use throughput_pipeline::WorkerNode;

/// Capacity used when an entry does not name one.
pub const DEFAULT_NODE_CAPACITY: u32 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeSpecError {
    #[error("node entry '{0}' is missing '@'")]
    MissingAddress(String),

    #[error("node entry '{0}' is missing '#region'")]
    MissingRegion(String),

    #[error("node entry '{entry}' has an empty {field}")]
    EmptyField { entry: String, field: &'static str },

    #[error("node entry '{entry}' has an invalid capacity '{capacity}'")]
    InvalidCapacity { entry: String, capacity: String },
}

/// Parse a comma separated node list. Blank entries are skipped.
pub fn parse_worker_nodes(spec: &str) -> Result<Vec<WorkerNode>, NodeSpecError> {
    spec.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_worker_node)
        .collect()
}

/// Parse one `id@address#region[+q][:capacity]` entry.
pub fn parse_worker_node(entry: &str) -> Result<WorkerNode, NodeSpecError> {
    let (id, rest) = entry
        .split_once('@')
        .ok_or_else(|| NodeSpecError::MissingAddress(entry.to_string()))?;
    // Addresses carry their own port colon, so the region starts at the last '#'.
    let (address, tail) = rest
        .rsplit_once('#')
        .ok_or_else(|| NodeSpecError::MissingRegion(entry.to_string()))?;

    let (region, capacity) = match tail.split_once(':') {
        Some((region, raw)) => {
            let capacity = raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|c| *c > 0)
                .ok_or_else(|| NodeSpecError::InvalidCapacity {
                    entry: entry.to_string(),
                    capacity: raw.to_string(),
                })?;
            (region, capacity)
        }
        None => (tail, DEFAULT_NODE_CAPACITY),
    };
    let (region, quantum_ready) = match region.strip_suffix("+q") {
        Some(region) => (region, true),
        None => (region, false),
    };

    for (field, value) in [("id", id), ("address", address), ("region", region)] {
        if value.trim().is_empty() {
            return Err(NodeSpecError::EmptyField {
                entry: entry.to_string(),
                field,
            });
        }
    }

    Ok(WorkerNode::new(id.trim(), address.trim(), region.trim(), capacity)
        .with_quantum_ready(quantum_ready))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_entry() {
        let node = parse_worker_node("gpu-1@10.0.0.5:9000#us-east+q:128").unwrap();
        assert_eq!(node.id, "gpu-1");
        assert_eq!(node.address, "10.0.0.5:9000");
        assert_eq!(node.region, "us-east");
        assert!(node.quantum_ready);
        assert_eq!(node.max_capacity, 128);
    }

    #[test]
    fn test_parse_defaults() {
        let node = parse_worker_node("cpu-1@cpu-1.local#eu-west").unwrap();
        assert!(!node.quantum_ready);
        assert_eq!(node.max_capacity, DEFAULT_NODE_CAPACITY);
    }

    #[test]
    fn test_parse_list_skips_blank_entries() {
        let nodes = parse_worker_nodes(" a@h1:1#eu , ,b@h2:2#us+q ,").unwrap();
        let ids: Vec<_> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(nodes[1].quantum_ready);
        assert!(parse_worker_nodes("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_worker_node("no-address"),
            Err(NodeSpecError::MissingAddress(_))
        ));
        assert!(matches!(
            parse_worker_node("a@host:1"),
            Err(NodeSpecError::MissingRegion(_))
        ));
        assert!(matches!(
            parse_worker_node("a@host:1#eu:zero"),
            Err(NodeSpecError::InvalidCapacity { .. })
        ));
        assert!(matches!(
            parse_worker_node("a@host:1#eu:0"),
            Err(NodeSpecError::InvalidCapacity { .. })
        ));
        assert!(matches!(
            parse_worker_node("@host:1#eu"),
            Err(NodeSpecError::EmptyField { field: "id", .. })
        ));
    }
}
