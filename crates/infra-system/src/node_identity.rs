// Host-derived node identity
// reason: sysinfo for a cross-platform hostname lookup
use sysinfo::System;

const FALLBACK_NODE_ID: &str = "rangescan-node";

/// Default node ID: the hostname
///
/// Stable across restarts of the same host, which the status monitor relies
/// on to count restarts without progress.
pub fn default_node_id() -> String {
    System::host_name()
        .map(|name| sanitize(&name))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_NODE_ID.to_string())
}

fn sanitize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
