//! Build planner candidates from metadata records.

use std::collections::{HashMap, HashSet};

use vgrid_core::AntiAffinity;
use vgrid_meta::{Db, NodeId, Server, Space};

use crate::planner::Candidate;

/// Servers a space of `resource_name` in `db` may be placed on.
///
/// A DB with an explicit IP allow-list only uses those servers; otherwise
/// every non-private server is eligible. Either way the server's resource
/// tag must match the space's.
pub fn eligible_servers<'a>(servers: &'a [Server], db: &Db, resource_name: &str) -> Vec<&'a Server> {
    let allow: HashSet<&str> = db.ps.iter().map(String::as_str).collect();
    servers
        .iter()
        .filter(|s| s.resource_name == resource_name)
        .filter(|s| {
            if allow.is_empty() {
                !s.private
            } else {
                allow.contains(s.ip.as_str())
            }
        })
        .collect()
}

/// Replica count per node across every partition of every space.
pub fn replica_load(spaces: &[Space]) -> HashMap<NodeId, u32> {
    let mut load = HashMap::new();
    for space in spaces {
        for partition in &space.partitions {
            for node_id in &partition.replicas {
                *load.entry(*node_id).or_insert(0) += 1;
            }
        }
    }
    load
}

/// Anti-affinity key of a server at the configured granularity.
/// An empty key places no restriction.
pub fn zone_key(server: &Server, anti_affinity: AntiAffinity) -> String {
    match anti_affinity {
        AntiAffinity::None => String::new(),
        AntiAffinity::HostIp => server.host_ip.clone(),
        AntiAffinity::Rack => server.host_rack.clone(),
        AntiAffinity::Zone => server.host_zone.clone(),
    }
}

/// Combine eligible servers, current load, and probe results into candidates.
pub fn to_candidates(
    servers: &[&Server],
    load: &HashMap<NodeId, u32>,
    live: &HashSet<NodeId>,
    anti_affinity: AntiAffinity,
) -> Vec<Candidate> {
    servers
        .iter()
        .map(|s| Candidate {
            node_id: s.id,
            addr: s.rpc_addr(),
            zone: zone_key(s, anti_affinity),
            load: load.get(&s.id).copied().unwrap_or(0),
            live: live.contains(&s.id),
        })
        .collect()
}
