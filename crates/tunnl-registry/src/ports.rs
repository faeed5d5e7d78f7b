//! Auto-assigned port selection
//!
//! `port: 0` asks the node for any free TCP port. The seed hashes to a
//! starting offset inside the allowed ranges and a linear probe walks
//! forward from there, so repeated requests spread across the range
//! instead of piling up at its start.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use tunnl_policy::{PortRange, PortRestrictions, PORT_FLOOR};

/// Range used when a node supports auto-assign but declares no ranges
const DEFAULT_AUTO_RANGE: PortRange = PortRange {
    min: 10000,
    max: 50000,
};

/// Pick a free port for an auto-assign request, or `None` when every
/// candidate is blocked, reserved or below the floor.
pub(crate) fn pick_port(
    restrictions: &PortRestrictions,
    in_use: &HashSet<u16>,
    seed: &str,
) -> Option<u16> {
    let ranges: &[PortRange] = if restrictions.allowed_ranges.is_empty() {
        std::slice::from_ref(&DEFAULT_AUTO_RANGE)
    } else {
        &restrictions.allowed_ranges
    };

    let total: u64 = ranges.iter().map(span).sum();
    if total == 0 {
        return None;
    }

    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    let start = hasher.finish() % total;

    for step in 0..total {
        let Some(port) = nth_port(ranges, (start + step) % total) else {
            continue;
        };
        if port < PORT_FLOOR
            || restrictions.blocked_ports.contains(&port)
            || in_use.contains(&port)
        {
            continue;
        }
        return Some(port);
    }
    None
}

fn span(range: &PortRange) -> u64 {
    (range.max as u64) - (range.min as u64) + 1
}

/// Port at `index` in the concatenation of all ranges
fn nth_port(ranges: &[PortRange], mut index: u64) -> Option<u16> {
    for range in ranges {
        let size = span(range);
        if index < size {
            return Some(range.min + index as u16);
        }
        index -= size;
    }
    None
}
