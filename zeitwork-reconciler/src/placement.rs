//! Least-loaded placement (spec §4.2 step 3, §8: `||count(A) - count(B)|| <= 1`).

use uuid::Uuid;

/// A candidate server and how many live VMs it currently hosts.
#[derive(Debug, Clone, Copy)]
pub struct ServerLoad {
    pub server_id: Uuid,
    pub live_vm_count: i64,
}

/// Picks the server with the fewest live VMs, tie-breaking by ascending id
/// for determinism (spec §4.2 step 3: "tie-break by server.id ascending").
pub fn choose_least_loaded(candidates: &[ServerLoad]) -> Option<Uuid> {
    candidates
        .iter()
        .min_by(|a, b| {
            a.live_vm_count
                .cmp(&b.live_vm_count)
                .then_with(|| a.server_id.cmp(&b.server_id))
        })
        .map(|s| s.server_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(id: u8, count: i64) -> ServerLoad {
        ServerLoad {
            server_id: Uuid::from_bytes([id; 16]),
            live_vm_count: count,
        }
    }

    #[test]
    fn picks_fewest_vms() {
        let candidates = vec![load(1, 3), load(2, 1), load(3, 5)];
        assert_eq!(choose_least_loaded(&candidates), Some(Uuid::from_bytes([2; 16])));
    }

    #[test]
    fn ties_break_by_ascending_id() {
        let candidates = vec![load(9, 2), load(1, 2), load(5, 2)];
        assert_eq!(choose_least_loaded(&candidates), Some(Uuid::from_bytes([1; 16])));
    }

    #[test]
    fn no_candidates_returns_none() {
        assert_eq!(choose_least_loaded(&[]), None);
    }

    #[test]
    fn repeated_placement_keeps_counts_within_one_of_each_other() {
        // Simulates spec §8's fairness property over N sequential placements.
        let mut loads = vec![load(1, 0), load(2, 0), load(3, 0)];
        for _ in 0..30 {
            let chosen = choose_least_loaded(&loads).unwrap();
            for l in loads.iter_mut() {
                if l.server_id == chosen {
                    l.live_vm_count += 1;
                }
            }
        }
        let min = loads.iter().map(|l| l.live_vm_count).min().unwrap();
        let max = loads.iter().map(|l| l.live_vm_count).max().unwrap();
        assert!(max - min <= 1);
    }
}
