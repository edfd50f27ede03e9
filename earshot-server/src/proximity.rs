//! Proximity recomputation: per-observer peer sets and the diffs worth
//! emitting.
//!
//! A recomputation pass is pure over a snapshot of positioned players; the
//! cell actor feeds it state and owns the committed views.

use earshot_model::{event::PeerDiff, geometry::Vec3};
use std::collections::HashMap;

/// A peer inside the audibility radius of some observer.
#[derive(Clone, Copy, Debug)]
pub struct Neighbor {
    pub distance: f64,
    pub position: Vec3,
}

/// The view committed for an observer after its last emitted frame.
///
/// The keyset is the peer set; values are the distances as last sent.
#[derive(Clone, Debug, Default)]
pub struct PeerView {
    pub distances: HashMap<String, f64>,
}

/// Compute the observer's next peer set from a snapshot of positioned
/// players. The observer never appears in its own set.
pub fn neighbors_within(
    observer_id: &str,
    observer_position: Vec3,
    players: &[(String, Vec3)],
    radius: f64,
) -> HashMap<String, Neighbor> {
    players
        .iter()
        .filter(|(id, _)| id.as_str() != observer_id)
        .filter_map(|(id, position)| {
            let distance = observer_position.distance(*position);

            (distance <= radius).then(|| {
                (
                    id.clone(),
                    Neighbor {
                        distance,
                        position: *position,
                    },
                )
            })
        })
        .collect()
}

/// Diff the next peer set against the committed view.
///
/// Returns a frame when a peer entered, a peer left, or an extant peer moved
/// by more than `epsilon` since the last emission; returns `None` when the
/// frame would carry no news.
pub fn diff(
    previous: &PeerView,
    next: &HashMap<String, Neighbor>,
    epsilon: f64,
    total_players: usize,
) -> Option<PeerDiff> {
    let mut added: Vec<String> = next
        .keys()
        .filter(|id| !previous.distances.contains_key(*id))
        .cloned()
        .collect();
    let mut removed: Vec<String> = previous
        .distances
        .keys()
        .filter(|id| !next.contains_key(*id))
        .cloned()
        .collect();

    let distance_changed = next.iter().any(|(id, neighbor)| {
        previous
            .distances
            .get(id)
            .is_some_and(|sent| (neighbor.distance - sent).abs() > epsilon)
    });

    if added.is_empty() && removed.is_empty() && !distance_changed {
        return None;
    }

    added.sort_unstable();
    removed.sort_unstable();

    let mut peers: Vec<String> = next.keys().cloned().collect();
    peers.sort_unstable();

    Some(PeerDiff {
        peers,
        added,
        removed,
        distances: next
            .iter()
            .map(|(id, neighbor)| (id.clone(), neighbor.distance))
            .collect(),
        positions: next
            .iter()
            .map(|(id, neighbor)| (id.clone(), neighbor.position))
            .collect(),
        total_players,
    })
}

/// Commit an emitted frame as the observer's stored view.
pub fn commit(next: &HashMap<String, Neighbor>) -> PeerView {
    PeerView {
        distances: next
            .iter()
            .map(|(id, neighbor)| (id.clone(), neighbor.distance))
            .collect(),
    }
}
