//! Decides which in-range peers actually carry media.
//!
//! The cell reports every peer inside the audibility radius; attaching media
//! to all of them would melt low-end clients and flap at the boundary. The
//! selector keeps a candidate set fed by the cell's peer frames, tracks a
//! distance per candidate (explicit from the cell, or derived from
//! positions), and on each debounced evaluation decides which peers to
//! attach within a hard cap.
//!
//! Admission and drop use asymmetric thresholds: a peer is admitted at or
//! inside the connect radius and kept until it leaves the wider disconnect
//! radius. A peer that was dropped doesn't reconnect merely by re-entering
//! the wider band; it must come back inside the connect radius. The cell
//! itself may keep re-reporting a peer that hovers at its radius; this
//! hysteresis, not the cell, is what stops media flap.
//!
//! The selector is a plain state machine: inputs arm a one-shot evaluation
//! deadline, and the owner drives it by calling [`evaluate_due`] with the
//! current time. No timers or tasks live here.
//!
//! [`evaluate_due`]: PeerSelector::evaluate_due

use earshot_model::{event::PeerDiff, geometry::Vec3};
use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

/// How long a peer's state outlives its last update once the peer is no
/// longer a candidate.
const STALE_PEER_TTL: Duration = Duration::from_secs(60);

/// Tuning for peer selection.
#[derive(Clone, Debug)]
pub struct SelectorConfig {
    /// Distance at or below which a new peer may be admitted.
    pub connect_radius: f64,
    /// Multiplier widening the radius a connected peer may roam before
    /// being dropped.
    pub disconnect_radius_multiplier: f64,
    /// Hard cap on simultaneously connected peers.
    pub max_peers: usize,
    /// Coalescing window between an input and the evaluation it schedules.
    pub evaluation_debounce: Duration,
}

impl SelectorConfig {
    /// Distance beyond which a connected peer is dropped.
    pub fn disconnect_radius(&self) -> f64 {
        self.connect_radius * self.disconnect_radius_multiplier
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            connect_radius: 30.0,
            disconnect_radius_multiplier: 1.5,
            max_peers: 8,
            evaluation_debounce: Duration::from_millis(250),
        }
    }
}

/// A media attach or detach decision.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PeerTransition {
    /// Attach media to the peer.
    Connect(String),
    /// Drop media to the peer.
    Disconnect(String),
}

/// What the selector knows about one peer.
#[derive(Clone, Debug)]
struct PeerState {
    /// Distance to the peer; infinite when unknown.
    distance: f64,
    /// Whether the distance came from the cell rather than being derived
    /// from positions.
    has_explicit_distance: bool,
    last_updated: Instant,
    position: Option<Vec3>,
}

/// Peer-set selection with hysteresis and a hard cap.
#[derive(Debug)]
pub struct PeerSelector {
    config: SelectorConfig,
    /// Peers the cell currently reports in range.
    candidates: HashSet<String>,
    /// Everything known per peer, kept briefly past candidacy.
    peers: HashMap<String, PeerState>,
    /// Peers media is currently attached to.
    connected: HashSet<String>,
    local_position: Option<Vec3>,
    /// Armed while an evaluation is scheduled.
    eval_at: Option<Instant>,
}

impl PeerSelector {
    /// Create a selector with the provided tuning.
    pub fn new(config: SelectorConfig) -> Self {
        Self {
            config,
            candidates: HashSet::new(),
            peers: HashMap::new(),
            connected: HashSet::new(),
            local_position: None,
            eval_at: None,
        }
    }

    /// Immutable reference to the selector's tuning.
    pub const fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Whether media is currently attached to the peer.
    pub fn is_connected(&self, id: &str) -> bool {
        self.connected.contains(id)
    }

    /// Number of peers media is currently attached to.
    pub fn connected_len(&self) -> usize {
        self.connected.len()
    }

    /// When the next evaluation is due, if one is scheduled.
    pub const fn next_evaluation(&self) -> Option<Instant> {
        self.eval_at
    }

    /// Fold a peer frame from the cell into the candidate set.
    ///
    /// A frame carrying members replaces the candidate set wholesale; a
    /// frame carrying only deltas is applied incrementally. Distances from
    /// the frame are authoritative; positions fill in distances for peers
    /// the frame didn't measure.
    pub fn apply_peer_diff(&mut self, diff: &PeerDiff, now: Instant) {
        let delta_only =
            diff.peers.is_empty() && (!diff.added.is_empty() || !diff.removed.is_empty());

        if delta_only {
            for id in &diff.added {
                self.candidates.insert(id.clone());
            }
            for id in &diff.removed {
                self.candidates.remove(id);
            }
        } else {
            self.candidates = diff.peers.iter().cloned().collect();
        }

        for (id, position) in &diff.positions {
            let state = self.entry(id, now);
            state.position = Some(*position);
            state.last_updated = now;
        }

        for (id, distance) in &diff.distances {
            let state = self.entry(id, now);
            state.distance = *distance;
            state.has_explicit_distance = true;
            state.last_updated = now;
        }

        // Peers reported with a position but no measurement fall back to a
        // locally derived distance.
        if let Some(local) = self.local_position {
            for (id, _) in diff
                .positions
                .iter()
                .filter(|(id, _)| !diff.distances.contains_key(*id))
            {
                if let Some(state) = self.peers.get_mut(id) {
                    if !state.has_explicit_distance {
                        if let Some(position) = state.position {
                            state.distance = local.distance(position);
                        }
                    }
                }
            }
        }

        self.schedule(now);
    }

    /// Update the local pose, rederiving every position-known distance.
    pub fn update_local_position(&mut self, position: Vec3, now: Instant) {
        self.local_position = Some(position);

        for state in self.peers.values_mut() {
            if let Some(peer_position) = state.position {
                state.distance = position.distance(peer_position);
                state.has_explicit_distance = false;
                state.last_updated = now;
            }
        }

        self.schedule(now);
    }

    /// Store or clear a peer's position, deriving its distance from the
    /// local pose when one is known.
    pub fn update_peer_position(&mut self, id: &str, position: Option<Vec3>, now: Instant) {
        let local = self.local_position;
        let state = self.entry(id, now);

        state.position = position;
        state.distance = match (local, position) {
            (Some(local), Some(position)) => local.distance(position),
            _ => f64::INFINITY,
        };
        state.has_explicit_distance = false;
        state.last_updated = now;

        self.schedule(now);
    }

    /// Record a distance measured by the cell; `None` forgets it.
    pub fn update_peer_distance(&mut self, id: &str, distance: Option<f64>, now: Instant) {
        let state = self.entry(id, now);

        state.distance = distance.unwrap_or(f64::INFINITY);
        state.has_explicit_distance = distance.is_some();
        state.last_updated = now;

        self.schedule(now);
    }

    /// Forget a peer entirely, detaching media immediately if attached.
    pub fn remove_peer(&mut self, id: &str, now: Instant) -> Option<PeerTransition> {
        self.candidates.remove(id);
        self.peers.remove(id);
        self.schedule(now);

        self.connected
            .remove(id)
            .then(|| PeerTransition::Disconnect(id.to_owned()))
    }

    /// Run the evaluation pass if one is scheduled and due.
    ///
    /// Disconnects are decided first so their slots are refilled in the
    /// same pass; connects are emitted in order of increasing distance.
    pub fn evaluate_due(&mut self, now: Instant) -> Vec<PeerTransition> {
        match self.eval_at {
            Some(at) if at <= now => self.eval_at = None,
            _ => return Vec::new(),
        }

        let disconnect_radius = self.config.disconnect_radius();
        let mut transitions = Vec::new();
        let mut dropped = HashSet::new();

        let attached: Vec<String> = self.connected.iter().cloned().collect();
        for id in attached {
            let keep = self.candidates.contains(&id)
                && self
                    .peers
                    .get(&id)
                    .is_some_and(|state| state.distance <= disconnect_radius);

            if !keep {
                self.connected.remove(&id);
                dropped.insert(id.clone());
                transitions.push(PeerTransition::Disconnect(id));
            }
        }

        let free_slots = self.config.max_peers.saturating_sub(self.connected.len());

        if free_slots > 0 {
            let mut eligible: Vec<(&String, f64)> = self
                .candidates
                .iter()
                .filter(|id| !self.connected.contains(*id) && !dropped.contains(*id))
                .filter_map(|id| self.peers.get(id).map(|state| (id, state.distance)))
                .filter(|(_, distance)| *distance <= self.config.connect_radius)
                .collect();

            eligible.sort_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.0.cmp(b.0))
            });

            let admitted: Vec<String> = eligible
                .into_iter()
                .take(free_slots)
                .map(|(id, _)| id.clone())
                .collect();

            for id in admitted {
                self.connected.insert(id.clone());
                transitions.push(PeerTransition::Connect(id));
            }
        }

        // Bounded memory: drop state for peers that left candidacy and went
        // quiet.
        let candidates = &self.candidates;
        self.peers.retain(|id, state| {
            candidates.contains(id)
                || now.saturating_duration_since(state.last_updated) <= STALE_PEER_TTL
        });

        transitions
    }

    fn entry(&mut self, id: &str, now: Instant) -> &mut PeerState {
        self.peers
            .entry(id.to_owned())
            .or_insert_with(|| PeerState {
                distance: f64::INFINITY,
                has_explicit_distance: false,
                last_updated: now,
                position: None,
            })
    }

    fn schedule(&mut self, now: Instant) {
        if self.eval_at.is_none() {
            self.eval_at = Some(now + self.config.evaluation_debounce);
        }
    }
}

impl Default for PeerSelector {
    fn default() -> Self {
        Self::new(SelectorConfig::default())
    }
}
