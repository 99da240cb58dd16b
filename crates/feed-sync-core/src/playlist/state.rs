use feed_sync_models::PlaylistState;

pub type DeltaId = u64;

/// A local change applied before the remote confirmed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    AddTrack { playlist_id: String, track_id: String },
    Unlike { track_id: String },
}

impl Delta {
    fn apply(&self, state: &mut PlaylistState) {
        match self {
            Delta::AddTrack { playlist_id, track_id } => {
                state.insert_track(playlist_id, track_id);
            }
            Delta::Unlike { track_id } => {
                state.unlike(track_id);
            }
        }
    }
}

/// Baseline from the last full fetch plus an overlay of pending deltas.
///
/// Reads merge the overlay over the baseline. Rolling a delta back only
/// drops it from the overlay, so the merged view returns to exactly what it
/// was before the delta was pushed.
#[derive(Debug, Clone, Default)]
pub struct LayeredState {
    baseline: PlaylistState,
    overlay: Vec<(DeltaId, Delta)>,
    next_id: DeltaId,
}

impl LayeredState {
    pub fn new(baseline: PlaylistState) -> Self {
        Self {
            baseline,
            overlay: Vec::new(),
            next_id: 0,
        }
    }

    pub fn baseline(&self) -> &PlaylistState {
        &self.baseline
    }

    pub fn overlay_len(&self) -> usize {
        self.overlay.len()
    }

    pub fn push(&mut self, delta: Delta) -> DeltaId {
        let id = self.next_id;
        self.next_id += 1;
        self.overlay.push((id, delta));
        id
    }

    pub fn view(&self) -> PlaylistState {
        let mut merged = self.baseline.clone();
        for (_, delta) in &self.overlay {
            delta.apply(&mut merged);
        }
        merged
    }

    /// Fold a confirmed delta into the baseline. Returns false if it was
    /// already gone from the overlay.
    pub fn commit(&mut self, id: DeltaId) -> bool {
        match self.take(id) {
            Some(delta) => {
                delta.apply(&mut self.baseline);
                true
            }
            None => false,
        }
    }

    pub fn rollback(&mut self, id: DeltaId) -> bool {
        self.take(id).is_some()
    }

    /// Install a freshly fetched baseline, keeping only the deltas `keep` accepts
    pub fn replace_baseline(&mut self, baseline: PlaylistState, keep: impl Fn(DeltaId) -> bool) {
        self.baseline = baseline;
        self.overlay.retain(|(id, _)| keep(*id));
    }

    fn take(&mut self, id: DeltaId) -> Option<Delta> {
        let index = self.overlay.iter().position(|(candidate, _)| *candidate == id)?;
        Some(self.overlay.remove(index).1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_sync_models::PlaylistSummary;
    use std::collections::{HashMap, HashSet};

    fn baseline() -> PlaylistState {
        PlaylistState {
            playlists: vec![PlaylistSummary {
                id: "p1".to_string(),
                title: "Focus".to_string(),
                track_count: 2,
            }],
            liked_track_ids: vec!["t1".to_string(), "t2".to_string(), "t3".to_string()],
            playlist_membership: HashMap::from([(
                "p1".to_string(),
                HashSet::from(["t1".to_string(), "t2".to_string()]),
            )]),
        }
    }

    fn add(track: &str) -> Delta {
        Delta::AddTrack {
            playlist_id: "p1".to_string(),
            track_id: track.to_string(),
        }
    }

    #[test]
    fn test_view_merges_overlay() {
        let mut layered = LayeredState::new(baseline());
        layered.push(add("t9"));
        layered.push(Delta::Unlike {
            track_id: "t2".to_string(),
        });

        let view = layered.view();
        assert!(view.contains("p1", "t9"));
        assert_eq!(view.playlist("p1").unwrap().track_count, 3);
        assert!(!view.is_liked("t2"));
        assert_eq!(layered.baseline(), &baseline());
    }

    #[test]
    fn test_rollback_restores_view_exactly() {
        let mut layered = LayeredState::new(baseline());
        let before = layered.view();
        let id = layered.push(Delta::Unlike {
            track_id: "t2".to_string(),
        });
        assert!(layered.rollback(id));
        assert_eq!(layered.view(), before);
        // Order of the liked list survives the round trip
        assert_eq!(layered.view().liked_track_ids, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_rollback_of_existing_member_leaves_count() {
        let mut layered = LayeredState::new(baseline());
        let id = layered.push(add("t1"));
        assert_eq!(layered.view().playlist("p1").unwrap().track_count, 2);
        layered.rollback(id);
        assert_eq!(layered.view(), baseline());
    }

    #[test]
    fn test_commit_folds_into_baseline() {
        let mut layered = LayeredState::new(baseline());
        let id = layered.push(add("t9"));
        assert!(layered.commit(id));
        assert!(!layered.commit(id));
        assert_eq!(layered.overlay_len(), 0);
        assert!(layered.baseline().contains("p1", "t9"));
        assert_eq!(layered.baseline().playlist("p1").unwrap().track_count, 3);
    }

    #[test]
    fn test_replace_baseline_keeps_selected_deltas() {
        let mut layered = LayeredState::new(baseline());
        let keep = layered.push(add("t8"));
        layered.push(add("t9"));

        layered.replace_baseline(PlaylistState::default(), |id| id == keep);
        assert_eq!(layered.overlay_len(), 1);
        assert!(layered.baseline().playlists.is_empty());
    }
}
