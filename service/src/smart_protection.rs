//! Smart-protection gate for stub deletion (§4.5).
//!
//! A stub task's orphan set (stubs present locally but absent from the
//! remote listing) can spike if the remote host is briefly unreachable or
//! a listing call returns a truncated page. Deleting every orphan on the
//! first scan that sees them would wipe out a user's local library on a
//! transient hiccup. Instead, a path must show up as an orphan across
//! several consecutive scans before it is approved for deletion, unless
//! the orphan set is small enough that a mass accident is implausible.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ProtectionState {
    protected: HashMap<String, u32>,
}

/// Per-task smart-protection counter, persisted as JSON beside the stub
/// task's target root.
pub struct ProtectionGate {
    state_path: PathBuf,
    threshold: usize,
    grace_scans: u32,
    state: ProtectionState,
}

impl ProtectionGate {
    const STATE_FILE_NAME: &'static str = "strm_protection_state.json";

    pub fn load(target_root: &Path, threshold: usize, grace_scans: u32) -> anyhow::Result<Self> {
        let state_path = target_root.join(Self::STATE_FILE_NAME);
        let state = if state_path.exists() {
            let raw = std::fs::read_to_string(&state_path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            ProtectionState::default()
        };

        Ok(Self {
            state_path,
            threshold,
            grace_scans,
            state,
        })
    }

    fn save(&self) -> anyhow::Result<()> {
        let raw = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.state_path, raw)?;
        Ok(())
    }

    /// Run one scan through the gate.
    ///
    /// `candidates` is the set of stub paths that look orphaned this scan
    /// (present locally, absent from the remote listing). `still_present`
    /// is the set of stub paths the remote listing still accounts for.
    ///
    /// Returns the subset of `candidates` cleared for deletion this scan.
    pub fn process(
        &mut self,
        candidates: &HashSet<String>,
        still_present: &HashSet<String>,
    ) -> anyhow::Result<HashSet<String>> {
        // A path that reappeared resets its counter outright.
        for path in still_present {
            self.state.protected.remove(path);
        }

        if candidates.len() < self.threshold {
            // Small orphan sets bypass the grace period: a handful of
            // missing files is very unlikely to be a listing glitch.
            self.save()?;
            return Ok(candidates.clone());
        }

        for path in candidates {
            *self.state.protected.entry(path.clone()).or_insert(0) += 1;
        }

        let mut ready = HashSet::new();
        for (path, count) in self.state.protected.clone() {
            if count >= self.grace_scans {
                ready.insert(path.clone());
                self.state.protected.remove(&path);
            }
        }

        self.save()?;
        Ok(ready)
    }

    /// Current per-path confirmation counts, exposed for the control
    /// plane's status snapshot.
    pub fn stats(&self) -> HashMap<String, u32> {
        self.state.protected.clone()
    }

    /// Clear all tracked counters without approving anything for deletion.
    pub fn reset(&mut self) -> anyhow::Result<()> {
        self.state.protected.clear();
        self.save()
    }

    /// Approve every currently tracked path for deletion immediately,
    /// bypassing the remaining grace scans. Exposed as a manual override
    /// for an operator who has confirmed the remote listing is healthy.
    pub fn force_approve_all(&mut self) -> anyhow::Result<HashSet<String>> {
        let approved: HashSet<String> = self.state.protected.keys().cloned().collect();
        self.state.protected.clear();
        self.save()?;
        Ok(approved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(dir: &Path, threshold: usize, grace_scans: u32) -> ProtectionGate {
        ProtectionGate::load(dir, threshold, grace_scans).unwrap()
    }

    #[test]
    fn test_small_orphan_set_bypasses_grace_period() {
        let dir = tempfile::tempdir().unwrap();
        let mut gate = gate(dir.path(), 100, 3);

        let candidates: HashSet<String> = ["a.stub".to_string()].into_iter().collect();
        let ready = gate.process(&candidates, &HashSet::new()).unwrap();
        assert_eq!(ready, candidates);
    }

    #[test]
    fn test_large_orphan_set_requires_grace_scans() {
        let dir = tempfile::tempdir().unwrap();
        let mut gate = gate(dir.path(), 2, 3);

        let candidates: HashSet<String> =
            ["a.stub".to_string(), "b.stub".to_string(), "c.stub".to_string()]
                .into_iter()
                .collect();

        let ready1 = gate.process(&candidates, &HashSet::new()).unwrap();
        assert!(ready1.is_empty());
        let ready2 = gate.process(&candidates, &HashSet::new()).unwrap();
        assert!(ready2.is_empty());
        let ready3 = gate.process(&candidates, &HashSet::new()).unwrap();
        assert_eq!(ready3, candidates);
    }

    #[test]
    fn test_reappearance_resets_counter() {
        let dir = tempfile::tempdir().unwrap();
        let mut gate = gate(dir.path(), 2, 3);

        let candidates: HashSet<String> =
            ["a.stub".to_string(), "b.stub".to_string(), "c.stub".to_string()]
                .into_iter()
                .collect();

        gate.process(&candidates, &HashSet::new()).unwrap();
        gate.process(&candidates, &HashSet::new()).unwrap();
        assert_eq!(gate.stats().get("a.stub"), Some(&2));

        let reappeared: HashSet<String> = ["a.stub".to_string()].into_iter().collect();
        gate.process(&candidates, &reappeared).unwrap();
        assert_eq!(gate.stats().get("a.stub"), None);
    }

    #[test]
    fn test_force_approve_all() {
        let dir = tempfile::tempdir().unwrap();
        let mut gate = gate(dir.path(), 1, 3);

        let candidates: HashSet<String> = ["a.stub".to_string(), "b.stub".to_string()]
            .into_iter()
            .collect();
        gate.process(&candidates, &HashSet::new()).unwrap();
        // threshold 1 means this set bypasses immediately; force another
        // round with a higher threshold gate instance to exercise the
        // manual override path.
        let mut gate2 = gate(dir.path(), 10, 3);
        gate2.process(&candidates, &HashSet::new()).unwrap();
        let approved = gate2.force_approve_all().unwrap();
        assert_eq!(approved, candidates);
        assert!(gate2.stats().is_empty());
    }
}
