//! Configuration drift detection
//!
//! A pass compares the freshly rendered configuration against the map that
//! was active before the pass. Three durable facts decide the outcome: the
//! persisted ConfigMap, the workload's `fabric.dev/config-hash` pod-template
//! annotation, and the `configChanged` status flag. Because the comparison
//! only reads durable state, a pass that crashes after persisting the new
//! map but before touching the workload is detected on the next pass.

use crate::render::{config_hash, ConfigData};

/// Result of comparing a render against the active configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Drift {
    /// No map was active yet; nothing to roll
    FirstRender,
    /// The active map equals the render and the workload runs it
    Unchanged,
    /// The render differs from the active map
    Changed {
        /// Hash of the new render
        hash: String,
    },
    /// The map was already persisted but the workload was never rolled onto it
    Interrupted {
        /// Hash of the persisted render
        hash: String,
    },
}

impl Drift {
    /// Compare `rendered` against the map active before this pass
    ///
    /// `applied_hash` is the config-hash annotation of the existing workload,
    /// if there is one. A missing workload is never treated as interrupted;
    /// it will be created with the current hash.
    pub fn detect(
        previous: Option<&ConfigData>,
        rendered: &ConfigData,
        applied_hash: Option<&str>,
    ) -> Self {
        let Some(previous) = previous else {
            return Self::FirstRender;
        };

        let hash = config_hash(rendered);
        if previous != rendered {
            return Self::Changed { hash };
        }

        match applied_hash {
            Some(applied) if applied != hash => Self::Interrupted { hash },
            _ => Self::Unchanged,
        }
    }

    /// Whether the workload must be rolled onto the new configuration
    pub fn requires_rollout(&self) -> bool {
        matches!(self, Self::Changed { .. } | Self::Interrupted { .. })
    }

    /// Hash the workload is rolled to, when a rollout is required
    pub fn rollout_hash(&self) -> Option<&str> {
        match self {
            Self::Changed { hash } | Self::Interrupted { hash } => Some(hash),
            Self::FirstRender | Self::Unchanged => None,
        }
    }
}

/// New value of the `configChanged` flag, or `None` when it must not be written
///
/// A rollout always sets the flag. A quiet pass clears it only when it was
/// previously set, so a converged intent sees no status write.
pub fn config_changed_transition(drift: &Drift, previously_changed: bool) -> Option<bool> {
    if drift.requires_rollout() {
        Some(true)
    } else if previously_changed {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> ConfigData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn first_render_is_treated_as_unchanged() {
        let rendered = data(&[("zoo.servers", "server.1=10.0.0.1")]);

        let drift = Drift::detect(None, &rendered, None);

        assert_eq!(drift, Drift::FirstRender);
        assert!(!drift.requires_rollout());
        assert_eq!(config_changed_transition(&drift, false), None);
    }

    #[test]
    fn equal_map_with_matching_hash_is_unchanged() {
        let rendered = data(&[("myid.10.0.0.1", "1")]);
        let hash = config_hash(&rendered);

        let drift = Drift::detect(Some(&rendered), &rendered, Some(&hash));

        assert_eq!(drift, Drift::Unchanged);
        assert_eq!(drift.rollout_hash(), None);
    }

    #[test]
    fn differing_map_requires_a_rollout_to_the_new_hash() {
        let previous = data(&[("myid.10.0.0.1", "1")]);
        let rendered = data(&[("myid.10.0.0.1", "1"), ("myid.10.0.0.2", "2")]);

        let drift = Drift::detect(Some(&previous), &rendered, Some("stale"));

        assert!(drift.requires_rollout());
        assert_eq!(drift.rollout_hash(), Some(config_hash(&rendered).as_str()));
        assert_eq!(config_changed_transition(&drift, false), Some(true));
    }

    // =========================================================================
    // Story: A pass crashes between persisting and rolling
    // =========================================================================
    //
    // The first pass wrote the new map and died before touching the workload.
    // The next pass sees an equal map, so only the workload's stale hash
    // reveals the lost rollout.

    #[test]
    fn stale_workload_hash_after_an_equal_map_is_an_interrupted_rollout() {
        let rendered = data(&[("api.10.0.0.1", "listen_port=8082")]);
        let old_hash = config_hash(&data(&[("api.10.0.0.1", "listen_port=8081")]));

        let drift = Drift::detect(Some(&rendered), &rendered, Some(&old_hash));

        assert!(matches!(drift, Drift::Interrupted { .. }));
        assert!(drift.requires_rollout());
    }

    #[test]
    fn equal_map_without_a_workload_is_not_interrupted() {
        let rendered = data(&[("api.10.0.0.1", "listen_port=8082")]);

        assert_eq!(Drift::detect(Some(&rendered), &rendered, None), Drift::Unchanged);
    }

    // =========================================================================
    // Story: The flag is cleared exactly once after a rollout settles
    // =========================================================================

    #[test]
    fn quiet_pass_clears_a_set_flag_and_then_stays_silent() {
        assert_eq!(config_changed_transition(&Drift::Unchanged, true), Some(false));
        assert_eq!(config_changed_transition(&Drift::Unchanged, false), None);
        assert_eq!(config_changed_transition(&Drift::FirstRender, true), Some(false));
    }
}
