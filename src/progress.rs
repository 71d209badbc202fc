use crate::model::EntityType;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepProgress {
    pub name: String,
    pub status: StepStatus,
}

/// Ordered step statuses for one run. Cloning shares the underlying list so
/// a caller can poll while workers update it.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    steps: Arc<RwLock<Vec<StepProgress>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker seeded with one pending step per entity type, in commit order.
    pub fn for_import() -> Self {
        let tracker = Self::new();
        for kind in EntityType::ALL {
            tracker.set_status(kind.step_name(), StepStatus::Pending);
        }
        tracker
    }

    pub fn set_status(&self, step: &str, status: StepStatus) {
        let mut steps = match self.steps.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match steps.iter_mut().find(|s| s.name == step) {
            Some(s) => s.status = status,
            None => steps.push(StepProgress {
                name: step.to_string(),
                status,
            }),
        }
    }

    pub fn status(&self, step: &str) -> Option<StepStatus> {
        self.snapshot()
            .into_iter()
            .find(|s| s.name == step)
            .map(|s| s.status)
    }

    /// Steps in the order they were first registered.
    pub fn snapshot(&self) -> Vec<StepProgress> {
        match self.steps.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn get_all(&self) -> BTreeMap<String, StepStatus> {
        self.snapshot()
            .into_iter()
            .map(|s| (s.name, s.status))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_tracker_starts_all_pending_in_order() {
        let t = ProgressTracker::for_import();
        let snap = t.snapshot();
        assert_eq!(snap.len(), EntityType::ALL.len());
        assert_eq!(snap[0].name, "campuses");
        assert_eq!(snap[18].name, "answers");
        assert!(snap.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn clones_share_state() {
        let t = ProgressTracker::new();
        let view = t.clone();
        t.set_status("people", StepStatus::Running);
        assert_eq!(view.status("people"), Some(StepStatus::Running));
        t.set_status("people", StepStatus::Complete);
        assert_eq!(view.get_all().get("people"), Some(&StepStatus::Complete));
        assert_eq!(
            serde_json::to_value(StepStatus::Complete).expect("json"),
            serde_json::json!("complete")
        );
    }
}
