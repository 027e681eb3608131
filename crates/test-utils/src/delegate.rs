use std::sync::Mutex;

use buildplan::engine::{BuildDelegate, BuildEvent};
use buildplan::types::Diagnostic;

/// Delegate that keeps every event for later assertions.
#[derive(Debug, Default)]
pub struct RecordingDelegate {
    events: Mutex<Vec<BuildEvent>>,
}

impl RecordingDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BuildEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BuildEvent::TaskStarted { rule_info, .. } => Some(rule_info),
                _ => None,
            })
            .collect()
    }

    pub fn up_to_date(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BuildEvent::TaskUpToDate { rule_info, .. } => Some(rule_info),
                _ => None,
            })
            .collect()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BuildEvent::Diagnostic(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    /// Index of the first event matching `pred`.
    pub fn position(&self, pred: impl Fn(&BuildEvent) -> bool) -> Option<usize> {
        self.events().iter().position(pred)
    }

    pub fn completed_at(&self, rule: &str) -> Option<usize> {
        self.position(|e| matches!(e, BuildEvent::TaskCompleted { rule_info, .. } if rule_info == rule))
    }

    pub fn started_at(&self, rule: &str) -> Option<usize> {
        self.position(|e| matches!(e, BuildEvent::TaskStarted { rule_info, .. } if rule_info == rule))
    }

    /// Panics unless `first` completed before `second` started.
    pub fn assert_completed_before_started(&self, first: &str, second: &str) {
        let done = self
            .completed_at(first)
            .unwrap_or_else(|| panic!("'{first}' never completed"));
        let start = self
            .started_at(second)
            .unwrap_or_else(|| panic!("'{second}' never started"));
        assert!(
            done < start,
            "'{first}' completed at {done} but '{second}' started at {start}"
        );
    }
}

impl BuildDelegate for RecordingDelegate {
    fn on_event(&self, event: &BuildEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
