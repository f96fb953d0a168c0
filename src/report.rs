use std::cell::RefCell;

use serde::Serialize;
use tracing::{info, warn};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportLevel {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEvent {
    pub level: ReportLevel,
    pub event: String,
    pub counts: Vec<(String, usize)>,
}

impl ReportEvent {
    #[cfg(test)]
    pub fn count(&self, name: &str) -> Option<usize> {
        self.counts
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }
}

/// Receives the counts the pipeline treats as a regression signal.
pub trait Reporter {
    fn emit(&self, level: ReportLevel, event: &str, counts: &[(&str, usize)]);
}

/// Forwards every event to `tracing`.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn emit(&self, level: ReportLevel, event: &str, counts: &[(&str, usize)]) {
        let rendered = counts
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<String>>()
            .join(" ");

        match level {
            ReportLevel::Info => info!(event = %event, counts = %rendered, "stratification count"),
            ReportLevel::Warning => {
                warn!(event = %event, counts = %rendered, "data consistency warning")
            }
        }
    }
}

/// Keeps events in memory, optionally forwarding each one to another reporter.
#[derive(Default)]
pub struct MemoryReporter {
    forward: Option<Box<dyn Reporter>>,
    events: RefCell<Vec<ReportEvent>>,
}

impl MemoryReporter {
    pub fn forwarding(forward: impl Reporter + 'static) -> Self {
        Self {
            forward: Some(Box::new(forward)),
            events: RefCell::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.borrow().clone()
    }

    #[cfg(test)]
    pub fn find(&self, event: &str) -> Option<ReportEvent> {
        self.events
            .borrow()
            .iter()
            .find(|entry| entry.event == event)
            .cloned()
    }
}

impl Reporter for MemoryReporter {
    fn emit(&self, level: ReportLevel, event: &str, counts: &[(&str, usize)]) {
        if let Some(forward) = &self.forward {
            forward.emit(level, event, counts);
        }
        self.events.borrow_mut().push(ReportEvent {
            level,
            event: event.to_string(),
            counts: counts
                .iter()
                .map(|(key, value)| ((*key).to_string(), *value))
                .collect(),
        });
    }
}
