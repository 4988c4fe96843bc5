//! External collaborators the execution core consumes but does not interpret.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

use crate::{declaration::TimerDeclaration, window::BoundedWindow, Error, Result};

/// Read-only, window-scoped lookup of side inputs.
///
/// Values are snapshots supplied once per task; readers never mutate them.
pub trait SideInputReader: Send + Sync {
    fn get(&self, view: &str, window: &BoundedWindow) -> Option<Value>;

    fn contains(&self, view: &str) -> bool;

    fn is_empty(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoSideInputs;

impl SideInputReader for NoSideInputs {
    fn get(&self, _view: &str, _window: &BoundedWindow) -> Option<Value> {
        None
    }

    fn contains(&self, _view: &str) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        true
    }
}

/// Side inputs materialized as one value per (view, window).
#[derive(Debug, Clone, Default)]
pub struct SideInputSnapshot {
    views: HashMap<String, Vec<(BoundedWindow, Value)>>,
}

impl SideInputSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global(mut self, view: impl Into<String>, value: Value) -> Self {
        self.insert(view, BoundedWindow::Global, value);
        self
    }

    pub fn insert(&mut self, view: impl Into<String>, window: BoundedWindow, value: Value) {
        let entries = self.views.entry(view.into()).or_default();
        match entries.iter_mut().find(|(w, _)| *w == window) {
            Some((_, existing)) => *existing = value,
            None => entries.push((window, value)),
        }
    }

    pub fn into_shared(self) -> Arc<dyn SideInputReader> {
        Arc::new(self)
    }
}

impl SideInputReader for SideInputSnapshot {
    /// Exact window match first, then the view's global value.
    fn get(&self, view: &str, window: &BoundedWindow) -> Option<Value> {
        let entries = self.views.get(view)?;
        entries
            .iter()
            .find(|(w, _)| w == window)
            .or_else(|| entries.iter().find(|(w, _)| *w == BoundedWindow::Global))
            .map(|(_, v)| v.clone())
    }

    fn contains(&self, view: &str) -> bool {
        self.views.contains_key(view)
    }

    fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

/// Opaque metrics/aggregator sink. Values are not interpreted by the core.
pub trait MetricsSink: Send + Sync {
    fn add(&self, step: &str, name: &str, value: i64);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn add(&self, _step: &str, _name: &str, _value: i64) {}
}

/// Per-step services supplied by the engine.
pub trait StepContext: Send + Sync {
    fn step_name(&self) -> &str;

    /// Schedules `timer` for `window` at `at`. Engines without a timer backend reject this.
    fn set_timer(
        &self,
        timer: &TimerDeclaration,
        window: &BoundedWindow,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let _ = (window, at);
        Err(Error::msg(format!(
            "step '{}' has no timer backend; cannot set timer '{}'",
            self.step_name(),
            timer.id
        )))
    }
}

/// Step context with no state or timer backend.
#[derive(Debug, Clone)]
pub struct NoOpStepContext {
    step_name: String,
}

impl NoOpStepContext {
    pub fn new(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
        }
    }
}

impl StepContext for NoOpStepContext {
    fn step_name(&self) -> &str {
        &self.step_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn snapshot_prefers_exact_window_then_global() {
        let start = Utc.timestamp_opt(0, 0).unwrap();
        let end = Utc.timestamp_opt(60, 0).unwrap();
        let window = BoundedWindow::interval(start, end);

        let mut snapshot = SideInputSnapshot::new().with_global("threshold", Value::from(10));
        assert_eq!(snapshot.get("threshold", &window), Some(Value::from(10)));

        snapshot.insert("threshold", window.clone(), Value::from(20));
        assert_eq!(snapshot.get("threshold", &window), Some(Value::from(20)));
        assert_eq!(
            snapshot.get("threshold", &BoundedWindow::Global),
            Some(Value::from(10))
        );
        assert_eq!(snapshot.get("missing", &window), None);
    }
}
