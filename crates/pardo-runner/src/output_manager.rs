//! Bundle-scoped buffer of tagged outputs.

use indexmap::IndexMap;
use std::sync::{Mutex, MutexGuard};

use pardo_core::{output::OutputSink, OutputTag, WindowedValue};

/// Tag-keyed, insertion-ordered buffer of everything one bundle emitted.
///
/// Any tag is accepted; rejecting unknown tags is the router's job. Values are grouped by tag,
/// tags are ordered by first emission, and repeated emissions are all kept. The lock is held
/// only while a value is appended.
pub struct OutputManager<O> {
    outputs: Mutex<IndexMap<OutputTag, Vec<WindowedValue<O>>>>,
}

impl<O> Default for OutputManager<O> {
    fn default() -> Self {
        Self {
            outputs: Mutex::new(IndexMap::new()),
        }
    }
}

impl<O> OutputManager<O> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<OutputTag, Vec<WindowedValue<O>>>> {
        self.outputs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn output(&self, tag: &OutputTag, value: WindowedValue<O>) {
        let mut outputs = self.lock();
        match outputs.get_mut(tag) {
            Some(values) => values.push(value),
            None => {
                outputs.insert(tag.clone(), vec![value]);
            }
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Total buffered values across all tags.
    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().values().all(Vec::is_empty)
    }

    pub fn tags(&self) -> Vec<OutputTag> {
        self.lock().keys().cloned().collect()
    }

    /// Moves the buffered values out, leaving the manager empty.
    pub fn drain(&self) -> Drain<O> {
        let taken = std::mem::take(&mut *self.lock());
        Drain {
            groups: taken.into_iter(),
            current: None,
        }
    }
}

impl<O: Send> OutputSink<O> for OutputManager<O> {
    fn output(&self, tag: &OutputTag, value: WindowedValue<O>) {
        OutputManager::output(self, tag, value);
    }
}

/// Owning iterator over drained `(tag, value)` pairs, grouped by tag.
pub struct Drain<O> {
    groups: indexmap::map::IntoIter<OutputTag, Vec<WindowedValue<O>>>,
    current: Option<(OutputTag, std::vec::IntoIter<WindowedValue<O>>)>,
}

impl<O> Iterator for Drain<O> {
    type Item = (OutputTag, WindowedValue<O>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((tag, values)) = self.current.as_mut() {
                if let Some(value) = values.next() {
                    return Some((tag.clone(), value));
                }
            }
            let (tag, values) = self.groups.next()?;
            self.current = Some((tag, values.into_iter()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: Vec<(OutputTag, WindowedValue<i32>)>) -> Vec<(String, i32)> {
        pairs
            .into_iter()
            .map(|(tag, v)| (tag.id().to_string(), v.value))
            .collect()
    }

    #[test]
    fn drain_groups_by_tag_in_first_emission_order() {
        let manager = OutputManager::new();
        let main = OutputTag::new("main");
        let side = OutputTag::new("side");

        manager.output(&side, WindowedValue::in_global_window(1));
        manager.output(&main, WindowedValue::in_global_window(2));
        manager.output(&side, WindowedValue::in_global_window(3));
        manager.output(&side, WindowedValue::in_global_window(3));

        assert_eq!(manager.len(), 4);
        assert_eq!(manager.tags(), vec![side.clone(), main.clone()]);
        assert_eq!(
            tags(manager.drain().collect()),
            vec![
                ("side".to_string(), 1),
                ("side".to_string(), 3),
                ("side".to_string(), 3),
                ("main".to_string(), 2),
            ]
        );
        assert!(manager.is_empty());
    }

    #[test]
    fn clear_discards_everything() {
        let manager = OutputManager::new();
        manager.output(&OutputTag::new("main"), WindowedValue::in_global_window(1));
        manager.clear();
        assert!(manager.is_empty());
        assert_eq!(manager.drain().count(), 0);
    }
}
