//! Process-wide cache of analyzed signatures, keyed by function class.

use std::{
    any::TypeId,
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
};

use crate::{
    analyzer::{SignatureAnalyzer, SignatureValidationError},
    dofn::DoFn,
    signature::{FnClass, Signature},
};

type Slot = Arc<Mutex<Option<Arc<Signature>>>>;

/// Builds each class's signature at most once, even under concurrent first access.
///
/// Construction for one class holds only that class's slot, so unrelated classes are analyzed in
/// parallel. A failed analysis is not cached; the next lookup retries and reports the same error.
#[derive(Default)]
pub struct SignatureRegistry {
    slots: Mutex<HashMap<TypeId, Slot>>,
}

static GLOBAL: OnceLock<SignatureRegistry> = OnceLock::new();

impl SignatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static SignatureRegistry {
        GLOBAL.get_or_init(SignatureRegistry::new)
    }

    pub fn signature_of<F: DoFn>(&self) -> Result<Arc<Signature>, SignatureValidationError> {
        self.get_or_build(&FnClass::of::<F>(), SignatureAnalyzer::analyze_fn::<F>)
    }

    pub fn get_or_build(
        &self,
        class: &FnClass,
        build: impl FnOnce() -> Result<Signature, SignatureValidationError>,
    ) -> Result<Arc<Signature>, SignatureValidationError> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(class.type_id()).or_default().clone()
        };

        let mut cached = slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(signature) = cached.as_ref() {
            return Ok(Arc::clone(signature));
        }

        let signature = match build() {
            Ok(signature) => Arc::new(signature),
            Err(err) => {
                tracing::warn!(
                    event = "pardo.registry.invalid",
                    fn_class = %class,
                    error = %err,
                );
                return Err(err);
            }
        };
        tracing::debug!(event = "pardo.registry.built", fn_class = %class);
        *cached = Some(Arc::clone(&signature));
        Ok(signature)
    }

    pub fn contains(&self, class: &FnClass) -> bool {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.get(&class.type_id()).cloned()
        };
        slot.is_some_and(|slot| slot.lock().unwrap_or_else(|e| e.into_inner()).is_some())
    }

    /// Number of classes with a cached signature.
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = self
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        slots
            .iter()
            .filter(|slot| slot.lock().unwrap_or_else(|e| e.into_inner()).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        definition::FnDefinition,
        dofn::ProcessContext,
        restriction::ProcessContinuation,
        Result,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    impl DoFn for Echo {
        type Input = u32;
        type Output = u32;

        fn define(def: &mut FnDefinition) {
            def.process_element("process_element");
        }

        fn process_element(
            &mut self,
            ctx: &mut ProcessContext<'_, u32, u32>,
        ) -> Result<ProcessContinuation> {
            ctx.output(*ctx.element());
            Ok(ProcessContinuation::Stop)
        }
    }

    struct Broken;

    impl DoFn for Broken {
        type Input = u32;
        type Output = u32;

        fn define(def: &mut FnDefinition) {
            def.setup("setup");
        }

        fn process_element(
            &mut self,
            _ctx: &mut ProcessContext<'_, u32, u32>,
        ) -> Result<ProcessContinuation> {
            Ok(ProcessContinuation::Stop)
        }
    }

    #[test]
    fn repeated_lookups_share_one_signature() {
        let registry = SignatureRegistry::new();
        let first = registry.signature_of::<Echo>().unwrap();
        let second = registry.signature_of::<Echo>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.contains(&FnClass::of::<Echo>()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_first_access_builds_once() {
        let registry = SignatureRegistry::new();
        let builds = AtomicUsize::new(0);
        let class = FnClass::of::<Echo>();

        let signatures: Vec<Arc<Signature>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    scope.spawn(|| {
                        registry
                            .get_or_build(&class, || {
                                builds.fetch_add(1, Ordering::SeqCst);
                                SignatureAnalyzer::analyze_fn::<Echo>()
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(signatures.iter().all(|s| Arc::ptr_eq(s, &signatures[0])));
    }

    #[test]
    fn failures_are_reported_every_time_and_not_cached() {
        let registry = SignatureRegistry::new();
        let first = registry.signature_of::<Broken>().unwrap_err();
        let second = registry.signature_of::<Broken>().unwrap_err();
        assert_eq!(first, second);
        assert!(!registry.contains(&FnClass::of::<Broken>()));
        assert!(registry.is_empty());
    }
}
