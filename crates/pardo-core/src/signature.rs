use serde::{Serialize, Serializer};
use std::{any::TypeId, collections::BTreeMap, fmt};

use crate::{
    declaration::{DeclarationRegistry, StateDeclaration, TimerDeclaration},
    method::{
        BundleMethod, GetInitialRestrictionMethod, GetRestrictionCoderMethod, LifecycleMethod,
        NewTrackerMethod, OnTimerMethod, ProcessElementMethod, SplitRestrictionMethod,
    },
};

/// Identity of a user-function type. Signatures are cached by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FnClass {
    type_id: TypeId,
    name: &'static str,
}

impl FnClass {
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for FnClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl Serialize for FnClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name)
    }
}

/// Whether a function does a bounded amount of work per element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Boundedness {
    Bounded,
    Unbounded,
}

/// Immutable description of which methods a user function implements and which optional
/// parameters each of them accepts.
///
/// Only the [`crate::SignatureAnalyzer`] builds one, so every instance satisfies the cross
/// reference rules: on-timer ids and state/timer parameters resolve to declarations, and a
/// splittable signature carries its initial-restriction and new-tracker methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signature {
    fn_class: FnClass,
    boundedness: Boundedness,
    process_element: ProcessElementMethod,
    state_declarations: DeclarationRegistry<StateDeclaration>,
    timer_declarations: DeclarationRegistry<TimerDeclaration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_bundle: Option<BundleMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finish_bundle: Option<BundleMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    setup: Option<LifecycleMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    teardown: Option<LifecycleMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    get_initial_restriction: Option<GetInitialRestrictionMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    split_restriction: Option<SplitRestrictionMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_tracker: Option<NewTrackerMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    get_restriction_coder: Option<GetRestrictionCoderMethod>,
    on_timer_methods: BTreeMap<String, OnTimerMethod>,
}

impl Signature {
    pub fn fn_class(&self) -> &FnClass {
        &self.fn_class
    }

    pub fn boundedness(&self) -> Boundedness {
        self.boundedness
    }

    pub fn process_element(&self) -> &ProcessElementMethod {
        &self.process_element
    }

    pub fn state_declarations(&self) -> &DeclarationRegistry<StateDeclaration> {
        &self.state_declarations
    }

    pub fn timer_declarations(&self) -> &DeclarationRegistry<TimerDeclaration> {
        &self.timer_declarations
    }

    pub fn state_declaration(&self, id: &str) -> Option<&StateDeclaration> {
        self.state_declarations.get(id).map(|d| d.as_ref())
    }

    pub fn timer_declaration(&self, id: &str) -> Option<&TimerDeclaration> {
        self.timer_declarations.get(id).map(|d| d.as_ref())
    }

    pub fn start_bundle(&self) -> Option<&BundleMethod> {
        self.start_bundle.as_ref()
    }

    pub fn finish_bundle(&self) -> Option<&BundleMethod> {
        self.finish_bundle.as_ref()
    }

    pub fn setup(&self) -> Option<&LifecycleMethod> {
        self.setup.as_ref()
    }

    pub fn teardown(&self) -> Option<&LifecycleMethod> {
        self.teardown.as_ref()
    }

    pub fn get_initial_restriction(&self) -> Option<&GetInitialRestrictionMethod> {
        self.get_initial_restriction.as_ref()
    }

    pub fn split_restriction(&self) -> Option<&SplitRestrictionMethod> {
        self.split_restriction.as_ref()
    }

    pub fn new_tracker(&self) -> Option<&NewTrackerMethod> {
        self.new_tracker.as_ref()
    }

    pub fn get_restriction_coder(&self) -> Option<&GetRestrictionCoderMethod> {
        self.get_restriction_coder.as_ref()
    }

    pub fn on_timer_methods(&self) -> &BTreeMap<String, OnTimerMethod> {
        &self.on_timer_methods
    }

    pub fn on_timer_method(&self, timer_id: &str) -> Option<&OnTimerMethod> {
        self.on_timer_methods.get(timer_id)
    }

    pub fn is_splittable(&self) -> bool {
        self.process_element.is_splittable()
    }

    pub fn observes_window(&self) -> bool {
        self.process_element.observes_window()
    }

    /// Stable JSON description for runners and tooling.
    pub fn describe(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// Assembles a [`Signature`]. Crate-private: the analyzer is the only producer.
pub(crate) struct SignatureParts {
    pub fn_class: FnClass,
    pub boundedness: Boundedness,
    pub process_element: ProcessElementMethod,
    pub state_declarations: DeclarationRegistry<StateDeclaration>,
    pub timer_declarations: DeclarationRegistry<TimerDeclaration>,
    pub start_bundle: Option<BundleMethod>,
    pub finish_bundle: Option<BundleMethod>,
    pub setup: Option<LifecycleMethod>,
    pub teardown: Option<LifecycleMethod>,
    pub get_initial_restriction: Option<GetInitialRestrictionMethod>,
    pub split_restriction: Option<SplitRestrictionMethod>,
    pub new_tracker: Option<NewTrackerMethod>,
    pub get_restriction_coder: Option<GetRestrictionCoderMethod>,
    pub on_timer_methods: BTreeMap<String, OnTimerMethod>,
}

impl SignatureParts {
    pub(crate) fn build(self) -> Signature {
        Signature {
            fn_class: self.fn_class,
            boundedness: self.boundedness,
            process_element: self.process_element,
            state_declarations: self.state_declarations,
            timer_declarations: self.timer_declarations,
            start_bundle: self.start_bundle,
            finish_bundle: self.finish_bundle,
            setup: self.setup,
            teardown: self.teardown,
            get_initial_restriction: self.get_initial_restriction,
            split_restriction: self.split_restriction,
            new_tracker: self.new_tracker,
            get_restriction_coder: self.get_restriction_coder,
            on_timer_methods: self.on_timer_methods,
        }
    }
}
