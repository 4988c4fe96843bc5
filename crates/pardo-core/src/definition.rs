//! Explicit registration API describing the structure of a user function.
//!
//! A function lists its methods and its state/timer fields on an [`FnDefinition`] once, at
//! definition time. The definition is raw material: ids are plain strings and nothing is checked
//! until the [`crate::SignatureAnalyzer`] validates it.
//!
//! ```ignore
//! fn define(def: &mut FnDefinition) {
//!     def.state::<u64>("count_field", "count");
//!     def.process_element("process_element").window().state("count");
//!     def.setup("setup");
//! }
//! ```

use crate::{
    declaration::{FieldHandle, TypeDescriptor},
    method::MethodHandle,
    signature::{Boundedness, FnClass},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodKind {
    ProcessElement,
    StartBundle,
    FinishBundle,
    Setup,
    Teardown,
    OnTimer { timer_id: String },
    GetInitialRestriction,
    SplitRestriction,
    NewTracker,
    GetRestrictionCoder,
}

impl MethodKind {
    pub fn describe(&self) -> String {
        match self {
            Self::ProcessElement => "process_element".to_string(),
            Self::StartBundle => "start_bundle".to_string(),
            Self::FinishBundle => "finish_bundle".to_string(),
            Self::Setup => "setup".to_string(),
            Self::Teardown => "teardown".to_string(),
            Self::OnTimer { timer_id } => format!("on_timer('{timer_id}')"),
            Self::GetInitialRestriction => "get_initial_restriction".to_string(),
            Self::SplitRestriction => "split_restriction".to_string(),
            Self::NewTracker => "new_tracker".to_string(),
            Self::GetRestrictionCoder => "get_restriction_coder".to_string(),
        }
    }
}

/// A parameter as declared, before references are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterDefinition {
    Window,
    InputProvider,
    OutputReceiver,
    RestrictionTracker { tracker_type: TypeDescriptor },
    State { id: String },
    Timer { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnKind {
    #[default]
    Unit,
    Continuation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDefinition {
    pub kind: MethodKind,
    pub handle: MethodHandle,
    pub parameters: Vec<ParameterDefinition>,
    pub returns: ReturnKind,
    pub restriction_type: Option<TypeDescriptor>,
    pub tracker_type: Option<TypeDescriptor>,
    pub coder_type: Option<TypeDescriptor>,
}

impl MethodDefinition {
    fn new(kind: MethodKind, handle: &str) -> Self {
        Self {
            kind,
            handle: MethodHandle::new(handle),
            parameters: Vec::new(),
            returns: ReturnKind::Unit,
            restriction_type: None,
            tracker_type: None,
            coder_type: None,
        }
    }

    pub fn window(&mut self) -> &mut Self {
        self.parameters.push(ParameterDefinition::Window);
        self
    }

    pub fn input_provider(&mut self) -> &mut Self {
        self.parameters.push(ParameterDefinition::InputProvider);
        self
    }

    pub fn output_receiver(&mut self) -> &mut Self {
        self.parameters.push(ParameterDefinition::OutputReceiver);
        self
    }

    pub fn restriction_tracker<T: ?Sized>(&mut self) -> &mut Self {
        self.parameters.push(ParameterDefinition::RestrictionTracker {
            tracker_type: TypeDescriptor::of::<T>(),
        });
        self
    }

    pub fn state(&mut self, id: impl Into<String>) -> &mut Self {
        self.parameters
            .push(ParameterDefinition::State { id: id.into() });
        self
    }

    pub fn timer(&mut self, id: impl Into<String>) -> &mut Self {
        self.parameters
            .push(ParameterDefinition::Timer { id: id.into() });
        self
    }

    pub fn parameter(&mut self, parameter: ParameterDefinition) -> &mut Self {
        self.parameters.push(parameter);
        self
    }

    pub fn returns_continuation(&mut self) -> &mut Self {
        self.returns = ReturnKind::Continuation;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMarker {
    State { id: String, value_type: TypeDescriptor },
    Timer { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub field: FieldHandle,
    pub marker: FieldMarker,
}

/// Structure the analyzer validates, independent of how it was discovered.
pub trait DeclarationSource {
    fn fn_class(&self) -> &FnClass;
    fn methods(&self) -> &[MethodDefinition];
    fn fields(&self) -> &[FieldDefinition];
    fn declared_boundedness(&self) -> Option<Boundedness>;
}

/// Builder-style [`DeclarationSource`].
#[derive(Debug, Clone)]
pub struct FnDefinition {
    fn_class: FnClass,
    boundedness: Option<Boundedness>,
    methods: Vec<MethodDefinition>,
    fields: Vec<FieldDefinition>,
}

impl FnDefinition {
    pub fn new(fn_class: FnClass) -> Self {
        Self {
            fn_class,
            boundedness: None,
            methods: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn for_type<T: 'static>() -> Self {
        Self::new(FnClass::of::<T>())
    }

    fn push(&mut self, method: MethodDefinition) -> &mut MethodDefinition {
        self.methods.push(method);
        let last = self.methods.len() - 1;
        &mut self.methods[last]
    }

    pub fn process_element(&mut self, handle: &str) -> &mut MethodDefinition {
        self.push(MethodDefinition::new(MethodKind::ProcessElement, handle))
    }

    pub fn start_bundle(&mut self, handle: &str) -> &mut MethodDefinition {
        self.push(MethodDefinition::new(MethodKind::StartBundle, handle))
    }

    pub fn finish_bundle(&mut self, handle: &str) -> &mut MethodDefinition {
        self.push(MethodDefinition::new(MethodKind::FinishBundle, handle))
    }

    pub fn setup(&mut self, handle: &str) -> &mut MethodDefinition {
        self.push(MethodDefinition::new(MethodKind::Setup, handle))
    }

    pub fn teardown(&mut self, handle: &str) -> &mut MethodDefinition {
        self.push(MethodDefinition::new(MethodKind::Teardown, handle))
    }

    pub fn on_timer(&mut self, timer_id: &str, handle: &str) -> &mut MethodDefinition {
        self.push(MethodDefinition::new(
            MethodKind::OnTimer {
                timer_id: timer_id.to_string(),
            },
            handle,
        ))
    }

    pub fn get_initial_restriction<R: ?Sized>(&mut self, handle: &str) -> &mut MethodDefinition {
        let method = self.push(MethodDefinition::new(
            MethodKind::GetInitialRestriction,
            handle,
        ));
        method.restriction_type = Some(TypeDescriptor::of::<R>());
        method
    }

    pub fn split_restriction<R: ?Sized>(&mut self, handle: &str) -> &mut MethodDefinition {
        let method = self.push(MethodDefinition::new(MethodKind::SplitRestriction, handle));
        method.restriction_type = Some(TypeDescriptor::of::<R>());
        method
    }

    pub fn new_tracker<R: ?Sized, T: ?Sized>(&mut self, handle: &str) -> &mut MethodDefinition {
        let method = self.push(MethodDefinition::new(MethodKind::NewTracker, handle));
        method.restriction_type = Some(TypeDescriptor::of::<R>());
        method.tracker_type = Some(TypeDescriptor::of::<T>());
        method
    }

    pub fn get_restriction_coder<C: ?Sized>(&mut self, handle: &str) -> &mut MethodDefinition {
        let method = self.push(MethodDefinition::new(
            MethodKind::GetRestrictionCoder,
            handle,
        ));
        method.coder_type = Some(TypeDescriptor::of::<C>());
        method
    }

    /// Declares a state cell held in `field`.
    pub fn state<V: ?Sized>(&mut self, field: &str, id: &str) -> &mut Self {
        self.fields.push(FieldDefinition {
            field: FieldHandle::new(field),
            marker: FieldMarker::State {
                id: id.to_string(),
                value_type: TypeDescriptor::of::<V>(),
            },
        });
        self
    }

    /// Declares a timer held in `field`.
    pub fn timer(&mut self, field: &str, id: &str) -> &mut Self {
        self.fields.push(FieldDefinition {
            field: FieldHandle::new(field),
            marker: FieldMarker::Timer { id: id.to_string() },
        });
        self
    }

    pub fn bounded_per_element(&mut self) -> &mut Self {
        self.boundedness = Some(Boundedness::Bounded);
        self
    }

    pub fn unbounded_per_element(&mut self) -> &mut Self {
        self.boundedness = Some(Boundedness::Unbounded);
        self
    }
}

impl DeclarationSource for FnDefinition {
    fn fn_class(&self) -> &FnClass {
        &self.fn_class
    }

    fn methods(&self) -> &[MethodDefinition] {
        &self.methods
    }

    fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    fn declared_boundedness(&self) -> Option<Boundedness> {
        self.boundedness
    }
}
