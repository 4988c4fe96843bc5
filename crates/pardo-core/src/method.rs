//! Descriptors of the lifecycle, processing and splittable-processing methods of a user function.

use serde::Serialize;
use std::fmt;

use crate::{declaration::TypeDescriptor, parameter::Parameter};

/// Opaque handle naming the method a descriptor delegates to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MethodHandle(String);

impl MethodHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MethodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The single element-processing method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessElementMethod {
    pub handle: MethodHandle,
    /// Optional parameters in declaration order; invocation arguments are built positionally.
    pub parameters: Vec<Parameter>,
    /// Concrete tracker type when `parameters` contains a restriction tracker.
    pub tracker_type: Option<TypeDescriptor>,
    /// Whether the method returns a continuation instead of unit.
    pub returns_continuation: bool,
}

impl ProcessElementMethod {
    /// Whether the method observes, directly or indirectly, the window an element resides in.
    ///
    /// State is scoped to a single window, so a state parameter observes the window even without
    /// an explicit window parameter. Window-observing methods are invoked once per window.
    pub fn observes_window(&self) -> bool {
        self.parameters
            .iter()
            .any(|p| matches!(p, Parameter::Window | Parameter::State(_)))
    }

    pub fn is_splittable(&self) -> bool {
        self.parameters.contains(&Parameter::RestrictionTracker)
    }

    pub fn position_of(&self, parameter: &Parameter) -> Option<usize> {
        self.parameters.iter().position(|p| p == parameter)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnTimerMethod {
    pub id: String,
    pub handle: MethodHandle,
    pub parameters: Vec<Parameter>,
}

/// A start-bundle or finish-bundle hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleMethod {
    pub handle: MethodHandle,
}

/// A setup or teardown hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleMethod {
    pub handle: MethodHandle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GetInitialRestrictionMethod {
    pub handle: MethodHandle,
    pub restriction_type: TypeDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitRestrictionMethod {
    pub handle: MethodHandle,
    /// Type of the restriction taken and produced.
    pub restriction_type: TypeDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTrackerMethod {
    pub handle: MethodHandle,
    pub restriction_type: TypeDescriptor,
    pub tracker_type: TypeDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GetRestrictionCoderMethod {
    pub handle: MethodHandle,
    pub coder_type: TypeDescriptor,
}
