//! Optional contextual parameters a user-function method may accept.

use serde::{Serialize, Serializer};
use std::{
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::declaration::{StateDeclaration, TimerDeclaration};

/// One optional contextual parameter of a method, in declaration position.
///
/// Stateless variants are all equal to themselves. `State` and `Timer` compare by the id of the
/// declaration they refer to, not by allocation.
#[derive(Debug, Clone)]
pub enum Parameter {
    Window,
    InputProvider,
    OutputReceiver,
    RestrictionTracker,
    State(Arc<StateDeclaration>),
    Timer(Arc<TimerDeclaration>),
}

impl Parameter {
    pub fn state(decl: Arc<StateDeclaration>) -> Self {
        Self::State(decl)
    }

    pub fn timer(decl: Arc<TimerDeclaration>) -> Self {
        Self::Timer(decl)
    }

    /// Short name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Window => "window",
            Self::InputProvider => "input_provider",
            Self::OutputReceiver => "output_receiver",
            Self::RestrictionTracker => "restriction_tracker",
            Self::State(_) => "state",
            Self::Timer(_) => "timer",
        }
    }

    pub fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }

    pub fn is_timer(&self) -> bool {
        matches!(self, Self::Timer(_))
    }

    /// Performs case analysis with one handler per variant.
    pub fn match_cases<R>(&self, cases: &mut impl Cases<R>) -> R {
        match self {
            Self::Window => cases.window(),
            Self::InputProvider => cases.input_provider(),
            Self::OutputReceiver => cases.output_receiver(),
            Self::RestrictionTracker => cases.restriction_tracker(),
            Self::State(decl) => cases.state(decl),
            Self::Timer(decl) => cases.timer(decl),
        }
    }

    /// Like [`Parameter::match_cases`], for visitors that only handle some variants.
    pub fn match_with_default<R>(&self, cases: &mut impl CasesWithDefault<R>) -> R {
        self.match_cases(&mut Defaulted(cases))
    }
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Window, Self::Window)
            | (Self::InputProvider, Self::InputProvider)
            | (Self::OutputReceiver, Self::OutputReceiver)
            | (Self::RestrictionTracker, Self::RestrictionTracker) => true,
            (Self::State(a), Self::State(b)) => a.id == b.id,
            (Self::Timer(a), Self::Timer(b)) => a.id == b.id,
            _ => false,
        }
    }
}

impl Eq for Parameter {}

impl Hash for Parameter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        match self {
            Self::State(decl) => decl.id.hash(state),
            Self::Timer(decl) => decl.id.hash(state),
            _ => {}
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ParameterWire<'a> {
    Window,
    InputProvider,
    OutputReceiver,
    RestrictionTracker,
    State { id: &'a str },
    Timer { id: &'a str },
}

impl Serialize for Parameter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            Self::Window => ParameterWire::Window,
            Self::InputProvider => ParameterWire::InputProvider,
            Self::OutputReceiver => ParameterWire::OutputReceiver,
            Self::RestrictionTracker => ParameterWire::RestrictionTracker,
            Self::State(decl) => ParameterWire::State { id: &decl.id },
            Self::Timer(decl) => ParameterWire::Timer { id: &decl.id },
        };
        wire.serialize(serializer)
    }
}

/// Destructures a [`Parameter`]; every variant must be handled.
pub trait Cases<R> {
    fn window(&mut self) -> R;
    fn input_provider(&mut self) -> R;
    fn output_receiver(&mut self) -> R;
    fn restriction_tracker(&mut self) -> R;
    fn state(&mut self, decl: &Arc<StateDeclaration>) -> R;
    fn timer(&mut self, decl: &Arc<TimerDeclaration>) -> R;
}

/// A [`Cases`] visitor with a fallback for the variants it does not override.
pub trait CasesWithDefault<R> {
    fn dispatch_default(&mut self, parameter: &Parameter) -> R;

    fn window(&mut self) -> R {
        self.dispatch_default(&Parameter::Window)
    }

    fn input_provider(&mut self) -> R {
        self.dispatch_default(&Parameter::InputProvider)
    }

    fn output_receiver(&mut self) -> R {
        self.dispatch_default(&Parameter::OutputReceiver)
    }

    fn restriction_tracker(&mut self) -> R {
        self.dispatch_default(&Parameter::RestrictionTracker)
    }

    fn state(&mut self, decl: &Arc<StateDeclaration>) -> R {
        self.dispatch_default(&Parameter::State(decl.clone()))
    }

    fn timer(&mut self, decl: &Arc<TimerDeclaration>) -> R {
        self.dispatch_default(&Parameter::Timer(decl.clone()))
    }
}

/// Adapts a [`CasesWithDefault`] visitor to [`Cases`].
pub struct Defaulted<'a, C: ?Sized>(pub &'a mut C);

impl<R, C: CasesWithDefault<R> + ?Sized> Cases<R> for Defaulted<'_, C> {
    fn window(&mut self) -> R {
        self.0.window()
    }

    fn input_provider(&mut self) -> R {
        self.0.input_provider()
    }

    fn output_receiver(&mut self) -> R {
        self.0.output_receiver()
    }

    fn restriction_tracker(&mut self) -> R {
        self.0.restriction_tracker()
    }

    fn state(&mut self, decl: &Arc<StateDeclaration>) -> R {
        self.0.state(decl)
    }

    fn timer(&mut self, decl: &Arc<TimerDeclaration>) -> R {
        self.0.timer(decl)
    }
}
