//! One-time structural validation of a user function, producing its [`Signature`].
//!
//! Analysis is a pure function of the declaration source: the same definition always yields an
//! equal signature or the same error, which is what makes signatures safe to cache per class.

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
    declaration::{DeclarationRegistry, StateDeclaration, TimerDeclaration, TypeDescriptor},
    definition::{
        DeclarationSource, FieldMarker, FnDefinition, MethodDefinition, MethodKind,
        ParameterDefinition, ReturnKind,
    },
    dofn::DoFn,
    method::{
        BundleMethod, GetInitialRestrictionMethod, GetRestrictionCoderMethod, LifecycleMethod,
        MethodHandle, NewTrackerMethod, OnTimerMethod, ProcessElementMethod,
        SplitRestrictionMethod,
    },
    parameter::Parameter,
    signature::{Boundedness, Signature, SignatureParts},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureErrorKind {
    MissingProcessElement,
    DuplicateMethod,
    DuplicateDeclaration,
    UnresolvedReference,
    InconsistentSplittable,
    IllegalParameter,
    TypeMismatch,
}

/// Structural defect found while analyzing a user function. Never raised during processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureValidationError {
    pub kind: SignatureErrorKind,
    fn_class: String,
    message: String,
}

impl SignatureValidationError {
    fn new(kind: SignatureErrorKind, fn_class: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            fn_class: fn_class.to_string(),
            message: message.into(),
        }
    }

    pub fn fn_class(&self) -> &str {
        &self.fn_class
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SignatureValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid user function {}: {}", self.fn_class, self.message)
    }
}

impl std::error::Error for SignatureValidationError {}

type AnalysisResult<T> = Result<T, SignatureValidationError>;

pub struct SignatureAnalyzer;

impl SignatureAnalyzer {
    /// Analyzes the definition a [`DoFn`] type registers for itself.
    pub fn analyze_fn<F: DoFn>() -> AnalysisResult<Signature> {
        let mut definition = FnDefinition::for_type::<F>();
        F::define(&mut definition);
        Self::analyze(&definition)
    }

    pub fn analyze(source: &dyn DeclarationSource) -> AnalysisResult<Signature> {
        let class = source.fn_class().name();
        let err = |kind, message: String| SignatureValidationError::new(kind, class, message);

        let (state_declarations, timer_declarations) = collect_declarations(source)?;
        let resolver = Resolver {
            class,
            states: &state_declarations,
            timers: &timer_declarations,
        };

        let mut process_element: Option<ProcessElementMethod> = None;
        let mut start_bundle: Option<BundleMethod> = None;
        let mut finish_bundle: Option<BundleMethod> = None;
        let mut setup: Option<LifecycleMethod> = None;
        let mut teardown: Option<LifecycleMethod> = None;
        let mut get_initial_restriction: Option<GetInitialRestrictionMethod> = None;
        let mut split_restriction: Option<SplitRestrictionMethod> = None;
        let mut new_tracker: Option<NewTrackerMethod> = None;
        let mut get_restriction_coder: Option<GetRestrictionCoderMethod> = None;
        let mut on_timer_methods = BTreeMap::<String, OnTimerMethod>::new();

        for method in source.methods() {
            match &method.kind {
                MethodKind::ProcessElement => {
                    if let Some(existing) = &process_element {
                        return Err(err(
                            SignatureErrorKind::DuplicateMethod,
                            format!(
                                "found multiple process_element methods: '{}' and '{}'",
                                existing.handle, method.handle
                            ),
                        ));
                    }
                    let (parameters, tracker_type) = resolver.resolve(method)?;
                    process_element = Some(ProcessElementMethod {
                        handle: method.handle.clone(),
                        parameters,
                        tracker_type,
                        returns_continuation: method.returns == ReturnKind::Continuation,
                    });
                }
                MethodKind::StartBundle => {
                    let handle = resolver.hook(method, start_bundle.as_ref().map(|m| &m.handle))?;
                    start_bundle = Some(BundleMethod { handle });
                }
                MethodKind::FinishBundle => {
                    let handle = resolver.hook(method, finish_bundle.as_ref().map(|m| &m.handle))?;
                    finish_bundle = Some(BundleMethod { handle });
                }
                MethodKind::Setup => {
                    let handle = resolver.hook(method, setup.as_ref().map(|m| &m.handle))?;
                    setup = Some(LifecycleMethod { handle });
                }
                MethodKind::Teardown => {
                    let handle = resolver.hook(method, teardown.as_ref().map(|m| &m.handle))?;
                    teardown = Some(LifecycleMethod { handle });
                }
                MethodKind::GetInitialRestriction => {
                    let handle = resolver.hook(
                        method,
                        get_initial_restriction.as_ref().map(|m| &m.handle),
                    )?;
                    get_initial_restriction = Some(GetInitialRestrictionMethod {
                        handle,
                        restriction_type: resolver.required_type(
                            method,
                            method.restriction_type.as_ref(),
                            "restriction",
                        )?,
                    });
                }
                MethodKind::SplitRestriction => {
                    let handle =
                        resolver.hook(method, split_restriction.as_ref().map(|m| &m.handle))?;
                    split_restriction = Some(SplitRestrictionMethod {
                        handle,
                        restriction_type: resolver.required_type(
                            method,
                            method.restriction_type.as_ref(),
                            "restriction",
                        )?,
                    });
                }
                MethodKind::NewTracker => {
                    let handle = resolver.hook(method, new_tracker.as_ref().map(|m| &m.handle))?;
                    new_tracker = Some(NewTrackerMethod {
                        handle,
                        restriction_type: resolver.required_type(
                            method,
                            method.restriction_type.as_ref(),
                            "restriction",
                        )?,
                        tracker_type: resolver.required_type(
                            method,
                            method.tracker_type.as_ref(),
                            "tracker",
                        )?,
                    });
                }
                MethodKind::GetRestrictionCoder => {
                    let handle =
                        resolver.hook(method, get_restriction_coder.as_ref().map(|m| &m.handle))?;
                    get_restriction_coder = Some(GetRestrictionCoderMethod {
                        handle,
                        coder_type: resolver.required_type(
                            method,
                            method.coder_type.as_ref(),
                            "coder",
                        )?,
                    });
                }
                MethodKind::OnTimer { timer_id } => {
                    if !timer_declarations.contains(timer_id) {
                        return Err(err(
                            SignatureErrorKind::UnresolvedReference,
                            format!(
                                "on_timer method '{}' refers to undeclared timer '{}'",
                                method.handle, timer_id
                            ),
                        ));
                    }
                    if let Some(existing) = on_timer_methods.get(timer_id) {
                        return Err(err(
                            SignatureErrorKind::DuplicateMethod,
                            format!(
                                "found multiple on_timer methods for timer '{}': '{}' and '{}'",
                                timer_id, existing.handle, method.handle
                            ),
                        ));
                    }
                    if method.returns != ReturnKind::Unit {
                        return Err(err(
                            SignatureErrorKind::IllegalParameter,
                            format!("on_timer method '{}' must not return a value", method.handle),
                        ));
                    }
                    let (parameters, _) = resolver.resolve(method)?;
                    if parameters.contains(&Parameter::RestrictionTracker) {
                        return Err(err(
                            SignatureErrorKind::IllegalParameter,
                            format!(
                                "on_timer method '{}' must not take a restriction tracker",
                                method.handle
                            ),
                        ));
                    }
                    on_timer_methods.insert(
                        timer_id.clone(),
                        OnTimerMethod {
                            id: timer_id.clone(),
                            handle: method.handle.clone(),
                            parameters,
                        },
                    );
                }
            }
        }

        let Some(process_element) = process_element else {
            return Err(err(
                SignatureErrorKind::MissingProcessElement,
                "no process_element method".to_string(),
            ));
        };

        let splittable = process_element.is_splittable();
        if !splittable {
            let stray = [
                get_initial_restriction.as_ref().map(|m| ("get_initial_restriction", &m.handle)),
                split_restriction.as_ref().map(|m| ("split_restriction", &m.handle)),
                new_tracker.as_ref().map(|m| ("new_tracker", &m.handle)),
                get_restriction_coder.as_ref().map(|m| ("get_restriction_coder", &m.handle)),
            ];
            if let Some((kind, handle)) = stray.into_iter().flatten().next() {
                return Err(err(
                    SignatureErrorKind::InconsistentSplittable,
                    format!(
                        "{kind} method '{handle}' requires process_element '{}' to take a restriction tracker",
                        process_element.handle
                    ),
                ));
            }
            if process_element.returns_continuation {
                return Err(err(
                    SignatureErrorKind::InconsistentSplittable,
                    format!(
                        "process_element '{}' returns a continuation but takes no restriction tracker",
                        process_element.handle
                    ),
                ));
            }
        } else {
            let Some(initial) = &get_initial_restriction else {
                return Err(err(
                    SignatureErrorKind::InconsistentSplittable,
                    format!(
                        "splittable process_element '{}' requires a get_initial_restriction method",
                        process_element.handle
                    ),
                ));
            };
            let Some(tracker) = &new_tracker else {
                return Err(err(
                    SignatureErrorKind::InconsistentSplittable,
                    format!(
                        "splittable process_element '{}' requires a new_tracker method",
                        process_element.handle
                    ),
                ));
            };

            check_same_type(
                class,
                &initial.restriction_type,
                &tracker.restriction_type,
                "restriction taken by new_tracker",
            )?;
            if let Some(split) = &split_restriction {
                check_same_type(
                    class,
                    &initial.restriction_type,
                    &split.restriction_type,
                    "restriction taken by split_restriction",
                )?;
            }
            if let Some(expected) = &process_element.tracker_type {
                check_same_type(
                    class,
                    expected,
                    &tracker.tracker_type,
                    "tracker returned by new_tracker",
                )?;
            }
        }

        let boundedness = match source.declared_boundedness() {
            Some(Boundedness::Unbounded) if !splittable => {
                return Err(err(
                    SignatureErrorKind::InconsistentSplittable,
                    "only splittable functions may be unbounded per element".to_string(),
                ));
            }
            Some(declared) => declared,
            None if process_element.returns_continuation => Boundedness::Unbounded,
            None => Boundedness::Bounded,
        };

        let signature = SignatureParts {
            fn_class: source.fn_class().clone(),
            boundedness,
            process_element,
            state_declarations,
            timer_declarations,
            start_bundle,
            finish_bundle,
            setup,
            teardown,
            get_initial_restriction,
            split_restriction,
            new_tracker,
            get_restriction_coder,
            on_timer_methods,
        }
        .build();

        tracing::debug!(
            event = "pardo.analyzer.analyzed",
            fn_class = %class,
            parameters = signature.process_element().parameters.len(),
            states = signature.state_declarations().len(),
            timers = signature.timer_declarations().len(),
            splittable = signature.is_splittable(),
            "signature analyzed"
        );

        Ok(signature)
    }
}

fn collect_declarations(
    source: &dyn DeclarationSource,
) -> AnalysisResult<(
    DeclarationRegistry<StateDeclaration>,
    DeclarationRegistry<TimerDeclaration>,
)> {
    let class = source.fn_class().name();
    let mut states = DeclarationRegistry::default();
    let mut timers = DeclarationRegistry::default();

    for field in source.fields() {
        match &field.marker {
            FieldMarker::State { id, value_type } => {
                let decl = StateDeclaration {
                    id: id.clone(),
                    field: field.field.clone(),
                    value_type: value_type.clone(),
                };
                if let Err(rejected) = states.insert(decl) {
                    let existing = states.get(id).map(|d| d.field.name()).unwrap_or_default();
                    return Err(SignatureValidationError::new(
                        SignatureErrorKind::DuplicateDeclaration,
                        class,
                        format!(
                            "duplicate state id '{}' on fields '{}' and '{}'",
                            id,
                            existing,
                            rejected.field.name()
                        ),
                    ));
                }
            }
            FieldMarker::Timer { id } => {
                let decl = TimerDeclaration {
                    id: id.clone(),
                    field: field.field.clone(),
                };
                if let Err(rejected) = timers.insert(decl) {
                    let existing = timers.get(id).map(|d| d.field.name()).unwrap_or_default();
                    return Err(SignatureValidationError::new(
                        SignatureErrorKind::DuplicateDeclaration,
                        class,
                        format!(
                            "duplicate timer id '{}' on fields '{}' and '{}'",
                            id,
                            existing,
                            rejected.field.name()
                        ),
                    ));
                }
            }
        }
    }

    Ok((states, timers))
}

fn check_same_type(
    class: &str,
    expected: &TypeDescriptor,
    actual: &TypeDescriptor,
    what: &str,
) -> AnalysisResult<()> {
    if expected != actual {
        return Err(SignatureValidationError::new(
            SignatureErrorKind::TypeMismatch,
            class,
            format!("{what} has type {actual}, expected {expected}"),
        ));
    }
    Ok(())
}

struct Resolver<'a> {
    class: &'a str,
    states: &'a DeclarationRegistry<StateDeclaration>,
    timers: &'a DeclarationRegistry<TimerDeclaration>,
}

impl Resolver<'_> {
    fn error(&self, kind: SignatureErrorKind, message: String) -> SignatureValidationError {
        SignatureValidationError::new(kind, self.class, message)
    }

    /// Validates a parameterless hook that may appear at most once.
    fn hook(
        &self,
        method: &MethodDefinition,
        existing: Option<&MethodHandle>,
    ) -> AnalysisResult<MethodHandle> {
        let kind = method.kind.describe();
        if let Some(existing) = existing {
            return Err(self.error(
                SignatureErrorKind::DuplicateMethod,
                format!(
                    "found multiple {kind} methods: '{existing}' and '{}'",
                    method.handle
                ),
            ));
        }
        if !method.parameters.is_empty() {
            return Err(self.error(
                SignatureErrorKind::IllegalParameter,
                format!(
                    "{kind} method '{}' must not take context parameters",
                    method.handle
                ),
            ));
        }
        if method.returns != ReturnKind::Unit {
            return Err(self.error(
                SignatureErrorKind::IllegalParameter,
                format!("{kind} method '{}' must not return a continuation", method.handle),
            ));
        }
        Ok(method.handle.clone())
    }

    fn required_type(
        &self,
        method: &MethodDefinition,
        ty: Option<&TypeDescriptor>,
        what: &str,
    ) -> AnalysisResult<TypeDescriptor> {
        ty.cloned().ok_or_else(|| {
            self.error(
                SignatureErrorKind::TypeMismatch,
                format!(
                    "{} method '{}' does not declare its {what} type",
                    method.kind.describe(),
                    method.handle
                ),
            )
        })
    }

    /// Resolves state/timer references and rejects repeated parameters.
    fn resolve(
        &self,
        method: &MethodDefinition,
    ) -> AnalysisResult<(Vec<Parameter>, Option<TypeDescriptor>)> {
        let mut parameters: Vec<Parameter> = Vec::with_capacity(method.parameters.len());
        let mut tracker_type = None;

        for raw in &method.parameters {
            let parameter = match raw {
                ParameterDefinition::Window => Parameter::Window,
                ParameterDefinition::InputProvider => Parameter::InputProvider,
                ParameterDefinition::OutputReceiver => Parameter::OutputReceiver,
                ParameterDefinition::RestrictionTracker { tracker_type: ty } => {
                    tracker_type = Some(ty.clone());
                    Parameter::RestrictionTracker
                }
                ParameterDefinition::State { id } => {
                    let decl = self.states.get(id).ok_or_else(|| {
                        self.error(
                            SignatureErrorKind::UnresolvedReference,
                            format!(
                                "{} method '{}' refers to undeclared state '{id}'",
                                method.kind.describe(),
                                method.handle
                            ),
                        )
                    })?;
                    Parameter::State(Arc::clone(decl))
                }
                ParameterDefinition::Timer { id } => {
                    let decl = self.timers.get(id).ok_or_else(|| {
                        self.error(
                            SignatureErrorKind::UnresolvedReference,
                            format!(
                                "{} method '{}' refers to undeclared timer '{id}'",
                                method.kind.describe(),
                                method.handle
                            ),
                        )
                    })?;
                    Parameter::Timer(Arc::clone(decl))
                }
            };

            if parameters.contains(&parameter) {
                let what = match &parameter {
                    Parameter::State(decl) => format!("state '{}'", decl.id),
                    Parameter::Timer(decl) => format!("timer '{}'", decl.id),
                    other => other.kind().to_string(),
                };
                return Err(self.error(
                    SignatureErrorKind::IllegalParameter,
                    format!(
                        "{} method '{}' takes {what} more than once",
                        method.kind.describe(),
                        method.handle
                    ),
                ));
            }
            parameters.push(parameter);
        }

        Ok((parameters, tracker_type))
    }
}
