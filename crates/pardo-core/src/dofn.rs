//! The user-function contract and the contexts its hooks are invoked with.
//!
//! A [`DoFn`] registers its structure through [`DoFn::define`]; the resulting [`Signature`]
//! decides which hooks a runner calls and which contextual parameters each invocation may use.
//! Accessors for a parameter the signature does not declare fail instead of silently working,
//! so the declared calling convention is the one actually enforced.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

use crate::{
    context::{MetricsSink, SideInputReader, StepContext},
    declaration::{StateDeclaration, TimerDeclaration, TypeDescriptor},
    definition::FnDefinition,
    output::{OutputProtocolError, OutputRouter, OutputSink, OutputTag},
    parameter::{Cases, Parameter},
    restriction::{OffsetRange, OffsetRangeTracker, ProcessContinuation, RestrictionTracker},
    signature::Signature,
    window::{BoundedWindow, WindowedValue, WindowingStrategy},
    Error, Result,
};

/// A pluggable element-wise computation.
///
/// Hooks other than `process_element` default to no-ops and are only invoked when the
/// definition declares them.
pub trait DoFn: Send + 'static {
    type Input: Clone + Send + 'static;
    type Output: Send + 'static;

    /// Registers the methods and state/timer fields of this function.
    fn define(def: &mut FnDefinition);

    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn start_bundle(&mut self, _ctx: &mut StartBundleContext<'_>) -> Result<()> {
        Ok(())
    }

    fn process_element(
        &mut self,
        ctx: &mut ProcessContext<'_, Self::Input, Self::Output>,
    ) -> Result<ProcessContinuation>;

    fn finish_bundle(&mut self, _ctx: &mut FinishBundleContext<'_, Self::Output>) -> Result<()> {
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        Ok(())
    }

    fn initial_restriction(&self, _element: &Self::Input) -> Result<OffsetRange> {
        Err(Error::msg("initial_restriction is not implemented"))
    }

    fn split_restriction(
        &self,
        _element: &Self::Input,
        restriction: OffsetRange,
    ) -> Result<Vec<OffsetRange>> {
        Ok(vec![restriction])
    }

    fn new_tracker(&self, restriction: OffsetRange) -> Result<Box<dyn RestrictionTracker>> {
        Ok(Box::new(OffsetRangeTracker::new(restriction)))
    }
}

/// Collaborators shared by every invocation of one step.
pub struct InvocationServices<'a, O> {
    pub signature: &'a Signature,
    pub router: &'a OutputRouter,
    pub sink: &'a dyn OutputSink<O>,
    pub side_inputs: &'a dyn SideInputReader,
    pub metrics: &'a dyn MetricsSink,
    pub step: &'a dyn StepContext,
    pub windowing: &'a WindowingStrategy,
}

impl<O> Clone for InvocationServices<'_, O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<O> Copy for InvocationServices<'_, O> {}

pub struct StartBundleContext<'a> {
    step: &'a dyn StepContext,
    metrics: &'a dyn MetricsSink,
}

impl<'a> StartBundleContext<'a> {
    pub fn new<O>(services: InvocationServices<'a, O>) -> Self {
        Self {
            step: services.step,
            metrics: services.metrics,
        }
    }

    pub fn step_name(&self) -> &str {
        self.step.step_name()
    }

    pub fn add_metric(&self, name: &str, value: i64) {
        self.metrics.add(self.step.step_name(), name, value);
    }
}

pub struct FinishBundleContext<'a, O> {
    services: InvocationServices<'a, O>,
}

impl<'a, O> FinishBundleContext<'a, O> {
    pub fn new(services: InvocationServices<'a, O>) -> Self {
        Self { services }
    }

    pub fn step_name(&self) -> &str {
        self.services.step.step_name()
    }

    pub fn add_metric(&self, name: &str, value: i64) {
        self.services
            .metrics
            .add(self.services.step.step_name(), name, value);
    }

    /// Emits on the main tag in an explicit window.
    pub fn output_in_window(&self, value: O, timestamp: DateTime<Utc>, window: BoundedWindow) {
        self.services.router.route_main(
            self.services.sink,
            WindowedValue::new(value, timestamp, vec![window]),
        );
    }

    /// Emits on the main tag in the windows the windowing strategy assigns to `timestamp`.
    pub fn output_at(&self, value: O, timestamp: DateTime<Utc>) {
        let windows = self.services.windowing.assign_windows(timestamp);
        self.services
            .router
            .route_main(self.services.sink, WindowedValue::new(value, timestamp, windows));
    }

    pub fn output_tagged_at(
        &self,
        tag: &OutputTag,
        value: O,
        timestamp: DateTime<Utc>,
    ) -> std::result::Result<(), OutputProtocolError> {
        let windows = self.services.windowing.assign_windows(timestamp);
        self.services.router.route(
            self.services.sink,
            tag,
            WindowedValue::new(value, timestamp, windows),
        )
    }
}

/// Address of a state cell: its declaration scoped to one window. Backends resolve it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateHandle {
    declaration: Arc<StateDeclaration>,
    window: BoundedWindow,
}

impl StateHandle {
    pub fn id(&self) -> &str {
        &self.declaration.id
    }

    pub fn declaration(&self) -> &StateDeclaration {
        &self.declaration
    }

    pub fn value_type(&self) -> &TypeDescriptor {
        &self.declaration.value_type
    }

    pub fn window(&self) -> &BoundedWindow {
        &self.window
    }
}

pub struct TimerHandle<'a> {
    declaration: Arc<TimerDeclaration>,
    window: BoundedWindow,
    step: &'a dyn StepContext,
}

impl TimerHandle<'_> {
    pub fn id(&self) -> &str {
        &self.declaration.id
    }

    pub fn window(&self) -> &BoundedWindow {
        &self.window
    }

    pub fn set(&self, at: DateTime<Utc>) -> Result<()> {
        self.step.set_timer(&self.declaration, &self.window, at)
    }
}

/// Read access to the current element, granted by an input-provider parameter.
pub struct InputProvider<'a, I> {
    element: &'a WindowedValue<I>,
}

impl<I> InputProvider<'_, I> {
    pub fn get(&self) -> &I {
        &self.element.value
    }
}

/// Main-output emitter, granted by an output-receiver parameter.
pub struct OutputReceiver<'a, I, O> {
    element: &'a WindowedValue<I>,
    services: InvocationServices<'a, O>,
}

impl<I, O> OutputReceiver<'_, I, O> {
    pub fn output(&self, value: O) {
        self.services
            .router
            .route_main(self.services.sink, self.element.with_value(value));
    }
}

/// Positional argument built from one declared parameter.
#[derive(Debug)]
pub enum Argument<'a> {
    Window(&'a BoundedWindow),
    InputProvider,
    OutputReceiver,
    RestrictionTracker,
    State(StateHandle),
    Timer(Arc<TimerDeclaration>),
}

pub struct ProcessContext<'a, I, O> {
    element: &'a WindowedValue<I>,
    services: InvocationServices<'a, O>,
    tracker: Option<&'a mut dyn RestrictionTracker>,
}

impl<'a, I, O> ProcessContext<'a, I, O> {
    pub fn new(
        services: InvocationServices<'a, O>,
        element: &'a WindowedValue<I>,
        tracker: Option<&'a mut dyn RestrictionTracker>,
    ) -> Self {
        Self {
            element,
            services,
            tracker,
        }
    }

    pub fn element(&self) -> &I {
        &self.element.value
    }

    pub fn windowed_element(&self) -> &WindowedValue<I> {
        self.element
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.element.timestamp
    }

    pub fn windows(&self) -> &[BoundedWindow] {
        &self.element.windows
    }

    pub fn step_name(&self) -> &str {
        self.services.step.step_name()
    }

    pub fn metrics(&self) -> &dyn MetricsSink {
        self.services.metrics
    }

    /// Declared optional parameters, in position order.
    pub fn parameters(&self) -> &[Parameter] {
        &self.services.signature.process_element().parameters
    }

    fn declares(&self, parameter: &Parameter) -> bool {
        self.parameters().contains(parameter)
    }

    fn undeclared(&self, what: &str) -> Error {
        Error::msg(format!(
            "{} process_element '{}' does not declare a {what} parameter",
            self.services.signature.fn_class(),
            self.services.signature.process_element().handle
        ))
    }

    fn current_window(&self) -> Result<&'a BoundedWindow> {
        match self.element.windows.as_slice() {
            [window] => Ok(window),
            [] => Err(Error::msg("element is not assigned to any window")),
            _ => Err(Error::msg(
                "element spans multiple windows; window-observing invocations are per window",
            )),
        }
    }

    pub fn window(&self) -> Result<&'a BoundedWindow> {
        if !self.declares(&Parameter::Window) {
            return Err(self.undeclared("window"));
        }
        self.current_window()
    }

    pub fn input_provider(&self) -> Result<InputProvider<'a, I>> {
        if !self.declares(&Parameter::InputProvider) {
            return Err(self.undeclared("input provider"));
        }
        Ok(InputProvider {
            element: self.element,
        })
    }

    pub fn output_receiver(&self) -> Result<OutputReceiver<'a, I, O>> {
        if !self.declares(&Parameter::OutputReceiver) {
            return Err(self.undeclared("output receiver"));
        }
        Ok(OutputReceiver {
            element: self.element,
            services: self.services,
        })
    }

    pub fn tracker(&mut self) -> Result<&mut (dyn RestrictionTracker + 'a)> {
        if !self.declares(&Parameter::RestrictionTracker) {
            return Err(self.undeclared("restriction tracker"));
        }
        match self.tracker.as_deref_mut() {
            Some(tracker) => Ok(tracker),
            None => Err(Error::msg("no restriction tracker supplied for this invocation")),
        }
    }

    fn declared_state(&self, id: &str) -> Option<&Arc<StateDeclaration>> {
        self.parameters().iter().find_map(|p| match p {
            Parameter::State(decl) if decl.id == id => Some(decl),
            _ => None,
        })
    }

    fn declared_timer(&self, id: &str) -> Option<&Arc<TimerDeclaration>> {
        self.parameters().iter().find_map(|p| match p {
            Parameter::Timer(decl) if decl.id == id => Some(decl),
            _ => None,
        })
    }

    pub fn state(&self, id: &str) -> Result<StateHandle> {
        let Some(declaration) = self.declared_state(id) else {
            return Err(self.undeclared(&format!("state '{id}'")));
        };
        Ok(StateHandle {
            declaration: declaration.clone(),
            window: self.current_window()?.clone(),
        })
    }

    pub fn timer(&self, id: &str) -> Result<TimerHandle<'a>> {
        let Some(declaration) = self.declared_timer(id) else {
            return Err(self.undeclared(&format!("timer '{id}'")));
        };
        Ok(TimerHandle {
            declaration: declaration.clone(),
            window: self.current_window()?.clone(),
            step: self.services.step,
        })
    }

    /// Builds one argument per declared parameter, in declaration order.
    pub fn arguments(&self) -> Result<Vec<Argument<'a>>> {
        let mut builder = ArgumentBuilder {
            element: self.element,
        };
        self.parameters()
            .iter()
            .map(|p| p.match_cases(&mut builder))
            .collect()
    }

    /// Emits on the main tag with the element's timestamp and windows.
    pub fn output(&self, value: O) {
        self.services
            .router
            .route_main(self.services.sink, self.element.with_value(value));
    }

    pub fn output_tagged(
        &self,
        tag: &OutputTag,
        value: O,
    ) -> std::result::Result<(), OutputProtocolError> {
        self.services
            .router
            .route(self.services.sink, tag, self.element.with_value(value))
    }

    /// Side input value for the element's window. Steps with side inputs are invoked once per window.
    pub fn side_input(&self, view: &str) -> Option<Value> {
        let window = self.element.windows.first()?;
        self.services.side_inputs.get(view, window)
    }

    pub fn add_metric(&self, name: &str, value: i64) {
        self.services
            .metrics
            .add(self.services.step.step_name(), name, value);
    }
}

struct ArgumentBuilder<'a, I> {
    element: &'a WindowedValue<I>,
}

impl<'a, I> ArgumentBuilder<'a, I> {
    fn single_window(&self) -> Result<&'a BoundedWindow> {
        match self.element.windows.as_slice() {
            [window] => Ok(window),
            _ => Err(Error::msg(
                "window-scoped argument requires an element in exactly one window",
            )),
        }
    }
}

impl<'a, I> Cases<Result<Argument<'a>>> for ArgumentBuilder<'a, I> {
    fn window(&mut self) -> Result<Argument<'a>> {
        self.single_window().map(Argument::Window)
    }

    fn input_provider(&mut self) -> Result<Argument<'a>> {
        Ok(Argument::InputProvider)
    }

    fn output_receiver(&mut self) -> Result<Argument<'a>> {
        Ok(Argument::OutputReceiver)
    }

    fn restriction_tracker(&mut self) -> Result<Argument<'a>> {
        Ok(Argument::RestrictionTracker)
    }

    fn state(&mut self, decl: &Arc<StateDeclaration>) -> Result<Argument<'a>> {
        Ok(Argument::State(StateHandle {
            declaration: decl.clone(),
            window: self.single_window()?.clone(),
        }))
    }

    fn timer(&mut self, decl: &Arc<TimerDeclaration>) -> Result<Argument<'a>> {
        Ok(Argument::Timer(decl.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analyzer::SignatureAnalyzer,
        context::{NoOpStepContext, NoSideInputs, NoopMetrics},
    };
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct Counting;

    #[derive(Default)]
    struct Recording(Mutex<Vec<(OutputTag, String)>>);

    impl OutputSink<String> for Recording {
        fn output(&self, tag: &OutputTag, value: WindowedValue<String>) {
            self.0.lock().unwrap().push((tag.clone(), value.value));
        }
    }

    fn signature(define: impl FnOnce(&mut FnDefinition)) -> Signature {
        let mut def = FnDefinition::for_type::<Counting>();
        define(&mut def);
        SignatureAnalyzer::analyze(&def).unwrap()
    }

    fn window() -> BoundedWindow {
        BoundedWindow::interval(
            Utc.timestamp_opt(0, 0).unwrap(),
            Utc.timestamp_opt(60, 0).unwrap(),
        )
    }

    #[test]
    fn accessors_follow_declared_parameters() {
        let signature = signature(|def| {
            def.state::<u64>("count_cell", "count");
            def.process_element("process_element")
                .window()
                .state("count")
                .output_receiver();
        });
        let router = OutputRouter::new(OutputTag::new("main"), [OutputTag::new("side")]);
        let sink = Recording::default();
        let step = NoOpStepContext::new("count");
        let windowing = WindowingStrategy::global();
        let services = InvocationServices {
            signature: &signature,
            router: &router,
            sink: &sink,
            side_inputs: &NoSideInputs,
            metrics: &NoopMetrics,
            step: &step,
            windowing: &windowing,
        };
        let element = WindowedValue::new(
            "a".to_string(),
            Utc.timestamp_opt(5, 0).unwrap(),
            vec![window()],
        );
        let mut ctx = ProcessContext::new(services, &element, None);

        assert_eq!(ctx.window().unwrap(), &window());
        assert_eq!(ctx.state("count").unwrap().window(), &window());
        assert!(ctx.state("other").is_err());
        assert!(ctx.timer("flush").is_err());
        assert!(ctx.input_provider().is_err());
        assert!(ctx.tracker().is_err());

        let arguments = ctx.arguments().unwrap();
        assert!(matches!(arguments[0], Argument::Window(_)));
        assert!(matches!(&arguments[1], Argument::State(handle) if handle.id() == "count"));
        assert!(matches!(arguments[2], Argument::OutputReceiver));

        ctx.output_receiver().unwrap().output("x".to_string());
        ctx.output_tagged(&OutputTag::new("side"), "y".to_string())
            .unwrap();
        assert!(ctx
            .output_tagged(&OutputTag::new("nope"), "z".to_string())
            .is_err());
        assert_eq!(
            *sink.0.lock().unwrap(),
            vec![
                (OutputTag::new("main"), "x".to_string()),
                (OutputTag::new("side"), "y".to_string()),
            ]
        );
    }

    #[test]
    fn timers_without_backend_fail_to_set() {
        let signature = signature(|def| {
            def.timer("flush_timer", "flush");
            def.process_element("process_element").timer("flush");
            def.on_timer("flush", "on_flush");
        });
        let router = OutputRouter::new(OutputTag::new("main"), []);
        let sink = Recording::default();
        let step = NoOpStepContext::new("flush");
        let windowing = WindowingStrategy::global();
        let services = InvocationServices {
            signature: &signature,
            router: &router,
            sink: &sink,
            side_inputs: &NoSideInputs,
            metrics: &NoopMetrics,
            step: &step,
            windowing: &windowing,
        };
        let element = WindowedValue::in_global_window("a".to_string());
        let ctx = ProcessContext::new(services, &element, None);

        let timer = ctx.timer("flush").unwrap();
        let err = timer.set(Utc.timestamp_opt(10, 0).unwrap()).unwrap_err();
        assert!(err.to_string().contains("no timer backend"));
    }
}
