//! Signature-aware sequencing of a user function's hooks.

use std::{collections::VecDeque, sync::Arc};

use pardo_core::{
    context::{MetricsSink, NoOpStepContext, NoSideInputs, NoopMetrics, SideInputReader, StepContext},
    dofn::{FinishBundleContext, InvocationServices, ProcessContext, StartBundleContext},
    output::{OutputRouter, OutputSink},
    restriction::{OffsetRange, ProcessContinuation, RestrictionTracker},
    window::WindowingStrategy,
    DoFn, Error, OutputTag, Signature, WindowedValue,
};
use uuid::Uuid;

use crate::error::{InvocationError, InvocationPhase};

/// Drives one user function through setup, bundles and teardown.
pub trait DoFnRunner<I> {
    fn setup(&mut self) -> Result<(), InvocationError>;

    /// Opens a new bundle.
    fn start_bundle(&mut self) -> Result<(), InvocationError>;

    /// Processes one partition element; `index` is its position, used for error context.
    fn process_element(
        &mut self,
        index: usize,
        element: WindowedValue<I>,
    ) -> Result<(), InvocationError>;

    fn finish_bundle(&mut self) -> Result<(), InvocationError>;

    fn teardown(&mut self) -> Result<(), InvocationError>;
}

/// Which hooks to call and how, decided once from the signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationPlan {
    pub call_setup: bool,
    pub call_start_bundle: bool,
    pub call_finish_bundle: bool,
    pub call_teardown: bool,
    pub explode_windows: bool,
    pub splittable: bool,
    pub returns_continuation: bool,
}

impl InvocationPlan {
    pub fn from_signature(signature: &Signature) -> Self {
        let process = signature.process_element();
        Self {
            call_setup: signature.setup().is_some(),
            call_start_bundle: signature.start_bundle().is_some(),
            call_finish_bundle: signature.finish_bundle().is_some(),
            call_teardown: signature.teardown().is_some(),
            explode_windows: process.observes_window(),
            splittable: process.is_splittable(),
            returns_continuation: process.returns_continuation,
        }
    }
}

/// Collaborators a runner hands to user code.
pub struct RunnerEnvironment<O> {
    pub signature: Arc<Signature>,
    pub sink: Arc<dyn OutputSink<O>>,
    pub router: OutputRouter,
    pub side_inputs: Arc<dyn SideInputReader>,
    pub step: Arc<dyn StepContext>,
    pub metrics: Arc<dyn MetricsSink>,
    pub windowing: WindowingStrategy,
}

impl<O> RunnerEnvironment<O> {
    /// Main tag `main`, no side inputs, no metrics, global windows.
    pub fn new(signature: Arc<Signature>, sink: Arc<dyn OutputSink<O>>, step_name: &str) -> Self {
        Self {
            signature,
            sink,
            router: OutputRouter::new(OutputTag::new("main"), Vec::new()),
            side_inputs: Arc::new(NoSideInputs),
            step: Arc::new(NoOpStepContext::new(step_name)),
            metrics: Arc::new(NoopMetrics),
            windowing: WindowingStrategy::global(),
        }
    }

    fn services(&self) -> InvocationServices<'_, O> {
        InvocationServices {
            signature: &self.signature,
            router: &self.router,
            sink: &*self.sink,
            side_inputs: &*self.side_inputs,
            metrics: &*self.metrics,
            step: &*self.step,
            windowing: &self.windowing,
        }
    }
}

pub struct SimpleDoFnRunner<F: DoFn> {
    function: F,
    env: RunnerEnvironment<F::Output>,
    plan: InvocationPlan,
    bundle_id: Uuid,
}

impl<F: DoFn> SimpleDoFnRunner<F> {
    /// Side inputs are window-scoped, so a step that has any also runs once per window.
    pub fn new(function: F, env: RunnerEnvironment<F::Output>) -> Self {
        let mut plan = InvocationPlan::from_signature(&env.signature);
        plan.explode_windows |= !env.side_inputs.is_empty();
        Self {
            function,
            env,
            plan,
            bundle_id: Uuid::nil(),
        }
    }

    pub fn plan(&self) -> &InvocationPlan {
        &self.plan
    }

    pub fn signature(&self) -> &Signature {
        &self.env.signature
    }

    pub fn step_name(&self) -> &str {
        self.env.step.step_name()
    }

    /// Id of the current (or last) bundle; nil before the first bundle starts.
    pub fn bundle_id(&self) -> Uuid {
        self.bundle_id
    }

    pub fn function(&self) -> &F {
        &self.function
    }

    fn error(&self, phase: InvocationPhase, source: Error) -> InvocationError {
        InvocationError::new(phase, self.env.step.step_name(), self.bundle_id, source)
    }

    fn element_error(&self, index: usize, source: Error) -> InvocationError {
        self.error(InvocationPhase::ProcessElement, source)
            .at_element(index)
    }

    fn invoke(&mut self, index: usize, element: &WindowedValue<F::Input>) -> Result<(), InvocationError> {
        let continuation = {
            let mut ctx = ProcessContext::new(self.env.services(), element, None);
            self.function.process_element(&mut ctx)
        }
        .map_err(|e| self.element_error(index, e))?;

        if continuation.should_resume() {
            return Err(self.element_error(
                index,
                Error::msg("process_element returned a continuation but is not splittable"),
            ));
        }
        Ok(())
    }

    /// Runs the element over its restriction, requeueing residuals until every piece stops.
    fn invoke_splittable(
        &mut self,
        index: usize,
        element: &WindowedValue<F::Input>,
    ) -> Result<(), InvocationError> {
        let initial = self
            .function
            .initial_restriction(&element.value)
            .map_err(|e| self.element_error(index, e.context("initial_restriction failed")))?;
        let pieces = self
            .function
            .split_restriction(&element.value, initial)
            .map_err(|e| self.element_error(index, e.context("split_restriction failed")))?;

        let mut queue: VecDeque<OffsetRange> = pieces.into();
        while let Some(restriction) = queue.pop_front() {
            if restriction.is_empty() {
                continue;
            }
            let mut tracker = self
                .function
                .new_tracker(restriction)
                .map_err(|e| self.element_error(index, e.context("new_tracker failed")))?;

            let continuation = {
                let claims: &mut dyn RestrictionTracker = tracker.as_mut();
                let mut ctx = ProcessContext::new(self.env.services(), element, Some(claims));
                self.function.process_element(&mut ctx)
            }
            .map_err(|e| self.element_error(index, e))?;

            match continuation {
                ProcessContinuation::Stop => {
                    if !tracker.is_done() {
                        return Err(self.element_error(
                            index,
                            Error::msg(format!(
                                "process_element stopped before restriction {} was fully claimed",
                                tracker.current_restriction()
                            )),
                        ));
                    }
                }
                ProcessContinuation::Resume { delay } => {
                    if !self.plan.returns_continuation {
                        return Err(self.element_error(
                            index,
                            Error::msg("process_element returned a continuation it does not declare"),
                        ));
                    }
                    let residual = tracker.checkpoint();
                    if residual.is_empty() {
                        continue;
                    }
                    if tracker.last_claimed().is_none() {
                        return Err(self.element_error(
                            index,
                            Error::msg(format!(
                                "process_element asked to resume {residual} without claiming any position"
                            )),
                        ));
                    }
                    tracing::debug!(
                        event = "pardo.runner.resumed",
                        step = %self.step_name(),
                        element_index = index,
                        residual = %residual,
                        delay_ms = delay.as_millis() as u64,
                    );
                    queue.push_back(residual);
                }
            }
        }
        Ok(())
    }
}

impl<F: DoFn> DoFnRunner<F::Input> for SimpleDoFnRunner<F> {
    fn setup(&mut self) -> Result<(), InvocationError> {
        if !self.plan.call_setup {
            return Ok(());
        }
        self.function
            .setup()
            .map_err(|e| self.error(InvocationPhase::Setup, e))
    }

    fn start_bundle(&mut self) -> Result<(), InvocationError> {
        self.bundle_id = Uuid::new_v4();
        tracing::debug!(
            event = "pardo.runner.bundle_started",
            step = %self.step_name(),
            bundle_id = %self.bundle_id,
        );
        if !self.plan.call_start_bundle {
            return Ok(());
        }
        let mut ctx = StartBundleContext::new(self.env.services());
        self.function
            .start_bundle(&mut ctx)
            .map_err(|e| self.error(InvocationPhase::StartBundle, e))
    }

    fn process_element(
        &mut self,
        index: usize,
        element: WindowedValue<F::Input>,
    ) -> Result<(), InvocationError> {
        if element.windows.is_empty() {
            return Err(self.element_error(
                index,
                Error::msg("element is not assigned to any window"),
            ));
        }
        let invocations = if self.plan.explode_windows && element.windows.len() > 1 {
            element.explode_windows().collect()
        } else {
            vec![element]
        };

        for value in &invocations {
            if self.plan.splittable {
                self.invoke_splittable(index, value)?;
            } else {
                self.invoke(index, value)?;
            }
        }
        Ok(())
    }

    fn finish_bundle(&mut self) -> Result<(), InvocationError> {
        if self.plan.call_finish_bundle {
            let mut ctx = FinishBundleContext::new(self.env.services());
            self.function
                .finish_bundle(&mut ctx)
                .map_err(|e| self.error(InvocationPhase::FinishBundle, e))?;
        }
        tracing::debug!(
            event = "pardo.runner.bundle_finished",
            step = %self.step_name(),
            bundle_id = %self.bundle_id,
        );
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), InvocationError> {
        if !self.plan.call_teardown {
            return Ok(());
        }
        self.function
            .teardown()
            .map_err(|e| self.error(InvocationPhase::Teardown, e))
    }
}
