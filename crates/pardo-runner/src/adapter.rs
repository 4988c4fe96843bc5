//! Runs one user function over one partition and exposes its tagged output lazily.
//!
//! Each [`PartitionAdapter::process_partition`] call is one bundle. Lifecycle hooks run as the
//! returned [`PartitionOutput`] is pulled: setup and start-bundle before the first element, one
//! process-element step per input element, finish-bundle after the last, then teardown. Output is
//! flushed after every step, so consumers see a step's values before the next element is read.
//!
//! On failure, output buffered by the failed step is discarded rather than yielded, teardown is
//! attempted, and the error is yielded once before the iterator ends. Dropping the iterator early
//! still runs teardown.

use std::{iter::FusedIterator, sync::Arc};

use pardo_core::{
    context::{MetricsSink, NoOpStepContext, NoSideInputs, NoopMetrics, SideInputReader, StepContext},
    output::OutputRouter,
    window::WindowingStrategy,
    DoFn, OutputTag, Signature, SignatureRegistry, SignatureValidationError, WindowedValue,
};

use crate::{
    error::InvocationError,
    output_manager::{Drain, OutputManager},
    runner::{DoFnRunner, RunnerEnvironment, SimpleDoFnRunner},
};

pub const DEFAULT_MAIN_TAG: &str = "main";
pub const DEFAULT_STEP_NAME: &str = "pardo";

/// Per-step settings shared by every partition of the step.
#[derive(Clone)]
pub struct AdapterConfig {
    pub step_name: String,
    pub main_tag: OutputTag,
    pub additional_tags: Vec<OutputTag>,
    pub windowing: WindowingStrategy,
    pub side_inputs: Arc<dyn SideInputReader>,
    pub metrics: Arc<dyn MetricsSink>,
    /// Defaults to a context named after `step_name` with no timer backend.
    pub step_context: Option<Arc<dyn StepContext>>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            step_name: DEFAULT_STEP_NAME.to_string(),
            main_tag: OutputTag::new(DEFAULT_MAIN_TAG),
            additional_tags: Vec::new(),
            windowing: WindowingStrategy::global(),
            side_inputs: Arc::new(NoSideInputs),
            metrics: Arc::new(NoopMetrics),
            step_context: None,
        }
    }
}

impl AdapterConfig {
    pub fn new(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            ..Self::default()
        }
    }

    pub fn with_main_tag(mut self, tag: impl Into<OutputTag>) -> Self {
        self.main_tag = tag.into();
        self
    }

    pub fn with_additional_tag(mut self, tag: impl Into<OutputTag>) -> Self {
        self.additional_tags.push(tag.into());
        self
    }

    pub fn with_windowing(mut self, windowing: WindowingStrategy) -> Self {
        self.windowing = windowing;
        self
    }

    pub fn with_side_inputs(mut self, side_inputs: Arc<dyn SideInputReader>) -> Self {
        self.side_inputs = side_inputs;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_step_context(mut self, step_context: Arc<dyn StepContext>) -> Self {
        self.step_context = Some(step_context);
        self
    }
}

pub struct PartitionAdapter<F: DoFn> {
    runner: SimpleDoFnRunner<F>,
    outputs: Arc<OutputManager<F::Output>>,
}

impl<F: DoFn> PartitionAdapter<F> {
    pub fn new(function: F, signature: Arc<Signature>, config: AdapterConfig) -> Self {
        let outputs = Arc::new(OutputManager::new());
        let step: Arc<dyn StepContext> = match config.step_context {
            Some(step) => step,
            None => Arc::new(NoOpStepContext::new(config.step_name.clone())),
        };
        let env = RunnerEnvironment {
            signature,
            sink: outputs.clone(),
            router: OutputRouter::new(config.main_tag, config.additional_tags),
            side_inputs: config.side_inputs,
            step,
            metrics: config.metrics,
            windowing: config.windowing,
        };
        Self {
            runner: SimpleDoFnRunner::new(function, env),
            outputs,
        }
    }

    /// Looks the signature up in the process-wide registry.
    pub fn for_function(function: F, config: AdapterConfig) -> Result<Self, SignatureValidationError> {
        let signature = SignatureRegistry::global().signature_of::<F>()?;
        Ok(Self::new(function, signature, config))
    }

    pub fn signature(&self) -> &Signature {
        self.runner.signature()
    }

    pub fn output_manager(&self) -> &OutputManager<F::Output> {
        &self.outputs
    }

    pub fn function(&self) -> &F {
        self.runner.function()
    }

    /// Starts one bundle over `inputs`. Nothing runs until the result is iterated.
    pub fn process_partition<I>(&mut self, inputs: I) -> PartitionOutput<'_, F, I::IntoIter>
    where
        I: IntoIterator<Item = WindowedValue<F::Input>>,
    {
        self.outputs.clear();
        PartitionOutput {
            adapter: self,
            inputs: inputs.into_iter(),
            stage: Stage::Setup,
            next_index: 0,
            pending: None,
            started: false,
            torn_down: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Setup,
    StartBundle,
    Elements,
    FinishBundle,
    Teardown,
    Done,
}

/// Lazy sequence of `(tag, value)` pairs produced by one partition.
pub struct PartitionOutput<'a, F: DoFn, I> {
    adapter: &'a mut PartitionAdapter<F>,
    inputs: I,
    stage: Stage,
    next_index: usize,
    pending: Option<Drain<F::Output>>,
    started: bool,
    torn_down: bool,
}

impl<F: DoFn, I> PartitionOutput<'_, F, I> {
    fn flush(&mut self) {
        self.pending = Some(self.adapter.outputs.drain());
    }

    fn fail(&mut self, err: InvocationError) -> InvocationError {
        self.adapter.outputs.clear();
        self.pending = None;
        self.stage = Stage::Done;
        tracing::warn!(
            event = "pardo.adapter.partition_failed",
            step = %err.step,
            bundle_id = %err.bundle_id,
            phase = %err.phase,
            element_index = ?err.element_index,
            error = %err,
        );
        if !self.torn_down {
            self.torn_down = true;
            if let Err(teardown_err) = self.adapter.runner.teardown() {
                tracing::warn!(
                    event = "pardo.adapter.teardown_failed",
                    step = %teardown_err.step,
                    error = %teardown_err,
                );
            }
        }
        err
    }
}

impl<F, I> Iterator for PartitionOutput<'_, F, I>
where
    F: DoFn,
    I: Iterator<Item = WindowedValue<F::Input>>,
{
    type Item = Result<(OutputTag, WindowedValue<F::Output>), InvocationError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pair) = self.pending.as_mut().and_then(Iterator::next) {
                return Some(Ok(pair));
            }
            self.pending = None;

            match self.stage {
                Stage::Setup => {
                    self.started = true;
                    tracing::debug!(
                        event = "pardo.adapter.partition_started",
                        step = %self.adapter.runner.step_name(),
                        fn_class = %self.adapter.signature().fn_class(),
                    );
                    if let Err(err) = self.adapter.runner.setup() {
                        return Some(Err(self.fail(err)));
                    }
                    self.stage = Stage::StartBundle;
                }
                Stage::StartBundle => {
                    if let Err(err) = self.adapter.runner.start_bundle() {
                        return Some(Err(self.fail(err)));
                    }
                    self.flush();
                    self.stage = Stage::Elements;
                }
                Stage::Elements => match self.inputs.next() {
                    Some(element) => {
                        let index = self.next_index;
                        self.next_index += 1;
                        if let Err(err) = self.adapter.runner.process_element(index, element) {
                            return Some(Err(self.fail(err)));
                        }
                        self.flush();
                    }
                    None => self.stage = Stage::FinishBundle,
                },
                Stage::FinishBundle => {
                    if let Err(err) = self.adapter.runner.finish_bundle() {
                        return Some(Err(self.fail(err)));
                    }
                    self.flush();
                    self.stage = Stage::Teardown;
                }
                Stage::Teardown => {
                    self.torn_down = true;
                    if let Err(err) = self.adapter.runner.teardown() {
                        return Some(Err(self.fail(err)));
                    }
                    self.stage = Stage::Done;
                    tracing::debug!(
                        event = "pardo.adapter.partition_finished",
                        step = %self.adapter.runner.step_name(),
                        bundle_id = %self.adapter.runner.bundle_id(),
                        elements = self.next_index,
                    );
                }
                Stage::Done => return None,
            }
        }
    }
}

impl<F, I> FusedIterator for PartitionOutput<'_, F, I>
where
    F: DoFn,
    I: Iterator<Item = WindowedValue<F::Input>>,
{
}

impl<F: DoFn, I> Drop for PartitionOutput<'_, F, I> {
    fn drop(&mut self) {
        if !self.started || self.torn_down {
            return;
        }
        self.torn_down = true;
        self.adapter.outputs.clear();
        tracing::debug!(
            event = "pardo.adapter.partition_abandoned",
            step = %self.adapter.runner.step_name(),
            elements = self.next_index,
        );
        if let Err(err) = self.adapter.runner.teardown() {
            tracing::warn!(
                event = "pardo.adapter.teardown_failed",
                step = %err.step,
                error = %err,
            );
        }
    }
}
