use anyhow::Context;
use std::{collections::BTreeMap, sync::Arc};
use uuid::Uuid;

use pardo_core::{DoFn, OutputTag, Signature, SignatureRegistry, WindowedValue};
use pardo_runner::{AdapterConfig, PartitionAdapter};

/// Outputs of one step, per tag, in partition order.
#[derive(Debug)]
pub struct TaggedOutputs<O> {
    by_tag: BTreeMap<OutputTag, Vec<WindowedValue<O>>>,
}

impl<O> Default for TaggedOutputs<O> {
    fn default() -> Self {
        Self {
            by_tag: BTreeMap::new(),
        }
    }
}

impl<O> TaggedOutputs<O> {
    fn push(&mut self, tag: OutputTag, value: WindowedValue<O>) {
        self.by_tag.entry(tag).or_default().push(value);
    }

    pub fn get(&self, tag: &OutputTag) -> &[WindowedValue<O>] {
        self.by_tag.get(tag).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn take(&mut self, tag: &OutputTag) -> Vec<WindowedValue<O>> {
        self.by_tag.remove(tag).unwrap_or_default()
    }

    pub fn tags(&self) -> impl Iterator<Item = &OutputTag> {
        self.by_tag.keys()
    }

    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.by_tag
            .iter()
            .map(|(tag, values)| (tag.id().to_string(), values.len()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_tag.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Local stand-in for a distributed engine: one blocking task per partition.
#[derive(Clone)]
pub struct LocalEngine {
    partitions: usize,
}

impl LocalEngine {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Round-robin assignment, preserving relative order within each partition.
    pub fn partition<T>(&self, inputs: Vec<T>) -> Vec<Vec<T>> {
        let mut partitions: Vec<Vec<T>> = (0..self.partitions).map(|_| Vec::new()).collect();
        for (i, value) in inputs.into_iter().enumerate() {
            partitions[i % self.partitions].push(value);
        }
        partitions
    }

    /// Runs one step. `make_fn` builds a fresh function instance per partition.
    pub async fn run<F, M>(
        &self,
        make_fn: M,
        config: AdapterConfig,
        inputs: Vec<WindowedValue<F::Input>>,
    ) -> anyhow::Result<TaggedOutputs<F::Output>>
    where
        F: DoFn,
        M: Fn() -> F + Send + Sync + 'static,
    {
        let signature: Arc<Signature> = SignatureRegistry::global()
            .signature_of::<F>()
            .context("analyze user function")?;
        let run_id = Uuid::new_v4();
        let make_fn = Arc::new(make_fn);
        tracing::info!(
            event = "pardo.engine.step_started",
            %run_id,
            step = %config.step_name,
            fn_class = %signature.fn_class(),
            partitions = self.partitions,
            elements = inputs.len(),
        );

        let mut handles = Vec::with_capacity(self.partitions);
        for (index, partition) in self.partition(inputs).into_iter().enumerate() {
            let signature = signature.clone();
            let config = config.clone();
            let make_fn = make_fn.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let mut adapter = PartitionAdapter::new(make_fn(), signature, config);
                let outputs = adapter
                    .process_partition(partition)
                    .collect::<Result<Vec<_>, _>>()
                    .with_context(|| format!("partition {index} failed"))?;
                anyhow::Ok(outputs)
            }));
        }

        let mut merged = TaggedOutputs::default();
        for (index, handle) in handles.into_iter().enumerate() {
            let outputs = handle
                .await
                .with_context(|| format!("join partition task {index}"))??;
            for (tag, value) in outputs {
                merged.push(tag, value);
            }
        }

        tracing::info!(
            event = "pardo.engine.step_finished",
            %run_id,
            step = %config.step_name,
            outputs = merged.len(),
        );
        Ok(merged)
    }
}
