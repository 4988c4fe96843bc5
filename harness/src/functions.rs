//! Demo user functions exercised by the CLI and the integration tests.

use std::collections::BTreeMap;

use pardo_core::{
    definition::FnDefinition,
    dofn::{FinishBundleContext, ProcessContext},
    restriction::{OffsetRange, OffsetRangeTracker, ProcessContinuation},
    BoundedWindow, DoFn, OutputTag, SignatureRegistry,
};
use serde_json::{json, Value};

pub const LONG_WORDS_TAG: &str = "long_words";
/// Side input holding the minimum length of a long word.
pub const MIN_LONG_LEN_VIEW: &str = "min_long_len";
const DEFAULT_MIN_LONG_LEN: usize = 8;

/// Splits lines into lower-cased words on the main tag; long words also go to `long_words`.
pub struct SplitWords;

impl DoFn for SplitWords {
    type Input = String;
    type Output = String;

    fn define(def: &mut FnDefinition) {
        def.process_element("process_element").output_receiver();
    }

    fn process_element(
        &mut self,
        ctx: &mut ProcessContext<'_, String, String>,
    ) -> pardo_core::Result<ProcessContinuation> {
        let min_long_len = ctx
            .side_input(MIN_LONG_LEN_VIEW)
            .and_then(|v| v.as_u64())
            .map_or(DEFAULT_MIN_LONG_LEN, |v| v as usize);
        let long_words = OutputTag::new(LONG_WORDS_TAG);

        let receiver = ctx.output_receiver()?;
        let mut emitted = 0;
        for word in ctx.element().split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if word.is_empty() {
                continue;
            }
            if word.chars().count() >= min_long_len {
                ctx.output_tagged(&long_words, word.clone())?;
            }
            receiver.output(word);
            emitted += 1;
        }
        ctx.add_metric("words", emitted);
        Ok(ProcessContinuation::Stop)
    }
}

/// Counts words per window and emits one JSON record per (window, word) at bundle end.
#[derive(Default)]
pub struct CountPerWindow {
    counts: BTreeMap<(String, String), (BoundedWindow, u64)>,
}

impl DoFn for CountPerWindow {
    type Input = String;
    type Output = Value;

    fn define(def: &mut FnDefinition) {
        def.state::<u64>("counts", "count");
        def.process_element("process_element")
            .window()
            .state("count");
        def.start_bundle("start_bundle");
        def.finish_bundle("finish_bundle");
    }

    fn start_bundle(
        &mut self,
        _ctx: &mut pardo_core::dofn::StartBundleContext<'_>,
    ) -> pardo_core::Result<()> {
        self.counts.clear();
        Ok(())
    }

    fn process_element(
        &mut self,
        ctx: &mut ProcessContext<'_, String, Value>,
    ) -> pardo_core::Result<ProcessContinuation> {
        let cell = ctx.state("count")?;
        let window = ctx.window()?;
        let entry = self
            .counts
            .entry((window.to_string(), ctx.element().clone()))
            .or_insert_with(|| (cell.window().clone(), 0));
        entry.1 += 1;
        Ok(ProcessContinuation::Stop)
    }

    fn finish_bundle(&mut self, ctx: &mut FinishBundleContext<'_, Value>) -> pardo_core::Result<()> {
        for ((_, word), (window, count)) in std::mem::take(&mut self.counts) {
            let record = json!({ "window": window, "word": word, "count": count });
            ctx.output_in_window(record, window.max_timestamp(), window);
        }
        Ok(())
    }
}

/// Emits every position of `[0, n)` for an input `n`, checkpointing every `batch` positions.
pub struct ReadRange {
    pub batch: u64,
}

impl Default for ReadRange {
    fn default() -> Self {
        Self { batch: 16 }
    }
}

impl DoFn for ReadRange {
    type Input = u64;
    type Output = u64;

    fn define(def: &mut FnDefinition) {
        def.process_element("process_element")
            .restriction_tracker::<OffsetRangeTracker>()
            .returns_continuation();
        def.get_initial_restriction::<OffsetRange>("initial_restriction");
        def.split_restriction::<OffsetRange>("split_restriction");
        def.new_tracker::<OffsetRange, OffsetRangeTracker>("new_tracker");
    }

    fn initial_restriction(&self, element: &u64) -> pardo_core::Result<OffsetRange> {
        Ok(OffsetRange::new(0, *element))
    }

    fn split_restriction(
        &self,
        _element: &u64,
        restriction: OffsetRange,
    ) -> pardo_core::Result<Vec<OffsetRange>> {
        Ok(restriction.split(self.batch.saturating_mul(4)))
    }

    fn process_element(
        &mut self,
        ctx: &mut ProcessContext<'_, u64, u64>,
    ) -> pardo_core::Result<ProcessContinuation> {
        let batch = self.batch.max(1);
        let tracker = ctx.tracker()?;
        let mut claimed = Vec::new();
        let mut position = tracker.current_restriction().from;
        while tracker.try_claim(position) {
            claimed.push(position);
            if claimed.len() as u64 == batch {
                break;
            }
            position += 1;
        }
        let resume = claimed.len() as u64 == batch && !tracker.is_done();
        for position in claimed {
            ctx.output(position);
        }
        Ok(if resume {
            ProcessContinuation::resume()
        } else {
            ProcessContinuation::Stop
        })
    }
}

/// Signatures of every demo function, keyed by a short name.
pub fn describe_all() -> anyhow::Result<Value> {
    let registry = SignatureRegistry::global();
    Ok(json!({
        "split_words": registry.signature_of::<SplitWords>()?.describe()?,
        "count_per_window": registry.signature_of::<CountPerWindow>()?.describe()?,
        "read_range": registry.signature_of::<ReadRange>()?.describe()?,
    }))
}
