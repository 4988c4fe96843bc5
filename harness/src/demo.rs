use anyhow::Context;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};

use pardo_core::{context::SideInputSnapshot, OutputTag, WindowedValue};

use crate::{
    config::HarnessConfig,
    engine::LocalEngine,
    functions::{CountPerWindow, ReadRange, SplitWords, LONG_WORDS_TAG, MIN_LONG_LEN_VIEW},
};

const WORDS: &[&str] = &[
    "partition", "bundle", "window", "element", "restriction", "tracker", "state", "timer",
    "output", "tag", "signature", "runner",
];

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Deterministic input lines, one per second starting at the epoch.
pub fn generate_lines(cfg: &HarnessConfig) -> Vec<WindowedValue<String>> {
    let windowing = cfg.windowing();
    (0..cfg.elements)
        .map(|i| {
            let line = (0..(i % 5) + 1)
                .map(|j| WORDS[(i * 7 + j * 3) % WORDS.len()])
                .collect::<Vec<_>>()
                .join(" ");
            let timestamp = epoch() + Duration::seconds(i as i64);
            WindowedValue::new(line, timestamp, windowing.assign_windows(timestamp))
        })
        .collect()
}

/// Splits generated lines into words, then counts words per window.
pub async fn run(cfg: &HarnessConfig) -> anyhow::Result<Value> {
    let engine = LocalEngine::new(cfg.partitions);
    let side_inputs = SideInputSnapshot::new()
        .with_global(MIN_LONG_LEN_VIEW, json!(9))
        .into_shared();

    let split_config = cfg
        .adapter_config(&cfg.step_name)
        .with_additional_tag(LONG_WORDS_TAG)
        .with_side_inputs(side_inputs);
    let mut words = engine
        .run(|| SplitWords, split_config, generate_lines(cfg))
        .await
        .context("run split_words")?;
    let split_counts = words.counts();

    let counts = engine
        .run(
            CountPerWindow::default,
            cfg.adapter_config("count_per_window"),
            words.take(&cfg.main_tag()),
        )
        .await
        .context("run count_per_window")?;

    let records = counts.get(&cfg.main_tag());
    let windows = records
        .iter()
        .filter_map(|record| record.value.get("window"))
        .map(Value::to_string)
        .collect::<std::collections::BTreeSet<_>>()
        .len();

    Ok(json!({
        "partitions": engine.partitions(),
        "elements": cfg.elements,
        "split_words": split_counts,
        "count_per_window": {
            "records": records.len(),
            "windows": windows,
        },
    }))
}

/// Reads `[0, n)` through the splittable demo function.
pub async fn read_range(cfg: &HarnessConfig, n: u64, batch: u64) -> anyhow::Result<Value> {
    let engine = LocalEngine::new(cfg.partitions);
    let inputs = vec![WindowedValue::in_global_window(n)];
    let outputs = engine
        .run(move || ReadRange { batch }, cfg.adapter_config("read_range"), inputs)
        .await
        .context("run read_range")?;

    let positions = outputs.get(&cfg.main_tag());
    let sum: u64 = positions.iter().map(|v| v.value).sum();
    Ok(json!({
        "positions": positions.len(),
        "sum": sum,
        "tags": outputs.tags().map(OutputTag::id).collect::<Vec<_>>(),
    }))
}
