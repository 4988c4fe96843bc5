use std::sync::{Arc, Mutex};

use anyhow::{ensure, Context};
use chrono::{TimeZone, Utc};
use pardo_core::{
    context::SideInputSnapshot,
    definition::FnDefinition,
    dofn::{FinishBundleContext, ProcessContext, StartBundleContext},
    restriction::ProcessContinuation,
    BoundedWindow, DoFn, OutputTag, WindowedValue,
};
use pardo_runner::{
    AdapterConfig, InvocationError, InvocationPhase, OutputManager, PartitionAdapter,
};
use serde_json::Value;

type Journal = Arc<Mutex<Vec<String>>>;

fn record(journal: &Journal, entry: impl Into<String>) {
    journal.lock().unwrap().push(entry.into());
}

/// Upper-cases each element onto the main tag and logs every hook it runs.
///
/// `fail_on` names elements, or the `setup`/`teardown` hooks, that return an error.
struct Upper {
    journal: Journal,
    fail_on: &'static [&'static str],
}

impl Upper {
    fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail_on: &[],
        }
    }

    fn check(&self, point: &str) -> pardo_core::Result<()> {
        if self.fail_on.contains(&point) {
            return Err(pardo_core::Error::msg(format!("cannot run {point}")));
        }
        Ok(())
    }
}

impl DoFn for Upper {
    type Input = String;
    type Output = String;

    fn define(def: &mut FnDefinition) {
        def.process_element("process_element");
        def.setup("setup");
        def.start_bundle("start_bundle");
        def.finish_bundle("finish_bundle");
        def.teardown("teardown");
    }

    fn setup(&mut self) -> pardo_core::Result<()> {
        record(&self.journal, "setup");
        self.check("setup")
    }

    fn start_bundle(&mut self, _ctx: &mut StartBundleContext<'_>) -> pardo_core::Result<()> {
        record(&self.journal, "start_bundle");
        Ok(())
    }

    fn process_element(
        &mut self,
        ctx: &mut ProcessContext<'_, String, String>,
    ) -> pardo_core::Result<ProcessContinuation> {
        let element = ctx.element().clone();
        record(&self.journal, format!("process:{element}"));
        ctx.output(format!("{}-partial", element.to_uppercase()));
        self.check(&element)?;
        ctx.output(element.to_uppercase());
        Ok(ProcessContinuation::Stop)
    }

    fn finish_bundle(&mut self, _ctx: &mut FinishBundleContext<'_, String>) -> pardo_core::Result<()> {
        record(&self.journal, "finish_bundle");
        Ok(())
    }

    fn teardown(&mut self) -> pardo_core::Result<()> {
        record(&self.journal, "teardown");
        self.check("teardown")
    }
}

/// Emits each element once, with no hooks declared.
struct Identity;

impl DoFn for Identity {
    type Input = String;
    type Output = String;

    fn define(def: &mut FnDefinition) {
        def.process_element("process_element");
    }

    fn setup(&mut self) -> pardo_core::Result<()> {
        Err(pardo_core::Error::msg("setup is not declared and must not run"))
    }

    fn process_element(
        &mut self,
        ctx: &mut ProcessContext<'_, String, String>,
    ) -> pardo_core::Result<ProcessContinuation> {
        ctx.output(ctx.element().clone());
        Ok(ProcessContinuation::Stop)
    }
}

/// Emits on two tags per element.
struct Fork;

impl DoFn for Fork {
    type Input = String;
    type Output = String;

    fn define(def: &mut FnDefinition) {
        def.process_element("process_element");
    }

    fn process_element(
        &mut self,
        ctx: &mut ProcessContext<'_, String, String>,
    ) -> pardo_core::Result<ProcessContinuation> {
        ctx.output_tagged(&OutputTag::new("t0"), format!("t0:{}", ctx.element()))?;
        ctx.output_tagged(&OutputTag::new("t1"), format!("t1:{}", ctx.element()))?;
        Ok(ProcessContinuation::Stop)
    }
}

/// Emits the end of the window it was invoked for.
struct WindowEnd;

impl DoFn for WindowEnd {
    type Input = String;
    type Output = String;

    fn define(def: &mut FnDefinition) {
        def.process_element("process_element")
            .window()
            .output_receiver();
    }

    fn process_element(
        &mut self,
        ctx: &mut ProcessContext<'_, String, String>,
    ) -> pardo_core::Result<ProcessContinuation> {
        let window = ctx.window()?.to_string();
        ctx.output_receiver()?.output(window);
        Ok(ProcessContinuation::Stop)
    }
}

/// Emits the `v` side input it sees, or `none`.
struct SideEcho;

impl DoFn for SideEcho {
    type Input = String;
    type Output = String;

    fn define(def: &mut FnDefinition) {
        def.process_element("process_element");
    }

    fn process_element(
        &mut self,
        ctx: &mut ProcessContext<'_, String, String>,
    ) -> pardo_core::Result<ProcessContinuation> {
        let seen = ctx
            .side_input("v")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "none".to_string());
        ctx.output(seen);
        Ok(ProcessContinuation::Stop)
    }
}

fn global(values: &[&str]) -> Vec<WindowedValue<String>> {
    values
        .iter()
        .map(|v| WindowedValue::in_global_window(v.to_string()))
        .collect()
}

fn values(pairs: &[(OutputTag, WindowedValue<String>)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(tag, v)| (tag.id().to_string(), v.value.clone()))
        .collect()
}

fn main_tag() -> OutputTag {
    OutputTag::new("main")
}

/// Splits a drained partition into its values and its errors.
fn settle(
    results: Vec<Result<(OutputTag, WindowedValue<String>), InvocationError>>,
) -> (Vec<String>, Vec<InvocationError>) {
    let mut yielded = Vec::new();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok((_, v)) => yielded.push(v.value),
            Err(err) => errors.push(err),
        }
    }
    (yielded, errors)
}

#[test]
fn yields_main_output_in_input_order() -> anyhow::Result<()> {
    let mut adapter = PartitionAdapter::for_function(Identity, AdapterConfig::default())?;
    let out: Vec<_> = adapter
        .process_partition(global(&["e1", "e2", "e3"]))
        .collect::<Result<_, _>>()?;

    ensure!(out.len() == 3, "expected 3 pairs, got {}", out.len());
    ensure!(out.iter().all(|(tag, _)| *tag == main_tag()));
    ensure!(
        values(&out)
            .into_iter()
            .map(|(_, v)| v)
            .collect::<Vec<_>>()
            == vec!["e1", "e2", "e3"]
    );
    Ok(())
}

#[test]
fn keeps_every_tag_emitted_for_one_element() -> anyhow::Result<()> {
    let config = AdapterConfig::new("fork")
        .with_main_tag("t0")
        .with_additional_tag("t1");
    let mut adapter = PartitionAdapter::for_function(Fork, config)?;
    let out: Vec<_> = adapter
        .process_partition(global(&["e1"]))
        .collect::<Result<_, _>>()?;

    ensure!(
        values(&out)
            == vec![
                ("t0".to_string(), "t0:e1".to_string()),
                ("t1".to_string(), "t1:e1".to_string()),
            ],
        "unexpected output {:?}",
        values(&out)
    );
    Ok(())
}

#[test]
fn undeclared_tag_fails_the_partition() -> anyhow::Result<()> {
    // t1 is not registered with the router.
    let config = AdapterConfig::new("fork").with_main_tag("t0");
    let mut adapter = PartitionAdapter::for_function(Fork, config)?;
    let results: Vec<_> = adapter.process_partition(global(&["e1"])).collect();

    ensure!(results.len() == 1, "t0 output of the failed element must be discarded");
    let err = results
        .into_iter()
        .next()
        .context("missing result")?
        .err()
        .context("expected an error")?;
    ensure!(err.phase == InvocationPhase::ProcessElement);
    ensure!(err.to_string().contains("'t1'"), "got {err}");
    Ok(())
}

#[test]
fn hooks_run_once_around_the_partition() -> anyhow::Result<()> {
    let journal = Journal::default();
    let mut adapter =
        PartitionAdapter::for_function(Upper::new(journal.clone()), AdapterConfig::default())?;
    let out: Vec<_> = adapter
        .process_partition(global(&["a", "b"]))
        .collect::<Result<_, _>>()?;

    ensure!(values(&out).len() == 4);
    let entries = journal.lock().unwrap().clone();
    ensure!(
        entries
            == vec![
                "setup",
                "start_bundle",
                "process:a",
                "process:b",
                "finish_bundle",
                "teardown"
            ],
        "unexpected journal {entries:?}"
    );
    Ok(())
}

#[test]
fn failure_discards_partial_output_and_tears_down() -> anyhow::Result<()> {
    let journal = Journal::default();
    let function = Upper {
        journal: journal.clone(),
        fail_on: &["b"],
    };
    let mut adapter = PartitionAdapter::for_function(function, AdapterConfig::new("upper"))?;
    let mut output = adapter.process_partition(global(&["a", "b", "c"]));

    let mut yielded = Vec::new();
    let mut failure = None;
    for item in output.by_ref() {
        match item {
            Ok(pair) => yielded.push(pair),
            Err(err) => failure = Some(err),
        }
    }
    ensure!(output.next().is_none(), "iterator must stay exhausted after the error");
    drop(output);

    ensure!(
        values(&yielded)
            .into_iter()
            .map(|(_, v)| v)
            .collect::<Vec<_>>()
            == vec!["A-partial", "A"],
        "output of the failed element must not be yielded"
    );
    let err = failure.context("expected an invocation error")?;
    ensure!(err.phase == InvocationPhase::ProcessElement);
    ensure!(err.element_index == Some(1));
    ensure!(err.step == "upper");
    let entries = journal.lock().unwrap().clone();
    ensure!(
        entries == vec!["setup", "start_bundle", "process:a", "process:b", "teardown"],
        "unexpected journal {entries:?}"
    );
    ensure!(adapter.output_manager().is_empty());
    Ok(())
}

#[test]
fn abandoning_iteration_still_tears_down() -> anyhow::Result<()> {
    let journal = Journal::default();
    let mut adapter =
        PartitionAdapter::for_function(Upper::new(journal.clone()), AdapterConfig::default())?;

    let first = adapter
        .process_partition(global(&["a", "b", "c"]))
        .next()
        .context("expected output")??;
    ensure!(first.1.value == "A-partial");

    let entries = journal.lock().unwrap().clone();
    ensure!(entries.last().map(String::as_str) == Some("teardown"), "got {entries:?}");
    ensure!(!entries.iter().any(|e| e == "process:b"), "processing must be lazy");
    Ok(())
}

#[test]
fn sequential_partitions_do_not_share_output() -> anyhow::Result<()> {
    let journal = Journal::default();
    let mut adapter =
        PartitionAdapter::for_function(Upper::new(journal), AdapterConfig::default())?;

    // Leave buffered output behind by abandoning the first partition mid-element.
    let _ = adapter.process_partition(global(&["a", "b"])).next();
    adapter
        .output_manager()
        .output(&main_tag(), WindowedValue::in_global_window("stale".to_string()));

    let out: Vec<_> = adapter
        .process_partition(global(&["z"]))
        .collect::<Result<_, _>>()?;
    ensure!(
        values(&out)
            .into_iter()
            .map(|(_, v)| v)
            .collect::<Vec<_>>()
            == vec!["Z-partial", "Z"],
        "unexpected output {:?}",
        values(&out)
    );
    Ok(())
}

#[test]
fn window_observing_function_runs_once_per_window() -> anyhow::Result<()> {
    let at = |s| Utc.timestamp_opt(s, 0).unwrap();
    let element = WindowedValue::new(
        "x".to_string(),
        at(7),
        vec![
            BoundedWindow::interval(at(0), at(10)),
            BoundedWindow::interval(at(5), at(15)),
        ],
    );

    let mut observing = PartitionAdapter::for_function(WindowEnd, AdapterConfig::default())?;
    ensure!(observing.signature().observes_window());
    let out: Vec<_> = observing
        .process_partition(vec![element.clone()])
        .collect::<Result<_, _>>()?;
    ensure!(out.len() == 2, "expected one output per window, got {}", out.len());
    ensure!(out.iter().all(|(_, v)| v.windows.len() == 1));

    let mut plain = PartitionAdapter::for_function(Identity, AdapterConfig::default())?;
    let out: Vec<_> = plain
        .process_partition(vec![element])
        .collect::<Result<_, _>>()?;
    ensure!(out.len() == 1);
    ensure!(out[0].1.windows.len() == 2, "non-observing output keeps all windows");
    Ok(())
}

#[test]
fn concurrent_outputs_are_all_kept() -> anyhow::Result<()> {
    let manager = OutputManager::new();
    let tags = [OutputTag::new("t0"), OutputTag::new("t1")];

    std::thread::scope(|scope| {
        for worker in 0..10 {
            let manager = &manager;
            let tags = &tags;
            scope.spawn(move || {
                for i in 0..100 {
                    let value = worker * 100 + i;
                    manager.output(&tags[value % 2], WindowedValue::in_global_window(value));
                }
            });
        }
    });

    ensure!(manager.len() == 1000, "lost writes: {}", manager.len());
    let mut seen: Vec<usize> = manager.drain().map(|(_, v)| v.value).collect();
    seen.sort_unstable();
    ensure!(seen == (0..1000).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn teardown_failure_does_not_mask_the_element_failure() -> anyhow::Result<()> {
    let journal = Journal::default();
    let function = Upper {
        journal: journal.clone(),
        fail_on: &["b", "teardown"],
    };
    let mut adapter = PartitionAdapter::for_function(function, AdapterConfig::new("upper"))?;
    let (yielded, errors) = settle(adapter.process_partition(global(&["a", "b"])).collect());

    ensure!(yielded == vec!["A-partial", "A"], "got {yielded:?}");
    ensure!(errors.len() == 1, "expected exactly one error, got {}", errors.len());
    ensure!(errors[0].phase == InvocationPhase::ProcessElement);
    ensure!(errors[0].element_index == Some(1));
    let entries = journal.lock().unwrap().clone();
    ensure!(entries.last().map(String::as_str) == Some("teardown"), "got {entries:?}");
    Ok(())
}

#[test]
fn setup_failure_still_tears_down() -> anyhow::Result<()> {
    let journal = Journal::default();
    let function = Upper {
        journal: journal.clone(),
        fail_on: &["setup"],
    };
    let mut adapter = PartitionAdapter::for_function(function, AdapterConfig::new("upper"))?;
    let mut output = adapter.process_partition(global(&["a"]));

    let err = output
        .next()
        .context("expected a result")?
        .err()
        .context("expected a setup error")?;
    ensure!(err.phase == InvocationPhase::Setup, "got {err}");
    ensure!(err.element_index.is_none());
    ensure!(output.next().is_none(), "iterator must stay exhausted after the error");
    drop(output);

    let entries = journal.lock().unwrap().clone();
    ensure!(entries == vec!["setup", "teardown"], "unexpected journal {entries:?}");
    Ok(())
}

#[test]
fn teardown_failure_after_success_comes_after_all_output() -> anyhow::Result<()> {
    let journal = Journal::default();
    let function = Upper {
        journal: journal.clone(),
        fail_on: &["teardown"],
    };
    let mut adapter = PartitionAdapter::for_function(function, AdapterConfig::new("upper"))?;
    let results: Vec<_> = adapter.process_partition(global(&["a", "b"])).collect();

    ensure!(results.len() == 5, "expected four values and one error, got {}", results.len());
    ensure!(results[..4].iter().all(Result::is_ok));
    let (yielded, errors) = settle(results);
    ensure!(yielded == vec!["A-partial", "A", "B-partial", "B"], "got {yielded:?}");
    ensure!(errors.len() == 1);
    ensure!(errors[0].phase == InvocationPhase::Teardown, "got {}", errors[0]);

    let entries = journal.lock().unwrap().clone();
    let teardowns = entries.iter().filter(|e| *e == "teardown").count();
    ensure!(teardowns == 1, "teardown must run once, journal {entries:?}");
    Ok(())
}

#[test]
fn element_without_windows_fails_instead_of_vanishing() -> anyhow::Result<()> {
    let element = WindowedValue::new("x".to_string(), Utc.timestamp_opt(7, 0).unwrap(), vec![]);

    for observing in [true, false] {
        let results: Vec<_> = if observing {
            PartitionAdapter::for_function(WindowEnd, AdapterConfig::default())?
                .process_partition(vec![element.clone()])
                .collect()
        } else {
            PartitionAdapter::for_function(Identity, AdapterConfig::default())?
                .process_partition(vec![element.clone()])
                .collect()
        };
        let (yielded, errors) = settle(results);
        ensure!(yielded.is_empty(), "got {yielded:?}");
        ensure!(errors.len() == 1, "expected one error, got {}", errors.len());
        ensure!(errors[0].phase == InvocationPhase::ProcessElement);
        ensure!(errors[0].element_index == Some(0));
        ensure!(
            errors[0].to_string().contains("not assigned to any window"),
            "got {}",
            errors[0]
        );
    }
    Ok(())
}

#[test]
fn side_inputs_are_read_per_window() -> anyhow::Result<()> {
    let at = |s| Utc.timestamp_opt(s, 0).unwrap();
    let w1 = BoundedWindow::interval(at(0), at(10));
    let w2 = BoundedWindow::interval(at(5), at(15));
    let mut snapshot = SideInputSnapshot::new();
    snapshot.insert("v", w1.clone(), Value::from("in-w1"));
    snapshot.insert("v", w2.clone(), Value::from("in-w2"));

    let config = AdapterConfig::default().with_side_inputs(snapshot.into_shared());
    let mut adapter = PartitionAdapter::for_function(SideEcho, config)?;
    ensure!(!adapter.signature().observes_window());
    let element = WindowedValue::new("x".to_string(), at(7), vec![w1.clone(), w2.clone()]);
    let out: Vec<_> = adapter
        .process_partition(vec![element])
        .collect::<Result<_, _>>()?;

    let seen: Vec<(String, Vec<BoundedWindow>)> = out
        .into_iter()
        .map(|(_, v)| (v.value, v.windows))
        .collect();
    ensure!(
        seen == vec![
            ("in-w1".to_string(), vec![w1]),
            ("in-w2".to_string(), vec![w2]),
        ],
        "unexpected output {seen:?}"
    );
    Ok(())
}
