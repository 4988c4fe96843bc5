use clap::Parser;
use pardo_core::{window::WindowingStrategy, OutputTag};
use pardo_runner::AdapterConfig;

/// Harness configuration.
///
/// Every field can come from the environment, so `from_env` works without any flags.
#[derive(Parser, Debug, Clone)]
pub struct HarnessConfig {
    /// Number of partitions the input is split into.
    #[arg(long, env = "PARDO_PARTITIONS", default_value_t = 4)]
    pub partitions: usize,

    /// Number of generated input lines for `run`.
    #[arg(long, env = "PARDO_ELEMENTS", default_value_t = 1000)]
    pub elements: usize,

    /// Fixed window size in seconds; 0 keeps everything in the global window.
    #[arg(long, env = "PARDO_WINDOW_SECS", default_value_t = 60)]
    pub window_secs: i64,

    #[arg(long, env = "PARDO_MAIN_TAG", default_value = "words")]
    pub main_tag: String,

    #[arg(long, env = "PARDO_STEP_NAME", default_value = "split_words")]
    pub step_name: String,
}

impl HarnessConfig {
    /// Parse config from environment only (no CLI parsing).
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::parse_from(["pardo-harness"]))
    }

    pub fn windowing(&self) -> WindowingStrategy {
        if self.window_secs <= 0 {
            WindowingStrategy::global()
        } else {
            WindowingStrategy::fixed(chrono::Duration::seconds(self.window_secs))
        }
    }

    pub fn main_tag(&self) -> OutputTag {
        OutputTag::new(&self.main_tag)
    }

    pub fn adapter_config(&self, step_name: &str) -> AdapterConfig {
        AdapterConfig::new(step_name)
            .with_main_tag(self.main_tag())
            .with_windowing(self.windowing())
    }
}
