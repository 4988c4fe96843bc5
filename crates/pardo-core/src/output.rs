//! Output tags and the routing layer in front of an output sink.

use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

use crate::window::WindowedValue;

/// Identifier naming one of a function's output streams.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputTag(Arc<str>);

impl OutputTag {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OutputTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OutputTag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Destination for tagged output. Accepts any tag unconditionally.
pub trait OutputSink<T>: Send + Sync {
    fn output(&self, tag: &OutputTag, value: WindowedValue<T>);
}

/// Emission on a tag that is neither the main tag nor a declared additional tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputProtocolError {
    pub tag: OutputTag,
}

impl fmt::Display for OutputProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "output on unrecognized tag '{}'", self.tag)
    }
}

impl std::error::Error for OutputProtocolError {}

/// Knows which tags a step may emit on.
#[derive(Debug, Clone)]
pub struct OutputRouter {
    main: OutputTag,
    additional: Vec<OutputTag>,
}

impl OutputRouter {
    pub fn new(main: OutputTag, additional: impl IntoIterator<Item = OutputTag>) -> Self {
        let mut tags: Vec<OutputTag> = Vec::new();
        for tag in additional {
            if tag != main && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        Self {
            main,
            additional: tags,
        }
    }

    pub fn main_tag(&self) -> &OutputTag {
        &self.main
    }

    pub fn additional_tags(&self) -> &[OutputTag] {
        &self.additional
    }

    pub fn recognizes(&self, tag: &OutputTag) -> bool {
        *tag == self.main || self.additional.contains(tag)
    }

    pub fn route<T>(
        &self,
        sink: &dyn OutputSink<T>,
        tag: &OutputTag,
        value: WindowedValue<T>,
    ) -> Result<(), OutputProtocolError> {
        if !self.recognizes(tag) {
            return Err(OutputProtocolError { tag: tag.clone() });
        }
        sink.output(tag, value);
        Ok(())
    }

    pub fn route_main<T>(&self, sink: &dyn OutputSink<T>, value: WindowedValue<T>) {
        sink.output(&self.main, value);
    }
}
