use std::fmt;

use uuid::Uuid;

/// Lifecycle step during which a user-function call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationPhase {
    Setup,
    StartBundle,
    ProcessElement,
    FinishBundle,
    Teardown,
}

impl InvocationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::StartBundle => "start_bundle",
            Self::ProcessElement => "process_element",
            Self::FinishBundle => "finish_bundle",
            Self::Teardown => "teardown",
        }
    }
}

impl fmt::Display for InvocationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure raised by user code, with the bundle and element it happened in.
#[derive(Debug)]
pub struct InvocationError {
    pub phase: InvocationPhase,
    pub step: String,
    pub bundle_id: Uuid,
    /// Position of the failing element within the partition, for `ProcessElement`.
    pub element_index: Option<usize>,
    pub source: pardo_core::Error,
}

impl InvocationError {
    pub fn new(
        phase: InvocationPhase,
        step: impl Into<String>,
        bundle_id: Uuid,
        source: pardo_core::Error,
    ) -> Self {
        Self {
            phase,
            step: step.into(),
            bundle_id,
            element_index: None,
            source,
        }
    }

    pub fn at_element(mut self, index: usize) -> Self {
        self.element_index = Some(index);
        self
    }
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step '{}' failed in {} (bundle {}",
            self.step, self.phase, self.bundle_id
        )?;
        if let Some(index) = self.element_index {
            write!(f, ", element {index}")?;
        }
        write!(f, "): {}", self.source)
    }
}

impl std::error::Error for InvocationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_bundle_and_element() {
        let bundle_id = Uuid::nil();
        let err = InvocationError::new(
            InvocationPhase::ProcessElement,
            "split",
            bundle_id,
            pardo_core::Error::msg("boom"),
        )
        .at_element(2);

        assert_eq!(
            err.to_string(),
            format!("step 'split' failed in process_element (bundle {bundle_id}, element 2): boom")
        );
    }

    #[test]
    fn wrapped_protocol_error_is_reachable_through_the_source_chain() {
        use pardo_core::{OutputProtocolError, OutputTag};
        use std::error::Error as _;

        let protocol = OutputProtocolError {
            tag: OutputTag::new("late"),
        };
        let err = InvocationError::new(
            InvocationPhase::ProcessElement,
            "split",
            Uuid::nil(),
            pardo_core::Error::from(protocol.clone()),
        );

        let mut chain = err.source();
        let mut found = None;
        while let Some(cause) = chain {
            if let Some(protocol) = cause.downcast_ref::<OutputProtocolError>() {
                found = Some(protocol.clone());
                break;
            }
            chain = cause.source();
        }
        assert_eq!(found, Some(protocol));
    }
}
