//! Results of steps that are allowed to fail.

/// Outcome of a best-effort step: an optional value plus soft diagnostics.
///
/// A missing value is never a pipeline failure. Callers fold the warnings
/// into the target's [`BuildResult`](crate::core::BuildResult).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestEffort<T> {
    pub value: Option<T>,
    pub warnings: Vec<String>,
}

impl<T> BestEffort<T> {
    pub fn ok(value: T) -> Self {
        BestEffort {
            value: Some(value),
            warnings: Vec::new(),
        }
    }

    /// Nothing produced, nothing to report (e.g. the step was not requested).
    pub fn absent() -> Self {
        BestEffort {
            value: None,
            warnings: Vec::new(),
        }
    }

    /// Nothing produced, with the reason.
    pub fn failed(warning: impl Into<String>) -> Self {
        BestEffort {
            value: None,
            warnings: vec![warning.into()],
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    pub fn into_parts(self) -> (Option<T>, Vec<String>) {
        (self.value, self.warnings)
    }
}

impl<T> Default for BestEffort<T> {
    fn default() -> Self {
        Self::absent()
    }
}
