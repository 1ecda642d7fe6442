//! Diagnostics sink for soft failures
//!
//! Query evaluation and consistency checks never abort on data conditions.
//! They record what went wrong here and carry on.

use std::fmt;

/// Structured code for a soft failure or consistency finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    /// No layer of the column stack can evaluate the operator
    OperatorNotSupported,
    /// A query operand could not be converted to the column type
    ConversionFailed,
    /// Column holds fewer items than the partition expects
    ColumnShortOfExpected,
    /// Sort permutation length differs from the column count
    SortedCountMismatch,
    /// An id appears more than once in the sort permutation
    SortedDuplicateId,
    /// Adjacent permutation entries are not in (value, id) order
    SortedOutOfOrder,
    /// An id below the count never appears in the permutation
    SortedMissingId,
    /// A placement names a batch that does not exist
    DanglingBatchReference,
    /// A placement extends past the used space of its batch
    PlacementOutOfRange,
    /// Two live placements share bytes
    OverlappingPlacement,
    /// Live bytes plus waste do not add up to used space
    BatchAccountingMismatch,
    /// Word index and stored values disagree
    IndexStorageDesync,
    /// Word index references an id past the column count
    IndexIdOutOfRange,
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One recorded finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub column: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.column, self.message)
    }
}

/// Collector handed down through query evaluation and verification
#[derive(Debug, Clone)]
pub struct ExecutionDetails {
    succeeded: bool,
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
}

impl Default for ExecutionDetails {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionDetails {
    pub fn new() -> Self {
        Self {
            succeeded: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Record a finding that makes the result partial or the column suspect
    pub fn add_error(&mut self, code: DiagnosticCode, column: &str, message: impl Into<String>) {
        self.succeeded = false;
        self.errors.push(Diagnostic {
            code,
            column: column.to_string(),
            message: message.into(),
        });
    }

    /// Record a finding that leaves the result intact
    pub fn add_warning(&mut self, code: DiagnosticCode, column: &str, message: impl Into<String>) {
        self.warnings.push(Diagnostic {
            code,
            column: column.to_string(),
            message: message.into(),
        });
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// True if any error or warning carries `code`
    pub fn has(&self, code: DiagnosticCode) -> bool {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .any(|d| d.code == code)
    }

    /// Fold another collector into this one
    pub fn merge(&mut self, other: ExecutionDetails) {
        self.succeeded &= other.succeeded;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_clear_success() {
        let mut details = ExecutionDetails::new();
        details.add_warning(DiagnosticCode::ColumnShortOfExpected, "title", "short by 2");
        assert!(details.succeeded());

        details.add_error(DiagnosticCode::OperatorNotSupported, "title", "contains");
        assert!(!details.succeeded());
        assert!(details.has(DiagnosticCode::OperatorNotSupported));
        assert_eq!(
            details.errors()[0].to_string(),
            "[OperatorNotSupported] title: contains"
        );
    }

    #[test]
    fn test_merge() {
        let mut outer = ExecutionDetails::new();
        let mut inner = ExecutionDetails::new();
        inner.add_error(DiagnosticCode::SortedMissingId, "id", "3");
        outer.merge(inner);
        assert!(!outer.succeeded());
        assert_eq!(outer.errors().len(), 1);
    }
}
