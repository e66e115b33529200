// src/exec/classify.rs

//! Classification of external tool failures.

use regex::RegexSet;

/// How a non-zero tool exit should be treated by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth retrying: resource exhaustion, transient I/O, interrupted runs.
    Transient,
    /// Retrying cannot help: bad parameters, malformed input, the tool
    /// itself reporting an unrecoverable abort.
    Deterministic,
}

/// Scans tool diagnostics to separate deterministic failures from transient
/// ones. IMOD-family tools signal fatal conditions with ERROR/ABORT lines in
/// their output; resource problems show up as allocation or device messages.
#[derive(Debug)]
pub struct OutcomeClassifier {
    deterministic: RegexSet,
    transient: RegexSet,
}

impl OutcomeClassifier {
    pub fn new() -> Self {
        let deterministic = RegexSet::new([
            r"(?i)\bABORT",
            r"(?i)usage:",
            r"(?i)invalid (?:option|argument|parameter|entry)",
            r"(?i)unrecognized (?:option|argument)",
            r"(?i)no such file or directory",
            r"(?i)is not a valid MRC file",
            r"(?i)bad image dimensions",
            r"(?i)too few (?:beads|fiducials|points)",
            r"(?i)failed to converge",
        ])
        .expect("deterministic patterns are valid");

        let transient = RegexSet::new([
            r"(?i)out of memory",
            r"(?i)cannot allocate",
            r"(?i)CUDA[_ ]?(?:error|out of memory)",
            r"(?i)device (?:busy|unavailable)",
            r"(?i)resource temporarily unavailable",
            r"(?i)input/output error",
            r"(?i)stale file handle",
            r"(?i)connection (?:reset|timed out)",
        ])
        .expect("transient patterns are valid");

        Self {
            deterministic,
            transient,
        }
    }

    /// Classify a failed execution from its exit code and diagnostic text.
    ///
    /// Deterministic markers win over transient ones; anything unrecognized
    /// defaults to transient so the bounded retry policy gets a chance
    /// before the stage fails terminally.
    pub fn classify(&self, exit_code: Option<i32>, diagnostics: &str) -> FailureKind {
        if self.deterministic.is_match(diagnostics) {
            return FailureKind::Deterministic;
        }
        if self.transient.is_match(diagnostics) {
            return FailureKind::Transient;
        }
        // Killed by signal (no exit code) is typically external interference.
        if exit_code.is_none() {
            return FailureKind::Transient;
        }
        FailureKind::Transient
    }
}

impl Default for OutcomeClassifier {
    fn default() -> Self {
        Self::new()
    }
}
