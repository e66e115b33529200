// src/exec/invocation.rs

//! External tool invocation description.

use std::path::PathBuf;

/// One external tool call, fully prepared from configuration and dataset
/// metadata. The runner executes this verbatim (argv, no shell).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory for the tool (the dataset's processing directory).
    pub workdir: PathBuf,
    /// Artifact the tool is expected to produce on success.
    pub artifact: PathBuf,
}

impl ToolInvocation {
    /// Single-line rendering for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl std::fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.command_line())
    }
}
