//! External analysis process: launch, observe, stop, verify.

pub mod executor;
pub mod prompt;
pub mod tail;

use serde::{Deserialize, Serialize};

use crate::config::OutputSet;

pub use executor::{verify_outputs, AnalysisExecutor, AnalysisHandle, AnalysisReport, AnalysisRequest, AnalysisStatus};
pub use prompt::{DefaultTemplate, InstructionContext, InstructionTemplate};
pub use tail::TailBuffer;

/// What the analysis is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// First analysis: every output file, control file included.
    Create,
    /// Later analyses: knowledge files only; the control file is preserved.
    Refresh,
}

impl AnalysisMode {
    /// `Create` unless the seeded output directory already has a control file.
    pub fn for_output_dir(output_dir: &std::path::Path, outputs: &OutputSet) -> Self {
        if output_dir.join(&outputs.control).is_file() {
            AnalysisMode::Refresh
        } else {
            AnalysisMode::Create
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Create => "create",
            AnalysisMode::Refresh => "refresh",
        }
    }

    /// Files the process is expected to write in this mode.
    pub fn expected_files<'a>(&self, outputs: &'a OutputSet) -> Vec<&'a str> {
        match self {
            AnalysisMode::Create => outputs.all().collect(),
            AnalysisMode::Refresh => outputs.knowledge.iter().map(String::as_str).collect(),
        }
    }
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_follows_control_file() {
        let dir = tempfile::tempdir().unwrap();
        let outputs = OutputSet::default();
        assert_eq!(AnalysisMode::for_output_dir(dir.path(), &outputs), AnalysisMode::Create);

        std::fs::write(dir.path().join("agent.md"), "seed").unwrap();
        assert_eq!(AnalysisMode::for_output_dir(dir.path(), &outputs), AnalysisMode::Refresh);
    }

    #[test]
    fn test_expected_files_per_mode() {
        let outputs = OutputSet::default();
        assert_eq!(AnalysisMode::Create.expected_files(&outputs).len(), 5);
        let refresh = AnalysisMode::Refresh.expected_files(&outputs);
        assert_eq!(refresh.len(), 4);
        assert!(!refresh.contains(&"agent.md"));
    }
}
