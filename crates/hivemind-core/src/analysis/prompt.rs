//! Instruction payload written to the analysis process's stdin.

use std::path::Path;

use crate::analysis::AnalysisMode;
use crate::config::OutputSet;

/// Everything a template may refer to.
#[derive(Debug, Clone, Copy)]
pub struct InstructionContext<'a> {
    pub artifact: &'a str,
    pub revision: &'a str,
    pub source_dir: &'a Path,
    pub output_dir: &'a Path,
    pub mode: AnalysisMode,
    pub outputs: &'a OutputSet,
}

/// Renders the instruction text for one analysis run.
pub trait InstructionTemplate: Send + Sync {
    fn render(&self, ctx: &InstructionContext<'_>) -> String;
}

/// Plain instructions listing the files to produce.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTemplate;

impl InstructionTemplate for DefaultTemplate {
    fn render(&self, ctx: &InstructionContext<'_>) -> String {
        let mut text = format!(
            "You are documenting the source repository '{artifact}' at revision {revision}.\n\
             Read the source tree at {source}.\n\
             Write each file below directly into {output}, overwriting any existing copy:\n\n",
            artifact = ctx.artifact,
            revision = ctx.revision,
            source = ctx.source_dir.display(),
            output = ctx.output_dir.display(),
        );
        for name in ctx.mode.expected_files(ctx.outputs) {
            text.push_str(&format!("- {name}\n"));
        }

        match ctx.mode {
            AnalysisMode::Create => text.push_str(&format!(
                "\n{control} is the agent definition. Start it with front matter containing \
                 `name: expert-{artifact}`, a one-line `description:` and a `tools:` list, then \
                 the sections `## Knowledge`, `## Scope` and `## How to answer`.\n",
                control = ctx.outputs.control,
                artifact = ctx.artifact,
            )),
            AnalysisMode::Refresh => text.push_str(&format!(
                "\nExisting documents from an earlier revision are already present; update them \
                 to match this revision. Do not modify, rename or delete {control}.\n",
                control = ctx.outputs.control,
            )),
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_protects_control_file() {
        let outputs = OutputSet::default();
        let ctx = InstructionContext {
            artifact: "foo",
            revision: "def456",
            source_dir: Path::new("/repos/foo"),
            output_dir: Path::new("/staging/foo-x/def456"),
            mode: AnalysisMode::Refresh,
            outputs: &outputs,
        };
        let text = DefaultTemplate.render(&ctx);
        assert!(text.contains("- summary.md"));
        assert!(!text.contains("- agent.md"));
        assert!(text.contains("Do not modify, rename or delete agent.md"));
    }

    #[test]
    fn test_create_lists_control_file() {
        let outputs = OutputSet::default();
        let ctx = InstructionContext {
            artifact: "foo",
            revision: "abc123",
            source_dir: Path::new("/repos/foo"),
            output_dir: Path::new("/staging/foo-x/abc123"),
            mode: AnalysisMode::Create,
            outputs: &outputs,
        };
        let text = DefaultTemplate.render(&ctx);
        assert!(text.contains("- agent.md"));
        assert!(text.contains("name: expert-foo"));
    }
}
