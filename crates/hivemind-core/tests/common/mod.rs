#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use hivemind_core::{HivemindConfig, RepositoryBinding, UpdatePipeline};
use tempfile::TempDir;

pub fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A throwaway upstream repository on branch `main`.
pub struct Upstream {
    dir: TempDir,
}

impl Upstream {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "--initial-branch=main"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        let upstream = Self { dir };
        upstream.commit("initial");
        upstream
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn head(&self) -> String {
        run_git(self.path(), &["rev-parse", "HEAD"])
    }

    /// Commit a change to `README` and return the new revision.
    pub fn commit(&self, message: &str) -> String {
        std::fs::write(self.path().join("README"), message).unwrap();
        run_git(self.path(), &["add", "README"]);
        run_git(self.path(), &["commit", "-q", "-m", message]);
        self.head()
    }

    pub fn tag(&self, name: &str) {
        run_git(self.path(), &["tag", "-a", name, "-m", name]);
    }
}

/// Writes the knowledge files, plus the control file in create mode, and
/// appends the revision to `log`.
pub fn writing_script(log: &Path) -> String {
    format!(
        r#"echo "$HIVEMIND_REVISION $HIVEMIND_MODE" >> '{log}'
cat > /dev/null
for f in summary.md code_structure.md build_system.md apis_and_interfaces.md; do
  echo "$HIVEMIND_REVISION" > "$f"
done
if [ "$HIVEMIND_MODE" = create ]; then
  echo "control for $HIVEMIND_ARTIFACT" > agent.md
fi"#,
        log = log.display()
    )
}

pub fn failing_script() -> String {
    "echo partial > summary.md; echo analysis broke >&2; exit 1".to_string()
}

/// Records its pid, then sleeps until stopped.
pub fn sleeping_script(pid_file: &Path) -> String {
    format!("echo $$ > '{}'; exec sleep 30", pid_file.display())
}

/// Isolated data root with one upstream bound as `foo`.
pub struct Fixture {
    pub root: TempDir,
    pub upstream: Upstream,
    pub config: HivemindConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let upstream = Upstream::new();
        let mut config = HivemindConfig::with_root(root.path());
        config.analysis.program = "sh".to_string();
        config.analysis.poll_interval_ms = 20;
        config.analysis.terminate_grace_ms = 500;
        let mut fixture = Self {
            root,
            upstream,
            config,
        };
        let script = writing_script(&fixture.log_path());
        fixture.use_script(script);
        fixture
            .pipeline()
            .registry()
            .bind(
                "foo",
                RepositoryBinding::new(fixture.upstream.path().to_string_lossy().into_owned()),
            )
            .unwrap();
        fixture
    }

    /// Analysis script for pipelines built after this call.
    pub fn use_script(&mut self, script: String) {
        self.config.analysis.args = vec!["-c".to_string(), script];
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.path().join("analysis.log")
    }

    /// Revisions the analysis script has been invoked for, in order.
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(self.log_path())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn pipeline(&self) -> UpdatePipeline {
        UpdatePipeline::from_config(&self.config)
    }

    pub fn working_head(&self) -> String {
        run_git(&self.config.working_copy("foo"), &["rev-parse", "HEAD"])
    }

    pub fn staging_entries(&self) -> usize {
        std::fs::read_dir(&self.config.staging_root)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}
