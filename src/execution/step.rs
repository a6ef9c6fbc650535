//! Step Execution
//!
//! A [`StepExecutor`] performs a step's action. The default
//! [`ShellExecutor`] runs the step's code block as a bash script:
//!
//! - variables are exported as upper-cased environment variables
//! - stdout is appended to the step log and becomes the step's return value
//! - a non-zero exit status fails the step

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, warn};

use super::context::StepContext;
use crate::error::StepError;
use crate::tree::Step;

static SCRIPT_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// What a step produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    /// Text appended to the step's log
    pub log: Option<String>,
    /// Value assigned by a `{var} = Function` binding
    pub value: Option<String>,
}

/// Performs the action of a single step.
pub trait StepExecutor: Send + Sync {
    fn execute(&self, step: &Step, ctx: &mut StepContext<'_>) -> Result<StepOutput, StepError>;
}

/// Runs code blocks with bash.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    working_dir: Option<PathBuf>,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl StepExecutor for ShellExecutor {
    fn execute(&self, step: &Step, ctx: &mut StepContext<'_>) -> Result<StepOutput, StepError> {
        let Some(code) = step.code_block.as_deref() else {
            return Ok(StepOutput::default());
        };
        if code.trim().is_empty() {
            return Ok(StepOutput::default());
        }

        let script_path = create_execution_script(code)
            .map_err(|e| StepError::Action(format!("failed to write script: {}", e)))?;

        let mut cmd = Command::new("bash");
        cmd.arg(&script_path);
        for (name, value) in ctx.variables() {
            cmd.env(env_var_name(name), value);
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
            debug!("Executing in directory: {}", dir.display());
        }

        let output = cmd.output();

        if let Err(e) = fs::remove_file(&script_path) {
            warn!("Failed to clean up script {}: {}", script_path.display(), e);
        }

        let output =
            output.map_err(|e| StepError::Action(format!("failed to start bash: {}", e)))?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if output.status.success() {
            debug!("Step '{}' completed successfully", step.text);
            let value = stdout.trim().to_string();
            Ok(StepOutput {
                log: (!value.is_empty()).then(|| stdout.trim_end().to_string()),
                value: Some(value),
            })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            debug!(
                "Step '{}' failed with exit code: {:?}",
                step.text,
                output.status.code()
            );
            if !stdout.trim().is_empty() {
                debug!("stdout:\n{}", stdout);
            }
            Err(StepError::Script {
                code: output.status.code(),
                stderr,
            })
        }
    }
}

/// Environment variable name for a step variable: `user name` -> `USER_NAME`.
pub fn env_var_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Writes a code block to a uniquely named temporary bash script.
fn create_execution_script(code: &str) -> std::io::Result<PathBuf> {
    let script_dir = std::env::temp_dir().join("treerunner_scripts");
    fs::create_dir_all(&script_dir)?;

    let n = SCRIPT_COUNTER.fetch_add(1, Ordering::SeqCst);
    let script_path = script_dir.join(format!("step_{}_{}.sh", std::process::id(), n));
    write_script(&script_path, code)?;
    Ok(script_path)
}

fn write_script(path: &Path, code: &str) -> std::io::Result<()> {
    let mut file = File::create(path)?;

    writeln!(file, "#!/bin/bash")?;
    writeln!(file, "set -e")?;
    writeln!(file, "{}", code)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::context::{RunContext, RunSettings, Variables};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn run(step: &Step, vars: &Variables) -> Result<StepOutput, StepError> {
        let executor = ShellExecutor::new();
        let ctx = RunContext::new(RunSettings::default(), Arc::new(ShellExecutor::new()));
        let mut browser = None;
        let mut step_ctx = StepContext::new(&ctx, vars, &mut browser);
        executor.execute(step, &mut step_ctx)
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(env_var_name("user"), "USER");
        assert_eq!(env_var_name("user name"), "USER_NAME");
        assert_eq!(env_var_name(" a-b "), "A_B");
    }

    #[test]
    fn test_create_execution_script() {
        let path = create_execution_script("echo 'hello world'").unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("#!/bin/bash"));
        assert!(content.contains("set -e"));
        assert!(content.contains("echo 'hello world'"));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_scripts_have_unique_names() {
        let a = create_execution_script("true").unwrap();
        let b = create_execution_script("true").unwrap();
        assert_ne!(a, b);
        fs::remove_file(a).unwrap();
        fs::remove_file(b).unwrap();
    }

    #[test]
    fn test_step_without_code_passes() {
        let output = run(&Step::new("Just text").as_textual(), &Variables::default()).unwrap();
        assert_eq!(output, StepOutput::default());
    }

    #[test]
    fn test_stdout_becomes_value() {
        let step = Step::new("Say hi").with_code("echo hi");
        let output = run(&step, &Variables::default()).unwrap();
        assert_eq!(output.value.as_deref(), Some("hi"));
        assert_eq!(output.log.as_deref(), Some("hi"));
    }

    #[test]
    fn test_variables_are_exported() {
        let mut vars = Variables::default();
        vars.set_global("user name", "alice");
        let step = Step::new("Greet").with_code("echo \"$USER_NAME\"");
        let output = run(&step, &vars).unwrap();
        assert_eq!(output.value.as_deref(), Some("alice"));
    }

    #[test]
    fn test_non_zero_exit_fails() {
        let step = Step::new("Fail").with_code("echo broken >&2; exit 3");
        let err = run(&step, &Variables::default()).unwrap_err();
        assert_eq!(
            err,
            StepError::Script {
                code: Some(3),
                stderr: "broken".to_string()
            }
        );
    }

    #[test]
    fn test_working_dir() {
        let dir = tempdir().unwrap();
        let executor = ShellExecutor::new().with_working_dir(dir.path());
        let ctx = RunContext::new(RunSettings::default(), Arc::new(ShellExecutor::new()));
        let vars = Variables::default();
        let mut browser = None;
        let mut step_ctx = StepContext::new(&ctx, &vars, &mut browser);

        let step = Step::new("Touch").with_code("touch marker.txt");
        executor.execute(&step, &mut step_ctx).unwrap();
        assert!(dir.path().join("marker.txt").exists());
    }
}
