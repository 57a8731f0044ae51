use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use tempfile::TempDir;

static BUILD_RIGGER: OnceLock<Result<PathBuf, String>> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub command_line: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunResult {
    #[must_use]
    pub fn transcript(&self) -> String {
        format!(
            "$ {}\n[exit: {}]\n[stdout]\n{}[stderr]\n{}",
            self.command_line, self.exit_code, self.stdout, self.stderr
        )
    }
}

/// A scratch project: `rigger.yaml`, templates and outputs under one temp
/// directory, with its own `home/` so workspace state never leaks out.
#[derive(Debug)]
pub struct Fixture {
    temp: TempDir,
}

impl Fixture {
    /// # Errors
    ///
    /// Returns an error if the temp directory or its `home/` cannot be created.
    pub fn new() -> io::Result<Self> {
        let fixture = Self {
            temp: TempDir::new()?,
        };
        fs::create_dir_all(fixture.home())?;
        Ok(fixture)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    #[must_use]
    pub fn home(&self) -> PathBuf {
        self.root().join("home")
    }

    #[must_use]
    pub fn config(&self) -> PathBuf {
        self.root().join("rigger.yaml")
    }

    /// Path of a rendered file below the fixture's `out/` directory.
    #[must_use]
    pub fn output(&self, relative: &str) -> PathBuf {
        self.root().join("out").join(relative)
    }

    /// Write a file relative to the fixture root, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self, relative: &str, content: &str) -> io::Result<()> {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)
    }

    /// Write a `rigger.yaml` using local `templates/`, rendering into `out/`,
    /// with `variables` as the indented body of the default environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_config(&self, variables: &str) -> io::Result<()> {
        self.write(
            "rigger.yaml",
            &format!(
                "template-dir: templates\noutput-dir: out\nterraform:\n  providers: [hcloud]\nvariables:\n  default:\n{variables}"
            ),
        )
    }

    /// Run `rigger --config-file <fixture config> --color never <args>`.
    ///
    /// # Errors
    ///
    /// Returns an error if building or running the binary fails.
    pub fn run(&self, args: &[&str]) -> Result<RunResult, String> {
        let config = self.config();
        let mut full_args = vec![
            "--config-file".to_string(),
            config.display().to_string(),
            "--color".to_string(),
            "never".to_string(),
        ];
        full_args.extend(args.iter().map(|arg| (*arg).to_string()));
        run_rigger(&self.home(), &full_args)
    }
}

/// Run the `rigger` binary with `HOME` set to `home` and `RUST_LOG` cleared.
///
/// # Errors
///
/// Returns an error if building/running the `rigger` binary fails.
pub fn run_rigger<S: AsRef<str>>(home: &Path, args: &[S]) -> Result<RunResult, String> {
    let bin = rigger_bin()?;
    let output = Command::new(bin)
        .env("HOME", home)
        .env_remove("RUST_LOG")
        .args(args.iter().map(AsRef::as_ref))
        .output()
        .map_err(|error| format!("failed to run rigger: {error}"))?;

    let mut command_line = String::from("rigger");
    for arg in args {
        command_line.push(' ');
        command_line.push_str(arg.as_ref());
    }

    Ok(RunResult {
        command_line,
        exit_code: output.status.code().unwrap_or(1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Build the binary once per test process and return its path next to the
/// test executable.
fn rigger_bin() -> Result<PathBuf, String> {
    BUILD_RIGGER
        .get_or_init(|| {
            let status = Command::new("cargo")
                .args(["build", "-q", "-p", "rigger"])
                .status()
                .map_err(|error| format!("failed to build rigger binary: {error}"))?;
            if !status.success() {
                return Err(format!("cargo build -p rigger exited with {status}"));
            }

            let mut dir = std::env::current_exe()
                .map_err(|error| format!("failed to determine current executable: {error}"))?;
            let _ = dir.pop();
            if dir.ends_with("deps") {
                let _ = dir.pop();
            }
            Ok(dir.join(format!("rigger{}", std::env::consts::EXE_SUFFIX)))
        })
        .clone()
}
