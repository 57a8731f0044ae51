use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use rigger_domain::{Value, VariableTree};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ExecutorError;

pub const TERRAFORM_BINARY: &str = "terraform";
pub const PLAYBOOK_BINARY: &str = "ansible-playbook";
const ROLES_PATH_ENV: &str = "ANSIBLE_ROLES_PATH";

/// Use `configured` when given, otherwise look `default` up on `PATH`.
///
/// # Errors
///
/// Returns an error when no binary is configured and `default` is not on `PATH`.
pub fn locate_binary(configured: Option<&Path>, default: &str) -> Result<PathBuf, ExecutorError> {
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }
    which::which(default).map_err(|_| ExecutorError::BinaryNotFound {
        binary: default.to_string(),
    })
}

fn describe(program: &Path, args: &[&str]) -> (String, String) {
    (program.display().to_string(), args.join(" "))
}

fn run_status(command: &mut Command, program: &Path, args: &[&str]) -> Result<(), ExecutorError> {
    let status = command.status().map_err(|source| {
        let (program, args) = describe(program, args);
        ExecutorError::CommandSpawn {
            program,
            args,
            source,
        }
    })?;
    if status.success() {
        Ok(())
    } else {
        let (program, args) = describe(program, args);
        Err(ExecutorError::CommandFailed {
            program,
            args,
            status,
        })
    }
}

/// Runs terraform inside the rendered terraform directory.
#[derive(Debug, Clone)]
pub struct TerraformExecutor {
    binary: PathBuf,
    work_dir: PathBuf,
}

impl TerraformExecutor {
    #[must_use]
    pub fn new(binary: PathBuf, work_dir: PathBuf) -> Self {
        Self { binary, work_dir }
    }

    /// Locate terraform and bind it to `work_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when terraform cannot be found.
    pub fn locate(configured: Option<&Path>, work_dir: PathBuf) -> Result<Self, ExecutorError> {
        let binary = locate_binary(configured, TERRAFORM_BINARY)?;
        debug!(binary = %binary.display(), "using terraform");
        Ok(Self::new(binary, work_dir))
    }

    /// # Errors
    ///
    /// Returns an error when terraform cannot be started or exits non-zero.
    pub fn init(&self) -> Result<(), ExecutorError> {
        info!("running terraform init");
        self.run(&["init"])
    }

    /// # Errors
    ///
    /// Returns an error when terraform cannot be started or exits non-zero.
    pub fn apply(&self) -> Result<(), ExecutorError> {
        info!("running terraform apply");
        self.run(&["apply", "-auto-approve"])
    }

    /// # Errors
    ///
    /// Returns an error when terraform cannot be started or exits non-zero.
    pub fn destroy(&self) -> Result<(), ExecutorError> {
        info!("running terraform destroy");
        self.run(&["apply", "-destroy", "-auto-approve"])
    }

    /// # Errors
    ///
    /// Returns an error when terraform cannot be started or exits non-zero.
    pub fn validate(&self) -> Result<(), ExecutorError> {
        info!("running terraform validate");
        self.run(&["validate"])
    }

    /// # Errors
    ///
    /// Returns an error when terraform cannot be started or exits non-zero.
    pub fn plan(&self) -> Result<(), ExecutorError> {
        info!("running terraform plan");
        self.run(&["plan"])
    }

    /// Values of `terraform output -json`, keyed by output name.
    ///
    /// # Errors
    ///
    /// Returns an error when terraform fails or prints malformed JSON.
    pub fn outputs(&self) -> Result<VariableTree, ExecutorError> {
        const ARGS: [&str; 2] = ["output", "-json"];
        info!("collecting terraform outputs");
        let output = Command::new(&self.binary)
            .args(ARGS)
            .current_dir(&self.work_dir)
            .stderr(Stdio::inherit())
            .output()
            .map_err(|source| {
                let (program, args) = describe(&self.binary, &ARGS);
                ExecutorError::CommandSpawn {
                    program,
                    args,
                    source,
                }
            })?;
        if !output.status.success() {
            let (program, args) = describe(&self.binary, &ARGS);
            return Err(ExecutorError::CommandFailed {
                program,
                args,
                status: output.status,
            });
        }
        parse_outputs(&String::from_utf8_lossy(&output.stdout))
    }

    fn run(&self, args: &[&str]) -> Result<(), ExecutorError> {
        let mut command = Command::new(&self.binary);
        command.args(args).current_dir(&self.work_dir);
        run_status(&mut command, &self.binary, args)
    }
}

#[derive(Deserialize)]
struct TerraformOutput {
    #[serde(default)]
    value: serde_json::Value,
}

/// Parse `terraform output -json` into a tree of output values.
///
/// Empty input is an empty tree. Outputs whose value is `null` are dropped.
///
/// # Errors
///
/// Returns an error when the input is not a JSON object of outputs.
pub fn parse_outputs(json: &str) -> Result<VariableTree, ExecutorError> {
    if json.trim().is_empty() {
        debug!("terraform produced no outputs");
        return Ok(VariableTree::new());
    }

    let outputs: BTreeMap<String, TerraformOutput> =
        serde_json::from_str(json).map_err(|source| ExecutorError::OutputDecode { source })?;
    Ok(outputs
        .into_iter()
        .filter_map(|(name, output)| json_to_value(output.value).map(|value| (name, value)))
        .collect())
}

fn json_to_value(json: serde_json::Value) -> Option<Value> {
    match json {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(value) => Some(Value::Bool(value)),
        serde_json::Value::Number(number) => number
            .as_i64()
            .map(Value::Integer)
            .or_else(|| number.as_f64().map(Value::Float)),
        serde_json::Value::String(value) => Some(Value::String(value)),
        serde_json::Value::Array(items) => Some(Value::Sequence(
            items.into_iter().filter_map(json_to_value).collect(),
        )),
        serde_json::Value::Object(map) => Some(Value::Mapping(
            map.into_iter()
                .filter_map(|(key, value)| json_to_value(value).map(|value| (key, value)))
                .collect(),
        )),
    }
}

/// Runs `ansible-playbook` inside the rendered ansible directory.
#[derive(Debug, Clone)]
pub struct AnsibleExecutor {
    binary: PathBuf,
    work_dir: PathBuf,
    roles_dir: Option<PathBuf>,
}

impl AnsibleExecutor {
    #[must_use]
    pub fn new(binary: PathBuf, work_dir: PathBuf, roles_dir: Option<PathBuf>) -> Self {
        Self {
            binary,
            work_dir,
            roles_dir,
        }
    }

    /// Locate `ansible-playbook` and bind it to `work_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when the binary cannot be found.
    pub fn locate(
        configured: Option<&Path>,
        work_dir: PathBuf,
        roles_dir: Option<PathBuf>,
    ) -> Result<Self, ExecutorError> {
        let binary = locate_binary(configured, PLAYBOOK_BINARY)?;
        debug!(binary = %binary.display(), "using ansible-playbook");
        Ok(Self::new(binary, work_dir, roles_dir))
    }

    /// Run `ansible-playbook -i <inventory> <playbook>`.
    ///
    /// # Errors
    ///
    /// Returns an error when the playbook cannot be started or exits non-zero.
    pub fn run_playbook(&self, inventory: &str, playbook: &str) -> Result<(), ExecutorError> {
        let args = ["-i", inventory, playbook];
        info!(playbook, inventory, "running ansible-playbook");

        let mut command = Command::new(&self.binary);
        command.args(args).current_dir(&self.work_dir);
        match &self.roles_dir {
            Some(roles_dir) => {
                debug!(roles_dir = %roles_dir.display(), "using custom ansible roles directory");
                command.env(ROLES_PATH_ENV, roles_dir);
            }
            None => debug!("no custom ansible roles directory"),
        }
        run_status(&mut command, &self.binary, &args)
    }
}
