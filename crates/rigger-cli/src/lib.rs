// gix pulls in several versions of the same transitive crates.
#![allow(clippy::multiple_crate_versions)]

use std::ffi::OsString;
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand, ValueEnum};
use rigger_domain::DEFAULT_ENVIRONMENT;
use rigger_engine::{
    DEFAULT_CONFIG_FILE, Environment, LoadedConfig, Session, SetupOptions, SystemEnvironment,
    ToolPaths, WorkspaceLayout, load_workspace, local_template_root,
};
use rigger_report::{ColorChoice, OutputFormat, RenderOptions, render_report};
use rigger_source::{fetch_template_source, resolve_template_root};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod error;

pub use error::CliError;

#[derive(Debug, Parser)]
#[command(
    name = "rigger",
    about = "Render Terraform and Ansible templates and provision infrastructure"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Args)]
struct GlobalArgs {
    /// Configuration file to load.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config_file: PathBuf,
    /// Variable set selected from `variables`.
    #[arg(long, global = true, default_value = DEFAULT_ENVIRONMENT)]
    environment: String,
    #[arg(long, global = true)]
    terraform_path: Option<PathBuf>,
    #[arg(long, global = true)]
    playbook_bin_path: Option<PathBuf>,
    #[arg(long, global = true)]
    debug: bool,
    #[arg(long, global = true, value_enum, default_value_t = ColorArg::Auto)]
    color: ColorArg,
    #[arg(long, global = true, value_enum, default_value_t = FormatArg::Text)]
    format: FormatArg,
    /// List unchanged files in text output.
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render templates, provision with terraform and configure with ansible.
    Setup {
        #[arg(long)]
        skip_terraform: bool,
        #[arg(long)]
        skip_ansible: bool,
    },
    /// Destroy the provisioned infrastructure.
    Teardown,
    /// Render templates and run terraform validate and plan.
    TestTemplate,
    /// Render templates without running any external tool.
    Render,
    Version,
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Setup { .. } => "setup",
            Self::Teardown => "teardown",
            Self::TestTemplate => "test-template",
            Self::Render => "render",
            Self::Version => "version",
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorArg {
    Auto,
    Always,
    Never,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Text => Self::Text,
            FormatArg::Json => Self::Json,
        }
    }
}

impl From<ColorArg> for ColorChoice {
    fn from(value: ColorArg) -> Self {
        match value {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

impl GlobalArgs {
    fn tools(&self) -> ToolPaths {
        ToolPaths {
            terraform: self.terraform_path.clone(),
            playbook: self.playbook_bin_path.clone(),
        }
    }

    fn render_options(&self, command: &str) -> RenderOptions {
        RenderOptions {
            color: self.color.into(),
            verbose: self.verbose,
            command: command.to_string(),
        }
    }
}

/// Run the CLI using process arguments.
///
/// # Errors
///
/// Returns an error when argument parsing fails (excluding help/version) or command
/// execution fails.
pub fn run() -> std::result::Result<i32, CliError> {
    run_from(std::env::args_os())
}

fn run_from<I, T>(args: I) -> std::result::Result<i32, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(parsed) => parsed,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(error.into()),
        },
    };
    init_tracing(cli.global.debug);
    execute(&cli, &SystemEnvironment)
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn execute<E: Environment + ?Sized>(cli: &Cli, env: &E) -> std::result::Result<i32, CliError> {
    if matches!(cli.command, Commands::Version) {
        println!("rigger {}", env!("CARGO_PKG_VERSION"));
        return Ok(0);
    }

    let global = &cli.global;
    let (loaded, layout) = load_workspace(&global.config_file, &global.environment, env)?;
    let template_root = template_root(&loaded, &layout)?;
    let mut session = Session::new(loaded, layout, template_root)?;

    let report = match &cli.command {
        Commands::Setup {
            skip_terraform,
            skip_ansible,
        } => session.setup(&SetupOptions {
            skip_terraform: *skip_terraform,
            skip_ansible: *skip_ansible,
            tools: global.tools(),
            ssh_config_dir: std::env::temp_dir(),
        })?,
        Commands::Teardown => {
            session.teardown(&global.tools())?;
            info!("teardown complete");
            return Ok(0);
        }
        Commands::TestTemplate => session.test_template(&global.tools())?,
        Commands::Render => session.render_all()?,
        Commands::Version => return Ok(0),
    };

    let rendered = render_report(
        &report,
        global.format.into(),
        &global.render_options(cli.command.name()),
    )?;
    emit_output(&rendered);
    Ok(0)
}

/// Fetch the template repository when one is configured, otherwise use the
/// local `template-dir`.
fn template_root(
    loaded: &LoadedConfig,
    layout: &WorkspaceLayout,
) -> std::result::Result<PathBuf, CliError> {
    let config = &loaded.config;
    let repo = config
        .template_repo
        .as_deref()
        .filter(|repo| !repo.trim().is_empty());
    if let (Some(repo), Some(checkout)) = (repo, layout.checkout_dir.as_deref()) {
        fetch_template_source(repo, config.template_version.as_deref(), checkout)?;
        return Ok(resolve_template_root(
            checkout,
            config.template_dir.as_deref(),
        )?);
    }

    local_template_root(loaded).ok_or_else(|| CliError::NoTemplateSource {
        config: loaded.path.display().to_string(),
    })
}

fn emit_output(rendered: &str) {
    if rendered.ends_with('\n') {
        print!("{rendered}");
    } else {
        println!("{rendered}");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::fs;

    use clap::Parser;
    use rigger_engine::{MANIFEST_FILE_NAME, MapEnvironment};

    use super::{Cli, CliError, Commands, execute, run_from};

    #[test]
    fn help_exits_successfully() {
        assert_eq!(run_from(["rigger", "--help"]).expect("help"), 0);
    }

    #[test]
    fn unknown_subcommand_is_an_argument_error() {
        let error = run_from(["rigger", "explode"]).expect_err("unknown command");
        assert!(matches!(error, CliError::ArgumentParse(_)));
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "rigger",
            "setup",
            "--skip-terraform",
            "--config-file",
            "other.yaml",
            "--environment",
            "prod",
            "--terraform-path",
            "/opt/terraform",
        ])
        .expect("parse");

        assert!(matches!(
            cli.command,
            Commands::Setup {
                skip_terraform: true,
                skip_ansible: false
            }
        ));
        assert_eq!(cli.global.config_file.to_str(), Some("other.yaml"));
        assert_eq!(cli.global.environment, "prod");
        assert_eq!(
            cli.global.tools().terraform.as_deref(),
            Some(std::path::Path::new("/opt/terraform"))
        );
    }

    #[test]
    fn defaults_select_rigger_yaml_and_default_environment() {
        let cli = Cli::try_parse_from(["rigger", "render"]).expect("parse");
        assert_eq!(cli.global.config_file.to_str(), Some("rigger.yaml"));
        assert_eq!(cli.global.environment, "default");
        assert!(!cli.global.debug);
    }

    #[test]
    fn render_writes_outputs_from_local_template_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("templates/terraform")).expect("mkdir");
        fs::write(
            root.join("templates/terraform/main.tf.tmpl"),
            "name = \"[[ vars.name ]]\"\n",
        )
        .expect("write template");
        let config = root.join("rigger.yaml");
        fs::write(
            &config,
            "template-dir: templates\noutput-dir: out\nterraform:\n  providers: [hcloud]\nvariables:\n  default:\n    name: web\n",
        )
        .expect("write config");

        let cli = Cli::try_parse_from([
            "rigger",
            "render",
            "--color",
            "never",
            "--config-file",
            config.to_str().expect("utf-8 path"),
        ])
        .expect("parse");
        let env = MapEnvironment::new().with_home(root.join("home"));

        assert_eq!(execute(&cli, &env).expect("render"), 0);
        assert_eq!(
            fs::read_to_string(root.join("out/terraform/main.tf")).expect("read output"),
            "name = \"web\"\n"
        );
        assert!(root.join("out/terraform").join(MANIFEST_FILE_NAME).is_file());
    }

    #[test]
    fn missing_config_file_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = temp.path().join("absent.yaml");
        let cli = Cli::try_parse_from([
            "rigger",
            "render",
            "--config-file",
            config.to_str().expect("utf-8 path"),
        ])
        .expect("parse");
        let env = MapEnvironment::new().with_home(temp.path());

        let error = execute(&cli, &env).expect_err("missing config");
        assert!(matches!(error, CliError::Pipeline(_)));
    }
}
