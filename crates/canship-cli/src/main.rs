//! canship - deploy generated smart-contract modules to a local replica
//!
//! ## Commands
//!
//! - `deploy`: stage, validate (recovering if needed) and install or upgrade a module
//! - `check`: stage and run the static checker only
//! - `replica`: start, stop or inspect the local replica
//! - `resolve`: print the id of an already deployed module
//! - `doctor`: report toolchain and environment readiness

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use canship_core::metrics::METRICS;
use canship_core::{
    workspace_dir, CliToolchain, CodeGenConfig, CodeGenService, DeployConfig,
    DeploymentOrchestrator, DeploymentOutcome, DeploymentRequest, HttpCodeGenService,
    LsofInspector, ToolchainProfile,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "canship")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deploy generated smart-contract modules to a local replica", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and JSON command output
    #[arg(long, global = true)]
    json: bool,

    /// JSON configuration file
    #[arg(long, global = true, env = "CANSHIP_CONFIG")]
    config: Option<PathBuf>,

    /// Toolchain binary (searched on PATH when omitted)
    #[arg(long, global = true, env = "CANSHIP_TOOLCHAIN")]
    toolchain: Option<PathBuf>,

    /// Replica port
    #[arg(long, global = true, env = "CANSHIP_REPLICA_PORT")]
    port: Option<u16>,

    /// Project layout preset (default: dfx, or the config file's profile)
    #[arg(long, global = true, value_enum, env = "CANSHIP_PROFILE")]
    profile: Option<ProfilePreset>,

    /// Code generation endpoint used by the external rewrite tier
    #[arg(long, global = true, env = "CANSHIP_CODEGEN_URL")]
    codegen_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Built-in toolchain profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProfilePreset {
    /// Stock dfx project: `dfx.json` and `main.mo`
    Dfx,
    /// Neutral layout: `config.json` and `module.src`
    Generic,
}

impl ProfilePreset {
    fn profile(self) -> ToolchainProfile {
        match self {
            ProfilePreset::Dfx => ToolchainProfile::dfx(),
            ProfilePreset::Generic => ToolchainProfile::default(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a module, installing it or upgrading the existing instance
    Deploy {
        /// Module name
        #[arg(short, long)]
        module: String,

        /// Source artifact file
        #[arg(short, long)]
        source: PathBuf,

        /// Project root (default: current directory)
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Stage a module and run the static checker without deploying
    Check {
        #[arg(short, long)]
        module: String,

        #[arg(short, long)]
        source: PathBuf,

        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Manage the local replica
    Replica {
        #[command(subcommand)]
        action: ReplicaAction,
    },

    /// Print the id of a deployed module
    Resolve {
        #[arg(short, long)]
        module: String,

        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Check that the toolchain and helpers are usable
    Doctor {
        /// Also repair the toolchain's support-library cache
        #[arg(long)]
        repair: bool,

        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}

#[derive(Subcommand)]
enum ReplicaAction {
    /// Start the replica (clean restart unless already running)
    Start {
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
    /// Stop the replica
    Stop {
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
    /// Probe the replica
    Status {
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    canship_core::telemetry::init_tracing(cli.json, level);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Deploy {
            ref module,
            ref source,
            ref root,
        } => cmd_deploy(config, module, source, root, cli.json).await,
        Commands::Check {
            ref module,
            ref source,
            ref root,
        } => cmd_check(config, module, source, root).await,
        Commands::Replica { ref action } => cmd_replica(config, action).await,
        Commands::Resolve {
            ref module,
            ref root,
        } => cmd_resolve(config, module, root).await,
        Commands::Doctor { repair, ref root } => cmd_doctor(config, repair, root).await,
    }
}

/// Config file (if any) with command-line overrides applied on top.
fn load_config(cli: &Cli) -> Result<DeployConfig> {
    let mut config = match &cli.config {
        Some(path) => DeployConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => DeployConfig::default(),
    };
    if let Some(binary) = &cli.toolchain {
        config.toolchain.binary = Some(binary.clone());
    }
    if let Some(port) = cli.port {
        config.replica.port = port;
    }
    if let Some(preset) = cli.profile {
        config.toolchain.profile = preset.profile();
    }
    if let Some(url) = &cli.codegen_url {
        config
            .codegen
            .get_or_insert_with(CodeGenConfig::default)
            .endpoint = url.clone();
    }
    Ok(config)
}

fn build_orchestrator(config: DeployConfig) -> Result<DeploymentOrchestrator> {
    let toolchain = CliToolchain::resolve(
        config.toolchain.binary.as_deref(),
        config.toolchain.profile.clone(),
    )?;
    info!(binary = %toolchain.binary(), "using toolchain");

    let codegen = match &config.codegen {
        Some(codegen) => {
            let service = HttpCodeGenService::new(codegen.clone())
                .context("failed to build code generation client")?;
            Some(Arc::new(service) as Arc<dyn CodeGenService>)
        }
        None => None,
    };

    Ok(DeploymentOrchestrator::new(
        config,
        Arc::new(toolchain),
        Arc::new(LsofInspector),
        codegen,
    ))
}

fn read_request(module: &str, source: &Path, root: &Path) -> Result<DeploymentRequest> {
    let artifact = std::fs::read_to_string(source)
        .with_context(|| format!("failed to read source artifact {}", source.display()))?;
    Ok(DeploymentRequest::new(module, artifact, root)?)
}

async fn cmd_deploy(
    config: DeployConfig,
    module: &str,
    source: &Path,
    root: &Path,
    json: bool,
) -> Result<()> {
    let request = read_request(module, source, root)?;
    let orchestrator = build_orchestrator(config)?;

    let result = orchestrator.deploy(&request).await;
    METRICS.flush();
    let outcome = result.with_context(|| format!("deployment of `{module}` failed"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(module, &outcome);
    }
    Ok(())
}

fn print_outcome(module: &str, outcome: &DeploymentOutcome) {
    println!("Deployed {} ({})", module, outcome.action);
    println!("  id: {}", outcome.module_id);
    if let Some(log) = &outcome.recovery {
        let tiers: Vec<_> = log.attempts.iter().map(|a| a.tier.to_string()).collect();
        println!("  recovery: {}", tiers.join(" -> "));
        println!("  recovery log: {}", log.run_id);
    }
    if outcome.degraded {
        println!("  warning: the minimal fallback module was deployed instead of the submitted source");
    }
}

async fn cmd_check(config: DeployConfig, module: &str, source: &Path, root: &Path) -> Result<()> {
    let request = read_request(module, source, root)?;
    let orchestrator = build_orchestrator(config)?;

    let result = orchestrator.check(&request).await?;
    if result.passed {
        println!("{module}: ok");
        Ok(())
    } else {
        eprintln!("{}", result.diagnostic());
        bail!("{module}: static check failed")
    }
}

async fn cmd_replica(config: DeployConfig, action: &ReplicaAction) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let replica = orchestrator.replica();

    match action {
        ReplicaAction::Start { root } => {
            let endpoint = replica.ensure_running(root, replica.default_port()).await?;
            println!("replica running at {}", endpoint.url());
        }
        ReplicaAction::Stop { root } => {
            replica.stop(root).await?;
            println!("replica stopped");
        }
        ReplicaAction::Status { root } => {
            let endpoint = replica.status(root).await?;
            println!("{:?} {}", endpoint.state, endpoint.url());
        }
    }
    Ok(())
}

async fn cmd_resolve(config: DeployConfig, module: &str, root: &Path) -> Result<()> {
    canship_core::request::validate_module_name(module)?;
    let orchestrator = build_orchestrator(config)?;

    let record = orchestrator.registry().resolve(module, root).await?;
    match record.existing_id {
        Some(id) => {
            println!("{id}");
            Ok(())
        }
        None => bail!("module `{module}` is not deployed"),
    }
}

async fn cmd_doctor(config: DeployConfig, repair: bool, root: &Path) -> Result<()> {
    println!("canship environment");
    println!("===================");

    let profile = config.toolchain.profile.clone();
    let toolchain = match CliToolchain::resolve(config.toolchain.binary.as_deref(), profile.clone()) {
        Ok(toolchain) => toolchain,
        Err(e) => {
            println!("toolchain: missing ({e})");
            bail!("toolchain not found");
        }
    };
    let binary = toolchain.binary();
    println!("toolchain: {binary}");

    let available = toolchain_env::is_toolchain_available(binary, &profile).await;
    println!("toolchain runnable: {}", if available { "yes" } else { "no" });

    let lsof = toolchain_env::binary::find_in("lsof", &toolchain_env::search_dirs());
    println!(
        "lsof: {}",
        lsof.map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not found; port conflicts cannot be resolved)".to_string())
    );

    println!(
        "replica: {}:{}",
        config.replica.host, config.replica.port
    );
    match &config.codegen {
        Some(codegen) => {
            println!("codegen endpoint: {}", codegen.endpoint);
            if let Some(var) = &codegen.api_key_env {
                let set = std::env::var(var).is_ok();
                println!("  {var}: {}", if set { "(set)" } else { "(not set)" });
            }
        }
        None => println!("codegen endpoint: (not configured)"),
    }

    if repair {
        let workspace = workspace_dir(root);
        std::fs::create_dir_all(&workspace)
            .with_context(|| format!("failed to create {}", workspace.display()))?;
        let out = toolchain_env::repair_support_libraries(binary, &profile, &workspace).await?;
        if !out.success() {
            eprintln!("{}", out.combined());
            bail!("support library repair failed");
        }
        println!("support libraries repaired");
    }

    if !available {
        bail!("toolchain is not runnable");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canship.json");
        std::fs::write(&path, r#"{"replica":{"port":9000,"poll_attempts":3}}"#).unwrap();

        let cli = Cli::try_parse_from([
            "canship",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9100",
            "--codegen-url",
            "http://localhost:7000/gen",
            "resolve",
            "--module",
            "Echo",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();

        assert_eq!(config.replica.port, 9100);
        assert_eq!(config.replica.poll_attempts, 3);
        assert_eq!(
            config.codegen.map(|c| c.endpoint).as_deref(),
            Some("http://localhost:7000/gen")
        );
    }

    #[test]
    fn test_profile_defaults_to_dfx_layout() {
        let cli = Cli::try_parse_from(["canship", "resolve", "--module", "Echo"]).unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.toolchain.profile, ToolchainProfile::dfx());
        assert_eq!(config.toolchain.profile.config_file, "dfx.json");
    }

    #[test]
    fn test_profile_flag_selects_preset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canship.json");
        std::fs::write(&path, r#"{"toolchain":{"profile":{"source_file":"app.mo"}}}"#).unwrap();

        let from_file = Cli::try_parse_from([
            "canship",
            "--config",
            path.to_str().unwrap(),
            "resolve",
            "--module",
            "Echo",
        ])
        .unwrap();
        assert_eq!(load_config(&from_file).unwrap().toolchain.profile.source_file, "app.mo");

        let generic = Cli::try_parse_from([
            "canship",
            "--config",
            path.to_str().unwrap(),
            "--profile",
            "generic",
            "resolve",
            "--module",
            "Echo",
        ])
        .unwrap();
        assert_eq!(generic.profile, Some(ProfilePreset::Generic));
        let config = load_config(&generic).unwrap();
        assert_eq!(config.toolchain.profile, ToolchainProfile::default());
        assert_eq!(config.toolchain.profile.source_file, "module.src");
    }

    #[test]
    fn test_replica_subcommands_parse() {
        for action in ["start", "stop", "status"] {
            let cli = Cli::try_parse_from(["canship", "replica", action, "--root", "/tmp/p"]);
            assert!(cli.is_ok(), "{action}");
        }
    }

    #[test]
    fn test_missing_source_file_is_reported() {
        let err = read_request("Echo", Path::new("/no/such/file.mo"), Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("failed to read source artifact"));
    }
}
