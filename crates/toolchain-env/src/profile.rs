//! Toolchain command profiles
//!
//! A profile maps every abstract toolchain operation to one or more argument
//! vectors for the resolved binary. Arguments may carry placeholders that are
//! substituted per invocation:
//!
//! | placeholder   | value                                   |
//! |---------------|-----------------------------------------|
//! | `{module}`    | module name                             |
//! | `{source}`    | staged module source path               |
//! | `{host}`      | replica bind host                       |
//! | `{port}`      | replica bind port                       |
//! | `{workspace}` | staged workspace directory              |

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Abstract operation against the toolchain CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ToolchainCommand {
    Version,
    Check { module: String, source: PathBuf },
    RepairEnvironment,
    StartReplica { host: String, port: u16 },
    StopReplica,
    Ping { host: String, port: u16 },
    Install { module: String },
    Upgrade { module: String },
    ModuleId { module: String },
}

impl ToolchainCommand {
    /// Stable name for logs and invocation accounting.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolchainCommand::Version => "version",
            ToolchainCommand::Check { .. } => "check",
            ToolchainCommand::RepairEnvironment => "repair_environment",
            ToolchainCommand::StartReplica { .. } => "start_replica",
            ToolchainCommand::StopReplica => "stop_replica",
            ToolchainCommand::Ping { .. } => "ping",
            ToolchainCommand::Install { .. } => "install",
            ToolchainCommand::Upgrade { .. } => "upgrade",
            ToolchainCommand::ModuleId { .. } => "module_id",
        }
    }
}

/// One argument vector, unrendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandLine(pub Vec<String>);

impl CommandLine {
    pub fn new<const N: usize>(args: [&str; N]) -> Self {
        Self(args.iter().map(|a| (*a).to_string()).collect())
    }

    /// Substitute placeholders.
    pub fn render(&self, vars: &TemplateVars) -> Vec<String> {
        self.0.iter().map(|arg| vars.apply(arg)).collect()
    }
}

/// Values available to placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    pub module: Option<String>,
    pub source: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub workspace: Option<PathBuf>,
}

impl TemplateVars {
    /// Placeholder values implied by a command plus the workspace it runs in.
    pub fn for_command(command: &ToolchainCommand, workspace: PathBuf) -> Self {
        let mut vars = TemplateVars {
            workspace: Some(workspace),
            ..TemplateVars::default()
        };
        match command {
            ToolchainCommand::Check { module, source } => {
                vars.module = Some(module.clone());
                vars.source = Some(source.clone());
            }
            ToolchainCommand::StartReplica { host, port } | ToolchainCommand::Ping { host, port } => {
                vars.host = Some(host.clone());
                vars.port = Some(*port);
            }
            ToolchainCommand::Install { module }
            | ToolchainCommand::Upgrade { module }
            | ToolchainCommand::ModuleId { module } => {
                vars.module = Some(module.clone());
            }
            ToolchainCommand::Version
            | ToolchainCommand::RepairEnvironment
            | ToolchainCommand::StopReplica => {}
        }
        vars
    }

    fn apply(&self, arg: &str) -> String {
        let mut out = arg.to_string();
        if let Some(module) = &self.module {
            out = out.replace("{module}", module);
        }
        if let Some(source) = &self.source {
            out = out.replace("{source}", &source.to_string_lossy());
        }
        if let Some(host) = &self.host {
            out = out.replace("{host}", host);
        }
        if let Some(port) = self.port {
            out = out.replace("{port}", &port.to_string());
        }
        if let Some(workspace) = &self.workspace {
            out = out.replace("{workspace}", &workspace.to_string_lossy());
        }
        out
    }
}

/// Argument templates and layout conventions of one toolchain CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainProfile {
    /// Binary name searched for when no explicit path is configured.
    pub binary_name: String,

    /// File name of the staged module source inside `src/<module>/`.
    pub source_file: String,

    /// File name of the build configuration inside the workspace.
    pub config_file: String,

    /// Module type recorded in the build configuration.
    pub module_kind: String,

    pub version: CommandLine,
    pub check: CommandLine,
    pub start_replica: CommandLine,
    pub stop_replica: CommandLine,
    pub ping: CommandLine,
    pub install: CommandLine,

    /// Upgrades build first, then install in upgrade mode.
    pub upgrade: Vec<CommandLine>,
    pub module_id: CommandLine,

    /// Support-library repair: toolchain upgrade followed by cache populate.
    pub repair_environment: Vec<CommandLine>,
}

impl Default for ToolchainProfile {
    fn default() -> Self {
        Self {
            binary_name: "dfx".to_string(),
            source_file: "module.src".to_string(),
            config_file: "config.json".to_string(),
            module_kind: "motoko".to_string(),
            version: CommandLine::new(["--version"]),
            check: CommandLine::new(["build", "--check", "{module}"]),
            start_replica: CommandLine::new([
                "start",
                "--clean",
                "--background",
                "--host",
                "{host}:{port}",
            ]),
            stop_replica: CommandLine::new(["stop"]),
            ping: CommandLine::new(["ping", "http://{host}:{port}"]),
            install: CommandLine::new(["deploy", "{module}", "--yes"]),
            upgrade: vec![
                CommandLine::new(["build", "{module}"]),
                CommandLine::new(["canister", "install", "{module}", "--mode", "upgrade", "--yes"]),
            ],
            module_id: CommandLine::new(["canister", "id", "{module}"]),
            repair_environment: vec![
                CommandLine::new(["upgrade"]),
                CommandLine::new(["cache", "install"]),
            ],
        }
    }
}

impl ToolchainProfile {
    /// The default command set with the file names a stock `dfx` expects.
    pub fn dfx() -> Self {
        Self {
            source_file: "main.mo".to_string(),
            config_file: "dfx.json".to_string(),
            ..Self::default()
        }
    }

    /// Rendered argument vectors for `command`, in execution order.
    pub fn steps(&self, command: &ToolchainCommand, vars: &TemplateVars) -> Vec<Vec<String>> {
        let lines: Vec<&CommandLine> = match command {
            ToolchainCommand::Version => vec![&self.version],
            ToolchainCommand::Check { .. } => vec![&self.check],
            ToolchainCommand::RepairEnvironment => self.repair_environment.iter().collect(),
            ToolchainCommand::StartReplica { .. } => vec![&self.start_replica],
            ToolchainCommand::StopReplica => vec![&self.stop_replica],
            ToolchainCommand::Ping { .. } => vec![&self.ping],
            ToolchainCommand::Install { .. } => vec![&self.install],
            ToolchainCommand::Upgrade { .. } => self.upgrade.iter().collect(),
            ToolchainCommand::ModuleId { .. } => vec![&self.module_id],
        };
        lines
            .into_iter()
            .filter(|line| !line.0.is_empty())
            .map(|line| line.render(vars))
            .collect()
    }
}
