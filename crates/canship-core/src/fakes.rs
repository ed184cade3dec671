//! In-memory fakes for the toolchain, port inspector and code generation
//! seams (testing only).
//!
//! `FakeToolchain` simulates a replica per workspace, issues module ids on
//! install and runs an optional checker closure for static checks. With
//! [`FakeToolchain::binding_ports`] each replica holds a real listener on its
//! port and the fake doubles as the [`PortInspector`] that owns them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use toolchain_env::{CommandOutput, ToolchainCommand, ToolchainProfile};

use crate::codegen::{CodeGenError, CodeGenService};
use crate::error::{DeployError, Result};
use crate::port::PortInspector;
use crate::toolchain::Toolchain;

// ---------------------------------------------------------------------------
// FakeToolchain
// ---------------------------------------------------------------------------

/// What a fake static check sees.
pub struct CheckContext<'a> {
    pub module: &'a str,
    pub source: &'a str,
    /// A `RepairEnvironment` command has succeeded on this toolchain.
    pub environment_repaired: bool,
}

type Checker = Box<dyn Fn(&CheckContext<'_>) -> std::result::Result<(), String> + Send + Sync>;

#[derive(Default)]
struct ToolchainState {
    calls: Vec<ToolchainCommand>,
    running: HashSet<PathBuf>,
    ping_failures: u32,
    ids: HashMap<(PathBuf, String), String>,
    issued: u32,
    environment_repaired: bool,
    listeners: Vec<ReplicaProcess>,
    next_pid: u32,
}

/// A simulated replica holding its port.
struct ReplicaProcess {
    pid: u32,
    workspace: PathBuf,
    listener: std::net::TcpListener,
}

#[derive(Default)]
pub struct FakeToolchain {
    profile: ToolchainProfile,
    checker: Option<Checker>,
    unavailable: bool,
    failing_install: bool,
    install_loses_id: bool,
    failing_repair: bool,
    failing_start: bool,
    binding_ports: bool,
    state: Mutex<ToolchainState>,
}

impl FakeToolchain {
    /// Every command succeeds and every artifact passes the check.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn(&CheckContext<'_>) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.checker = Some(Box::new(checker));
        self
    }

    /// Liveness probes fail `n` times after the replica starts.
    pub fn with_ping_failures(self, n: u32) -> Self {
        self.state.lock().unwrap().ping_failures = n;
        self
    }

    /// Every command fails as if the binary were missing.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn failing_install(mut self) -> Self {
        self.failing_install = true;
        self
    }

    /// Install exits 0 but no id becomes resolvable.
    pub fn install_loses_id(mut self) -> Self {
        self.install_loses_id = true;
        self
    }

    pub fn failing_repair(mut self) -> Self {
        self.failing_repair = true;
        self
    }

    /// The start command exits non-zero without starting anything.
    pub fn failing_start(mut self) -> Self {
        self.failing_start = true;
        self
    }

    /// Started replicas bind `host:port` for real. Use the same instance as
    /// the orchestrator's [`PortInspector`] so a conflicting start can
    /// terminate the replica that holds the port.
    pub fn binding_ports(mut self) -> Self {
        self.binding_ports = true;
        self
    }

    /// Pretend `module` was deployed earlier from `workspace`.
    pub fn seed_id(&self, workspace: &Path, module: &str, id: &str) {
        std::fs::create_dir_all(workspace).unwrap();
        self.state
            .lock()
            .unwrap()
            .ids
            .insert((same_dir(workspace), module.to_string()), id.to_string());
    }

    pub fn calls(&self) -> Vec<ToolchainCommand> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of recorded calls of the given [`ToolchainCommand::kind`].
    pub fn count(&self, kind: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.kind() == kind)
            .count()
    }

    fn check(&self, state: &ToolchainState, workspace: &Path, module: &str, source: &Path) -> CommandOutput {
        let path = if source.is_absolute() {
            source.to_path_buf()
        } else {
            workspace.join(source)
        };
        let Ok(text) = std::fs::read_to_string(&path) else {
            return CommandOutput::new(1, "", format!("file not found: {}", path.display()));
        };
        let verdict = match &self.checker {
            Some(checker) => checker(&CheckContext {
                module,
                source: &text,
                environment_repaired: state.environment_repaired,
            }),
            None => Ok(()),
        };
        match verdict {
            Ok(()) => CommandOutput::new(0, "", ""),
            Err(diagnostic) => CommandOutput::new(1, "", diagnostic),
        }
    }
}

/// One key per directory however the path is spelled.
fn same_dir(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn start_replica(
    state: &mut ToolchainState,
    workspace: &Path,
    host: &str,
    port: u16,
    bind: bool,
) -> CommandOutput {
    if bind {
        let listener = match std::net::TcpListener::bind((host, port)) {
            Ok(listener) => listener,
            Err(e) => return CommandOutput::new(1, "", format!("Error: failed to bind {host}:{port}: {e}")),
        };
        state.next_pid += 1;
        state.listeners.push(ReplicaProcess {
            pid: 50_000 + state.next_pid,
            workspace: workspace.to_path_buf(),
            listener,
        });
    }
    state.running.insert(workspace.to_path_buf());
    CommandOutput::new(0, "replica started\n", "")
}

#[async_trait]
impl Toolchain for FakeToolchain {
    async fn run(&self, workspace: &Path, command: &ToolchainCommand) -> Result<CommandOutput> {
        let workspace = same_dir(workspace);
        let workspace = workspace.as_path();
        let mut state = self.state.lock().unwrap();
        state.calls.push(command.clone());
        if self.unavailable {
            return Err(DeployError::toolchain_absent("fake toolchain is unavailable"));
        }

        let out = match command {
            ToolchainCommand::Version => CommandOutput::new(0, "fake-toolchain 0.0.0\n", ""),

            ToolchainCommand::Check { module, source } => {
                self.check(&state, workspace, module, source)
            }

            ToolchainCommand::RepairEnvironment => {
                if self.failing_repair {
                    CommandOutput::new(1, "", "cache install failed")
                } else {
                    state.environment_repaired = true;
                    CommandOutput::new(0, "cache installed\n", "")
                }
            }

            ToolchainCommand::StartReplica { host, port } => {
                if self.failing_start {
                    CommandOutput::new(1, "", "Error: replica exited during startup")
                } else {
                    start_replica(&mut state, workspace, host, *port, self.binding_ports)
                }
            }

            ToolchainCommand::StopReplica => {
                state.listeners.retain(|p| p.workspace != workspace);
                if state.running.remove(workspace) {
                    CommandOutput::new(0, "replica stopped\n", "")
                } else {
                    CommandOutput::new(1, "", "no replica running")
                }
            }

            ToolchainCommand::Ping { .. } => {
                if !state.running.contains(workspace) {
                    CommandOutput::new(1, "", "connection refused")
                } else if state.ping_failures > 0 {
                    state.ping_failures -= 1;
                    CommandOutput::new(1, "", "replica not healthy yet")
                } else {
                    CommandOutput::new(0, "{\"replica_health_status\":\"healthy\"}\n", "")
                }
            }

            ToolchainCommand::Install { module } => {
                if !state.running.contains(workspace) {
                    CommandOutput::new(1, "", "replica not running")
                } else if self.failing_install {
                    CommandOutput::new(1, "", format!("Error: failed to install {module}"))
                } else {
                    state.issued += 1;
                    let id = format!("fake-{:04}-cai", state.issued);
                    if !self.install_loses_id {
                        state
                            .ids
                            .insert((workspace.to_path_buf(), module.clone()), id.clone());
                    }
                    CommandOutput::new(0, format!("Deployed {module} as {id}\n"), "")
                }
            }

            ToolchainCommand::Upgrade { module } => {
                let key = (workspace.to_path_buf(), module.clone());
                if !state.running.contains(workspace) {
                    CommandOutput::new(1, "", "replica not running")
                } else if state.ids.contains_key(&key) {
                    CommandOutput::new(0, format!("Upgraded {module}\n"), "")
                } else {
                    CommandOutput::new(1, "", format!("Cannot find canister id for {module}"))
                }
            }

            ToolchainCommand::ModuleId { module } => {
                match state.ids.get(&(workspace.to_path_buf(), module.clone())) {
                    Some(id) => CommandOutput::new(0, format!("{id}\n"), ""),
                    None => CommandOutput::new(1, "", format!("Cannot find canister id for {module}")),
                }
            }
        };
        Ok(out)
    }

    fn profile(&self) -> &ToolchainProfile {
        &self.profile
    }
}

#[async_trait]
impl PortInspector for FakeToolchain {
    async fn owner_pid(&self, port: u16) -> std::io::Result<Option<u32>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .listeners
            .iter()
            .find(|p| p.listener.local_addr().is_ok_and(|addr| addr.port() == port))
            .map(|p| p.pid))
    }

    async fn terminate(&self, pid: u32) -> std::io::Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(index) = state.listeners.iter().position(|p| p.pid == pid) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such process: {pid}"),
            ));
        };
        let process = state.listeners.remove(index);
        state.running.remove(&process.workspace);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakePortInspector
// ---------------------------------------------------------------------------

/// Port inspector that owns the "foreign" listener it reports.
#[derive(Debug, Default)]
pub struct FakePortInspector {
    held: Mutex<Option<(std::net::TcpListener, u32)>>,
    stubborn: bool,
    terminated: Mutex<Vec<u32>>,
}

impl FakePortInspector {
    /// Knows no owners.
    pub fn new() -> Self {
        Self::default()
    }

    /// `listener` is owned by `pid`; terminating `pid` closes it.
    pub fn holding(listener: std::net::TcpListener, pid: u32) -> Self {
        Self {
            held: Mutex::new(Some((listener, pid))),
            ..Self::default()
        }
    }

    /// Like [`holding`](Self::holding), but terminate never releases the port.
    pub fn stubborn(listener: std::net::TcpListener, pid: u32) -> Self {
        Self {
            stubborn: true,
            ..Self::holding(listener, pid)
        }
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.lock().unwrap().clone()
    }
}

#[async_trait]
impl PortInspector for FakePortInspector {
    async fn owner_pid(&self, port: u16) -> std::io::Result<Option<u32>> {
        let held = self.held.lock().unwrap();
        Ok(held.as_ref().and_then(|(listener, pid)| {
            let bound = listener.local_addr().ok()?.port();
            (bound == port).then_some(*pid)
        }))
    }

    async fn terminate(&self, pid: u32) -> std::io::Result<()> {
        self.terminated.lock().unwrap().push(pid);
        let mut held = self.held.lock().unwrap();
        if !self.stubborn && held.as_ref().is_some_and(|(_, owner)| *owner == pid) {
            held.take();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeCodeGen
// ---------------------------------------------------------------------------

/// Code generation service answering from a script and recording prompts.
#[derive(Debug, Default)]
pub struct FakeCodeGen {
    responses: Mutex<VecDeque<std::result::Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl FakeCodeGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, text: impl Into<String>) -> Self {
        self.responses.lock().unwrap().push_back(Ok(text.into()));
        self
    }

    pub fn fail(self, message: impl Into<String>) -> Self {
        self.responses.lock().unwrap().push_back(Err(message.into()));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeGenService for FakeCodeGen {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, CodeGenError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(CodeGenError::Other(message)),
            None => Err(CodeGenError::Other("no scripted response".to_string())),
        }
    }
}
