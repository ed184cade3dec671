//! canship core library
//!
//! Stages a generated smart-contract module into a project workspace,
//! keeps a local replica running, validates and (when needed) repairs the
//! artifact, then installs or upgrades it and reports the module id.

pub mod codegen;
pub mod config;
pub mod digest;
pub mod error;
pub mod fakes;
pub mod materializer;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod port;
pub mod recovery;
pub mod registry;
pub mod replica;
pub mod request;
pub mod telemetry;
pub mod toolchain;
pub mod validator;

pub use codegen::{CodeGenError, CodeGenService, HttpCodeGenService};
pub use config::{
    CodeGenConfig, DeployConfig, PortSettings, RecoverySettings, ReplicaSettings,
    ToolchainSettings, DEFAULT_REPLICA_HOST, DEFAULT_REPLICA_PORT,
};
pub use error::{DeployError, Result, TOOLCHAIN_HINT};
pub use materializer::{
    read_artifact, staged_digest, workspace_dir, write_artifact, BuildConfig, ProjectMaterializer,
    StagedProject, WORKSPACE_DIR,
};
pub use orchestrator::{DeployPhase, DeploymentOrchestrator};
pub use port::{LsofInspector, PortInspector, PortProbe, ReplicaPortManager};
pub use recovery::catalog::LibraryCatalog;
pub use recovery::{
    read_recovery_artifact, recovery_dir, write_recovery_artifact, RecoveryLog, RecoveryPipeline,
    RecoveryReport, RecoveryRoute, RecoveryTier, TierAttempt,
};
pub use registry::{ModuleRecord, ModuleRegistry};
pub use replica::{ReplicaEndpoint, ReplicaLifecycle, ReplicaState};
pub use request::{DeployAction, DeploymentOutcome, DeploymentRequest};
pub use toolchain::{CliToolchain, Toolchain};
pub use validator::{ArtifactValidator, ValidationResult};

pub use toolchain_env::{CommandOutput, ToolchainCommand, ToolchainProfile};
