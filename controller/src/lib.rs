#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

//! Controller implements the devfile-sync reconciliation engine: a record store, a spec watcher,
//! a deployment synthesizer, an inline-manifest applier, a service-binding gate, and the
//! level-triggered reconciler that ties all of it together for a single namespaced component.

use std::sync::LazyLock;

use kube::api::{PatchParams, PostParams};
use tokio_util::sync::CancellationToken;

pub mod binding;
pub mod inline;
pub mod orchestrator;
pub mod reconcile;
pub mod records;
pub mod synth;
pub mod watch;

#[cfg(test)]
pub mod testing;

/// Prelude is the common set of imports shared by this crate's modules.
pub(crate) mod prelude {
    pub use std::sync::Arc;

    pub use futures::prelude::*;
    pub use k8s_openapi::api::{apps, core};
    pub use kube::{
        api::{Api, Patch, PatchParams, PostParams},
        runtime::controller::Action,
        Resource, ResourceExt,
    };
    pub use tokio_util::sync::CancellationToken;
    pub use tracing::{debug, error, info, instrument, trace, warn};

    pub use super::{Context, Error, Result};
    pub use super::{CONTROLLER_NAME, CREATE_PARAMS, FIELD_MANAGER, PATCH_PARAMS};
}

/// Error is the set of failures the devfile-sync engine can surface.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Kube is a generic error from the `kube` crate.
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    /// KubeConfig indicates the process was unable to find a kubeconfig.
    #[error("kubeconfig error: {0}")]
    KubeConfig(#[from] kube::config::InferConfigError),
    /// Devfile indicates the Devfile failed to parse or validate.
    #[error("devfile error: {0}")]
    Devfile(#[from] devfile::Error),
    /// Syncfs indicates the local filesystem side of the sync loop failed.
    #[error("syncfs error: {0}")]
    Syncfs(#[from] syncfs::Error),
    /// Podexec indicates a pod exec or tar extraction failed.
    #[error("podexec error: {0}")]
    Podexec(#[from] podexec::Error),
    /// Io indicates an OS-level I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Yaml indicates a YAML (de)serialization failed.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// Json indicates a JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// TracingConfig indicates the error came from the tracing setup.
    #[error("tracing_subscriber error: {0}")]
    TracingConfig(#[from] tracing_subscriber::filter::ParseError),
    /// Tracing indicates the error came from installing the tracing subscriber.
    #[error("tracing error: {0}")]
    Tracing(#[from] tracing::subscriber::SetGlobalDefaultError),
    /// AddrParse indicates the provided string failed to parse into an address.
    #[error("parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    /// Join indicates a background task panicked or was cancelled.
    #[error("background task error: {0}")]
    Join(#[from] tokio::task::JoinError),
    /// MissingField indicates a spec or status record was missing an expected key.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    /// NeverAvailable indicates a deployment never reported an available replica.
    #[error("deployment {0} never reported available replicas")]
    NeverAvailable(String),
    /// NoRunningPod indicates no pod for the component was observed Running.
    #[error("no running pod found for component {0}")]
    NoRunningPod(String),
    /// AmbiguousPod indicates more than one Running pod was observed for the component.
    #[error("more than one running pod for component {0}")]
    AmbiguousPod(String),
    /// Other is a catch-all error.
    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Result is the typedef used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Context is shared, read-only state for the reconciler and the orchestrator. A single process
/// targets exactly one `(namespace, component)` pair, so both are fixed at startup.
pub struct Context {
    /// Client is the Kubernetes client. Safe to `clone()` out of the Context; cheap to share.
    pub client: kube::Client,
    /// Namespace is the namespace the spec/status records and derived objects live in.
    pub namespace: String,
    /// Component is the Devfile component name this process targets.
    pub component: String,
    /// DefaultImage is used for any container a Devfile declares without an explicit image.
    pub default_image: Option<String>,
    /// Cancel is the process-wide shutdown signal. The reconciler's run-command supervisor
    /// watches it to issue a stop rather than relying on an interrupted exec stream.
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("namespace", &self.namespace)
            .field("component", &self.component)
            .finish_non_exhaustive()
    }
}

/// FieldManager is the field-owner identifier used for every server-side apply.
pub const FIELD_MANAGER: &str = "ododev";

/// ControllerName is the name this process uses wherever a human-readable name is needed.
pub const CONTROLLER_NAME: &str = "odosync";

/// SpecRecordName is the fixed name of the spec record.
pub const SPEC_RECORD_NAME: &str = "devfile-spec";
/// StatusRecordName is the fixed name of the status record.
pub const STATUS_RECORD_NAME: &str = "devfile-status";
/// SpecLabel is the label key carrying the target component on the spec record.
pub const SPEC_LABEL: &str = "devfile-spec";
/// StatusLabel is the label key carrying the target component on the status record.
pub const STATUS_LABEL: &str = "devfile-status";
/// ComponentLabel selects the deployment and its pods.
pub const COMPONENT_LABEL: &str = "component";

/// CreateParams is the default params for object creation.
pub static CREATE_PARAMS: LazyLock<PostParams> = LazyLock::new(|| PostParams {
    dry_run: false,
    field_manager: Some(String::from(FIELD_MANAGER)),
});

/// PatchParams is the default params for a forced server-side apply.
pub static PATCH_PARAMS: LazyLock<PatchParams> =
    LazyLock::new(|| PatchParams::apply(FIELD_MANAGER).force());
