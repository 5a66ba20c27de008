//! Podexec runs commands inside a running container and streams tar archives into it.
//!
//! The wire protocol (WebSocket-framed exec, SPDY negotiation, port-forwarding) is handled
//! entirely by the `kube` client; this crate only shapes the requests the reconciler needs:
//! a one-shot command exec and a tar-to-container extraction built on top of it.

pub mod exec;
pub mod extract;

pub use exec::{ExecChannel, ExecOutcome, ExecRequest};
pub use extract::TarExtractor;

/// Error is the set of failures a pod exec or extraction can surface.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Kube indicates the API call to establish the exec stream failed.
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    /// Attach indicates the exec stream itself failed after being established. The underlying
    /// type is private to the `kube` client, so it is carried here as a rendered string.
    #[error("exec stream error: {0}")]
    Attach(String),
    /// CommandFailed indicates the remote command exited with a non-zero status.
    #[error("remote command exited non-zero: {0}")]
    CommandFailed(String),
}

/// Result is the typedef used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
