//! Extract streams a tar archive into a running container via the exec channel.

use std::pin::Pin;

use tokio::io::AsyncRead;
use tracing::instrument;

use crate::exec::{ExecChannel, ExecRequest};
use crate::{Error, Result};

/// TarExtractor unpacks an archive into a container's filesystem, one command at a time: first
/// `mkdir -p` the target path, then stream the archive through `tar xf -`.
pub struct TarExtractor<'a> {
    channel: &'a ExecChannel,
    namespace: &'a str,
    pod: &'a str,
    container: &'a str,
}

impl<'a> TarExtractor<'a> {
    /// New targets a single container of a single pod.
    pub fn new(channel: &'a ExecChannel, namespace: &'a str, pod: &'a str, container: &'a str) -> Self {
        Self {
            channel,
            namespace,
            pod,
            container,
        }
    }

    /// Extract creates `target_path` inside the container and unpacks `archive` into it.
    /// `--no-same-owner` keeps extracted files owned by the container's runtime user rather
    /// than whatever uid/gid the archive recorded.
    #[instrument(skip(self, archive), fields(namespace = self.namespace, pod = self.pod, container = self.container, target_path))]
    pub async fn extract(
        &self,
        target_path: &str,
        archive: Pin<Box<dyn AsyncRead + Send>>,
    ) -> Result<()> {
        let mkdir = self
            .channel
            .run(ExecRequest {
                namespace: self.namespace,
                pod: self.pod,
                container: Some(self.container),
                argv: mkdir_argv(target_path),
                stdin: None,
                capture_stdout: false,
                capture_stderr: true,
            })
            .await?;
        if !mkdir.success {
            return Err(Error::CommandFailed(format!(
                "mkdir -p {target_path}: {}",
                String::from_utf8_lossy(&mkdir.stderr)
            )));
        }

        let untar = self
            .channel
            .run(ExecRequest {
                namespace: self.namespace,
                pod: self.pod,
                container: Some(self.container),
                argv: untar_argv(target_path),
                stdin: Some(archive),
                capture_stdout: false,
                capture_stderr: true,
            })
            .await?;
        if !untar.success {
            return Err(Error::CommandFailed(format!(
                "tar xf - -C {target_path} --no-same-owner: {}",
                String::from_utf8_lossy(&untar.stderr)
            )));
        }

        Ok(())
    }
}

fn mkdir_argv(target_path: &str) -> Vec<String> {
    vec!["mkdir".to_string(), "-p".to_string(), target_path.to_string()]
}

fn untar_argv(target_path: &str) -> Vec<String> {
    vec![
        "tar".to_string(),
        "xf".to_string(),
        "-".to_string(),
        "-C".to_string(),
        target_path.to_string(),
        "--no-same-owner".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    // The exec channel itself needs a live apiserver's websocket upgrade to exercise end to
    // end, so these cover the remote shell contract the reconciler depends on: the exact
    // argv built for each half of an extraction.
    #[test]
    fn mkdir_argv_matches_the_remote_shell_contract() {
        assert_eq!(
            mkdir_argv("/projects"),
            vec!["mkdir", "-p", "/projects"]
        );
    }

    #[test]
    fn untar_argv_matches_the_remote_shell_contract() {
        assert_eq!(
            untar_argv("/projects"),
            vec!["tar", "xf", "-", "-C", "/projects", "--no-same-owner"]
        );
    }
}
