//! Exec establishes a one-shot command stream inside a running pod and waits for it to exit.

use std::pin::Pin;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{instrument, warn};

use crate::{Error, Result};

/// ExecRequest describes a single command to run inside a container.
pub struct ExecRequest<'a> {
    /// Namespace the target pod lives in.
    pub namespace: &'a str,
    /// Pod is the name of the target pod.
    pub pod: &'a str,
    /// Container selects a container by name; `None` uses the pod's default container.
    pub container: Option<&'a str>,
    /// Argv is the command and its arguments, passed through uninterpreted.
    pub argv: Vec<String>,
    /// Stdin, if set, is streamed to the remote command's standard input and then closed.
    pub stdin: Option<Pin<Box<dyn AsyncRead + Send>>>,
    /// CaptureStdout requests the remote command's stdout be collected and returned.
    pub capture_stdout: bool,
    /// CaptureStderr requests the remote command's stderr be collected and returned.
    pub capture_stderr: bool,
}

/// ExecOutcome is the result of a completed exec.
#[derive(Debug, Default)]
pub struct ExecOutcome {
    /// Stdout holds the collected standard output, if requested.
    pub stdout: Vec<u8>,
    /// Stderr holds the collected standard error, if requested.
    pub stderr: Vec<u8>,
    /// Success reports whether the remote command exited zero. Exec implementations that never
    /// surface a status object are treated as successful once the stream closes cleanly.
    pub success: bool,
}

/// ExecChannel runs commands inside pods over the cluster's exec subresource.
#[derive(Clone)]
pub struct ExecChannel {
    client: Client,
}

impl ExecChannel {
    /// New wraps a configured client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Run establishes the exec stream, pumps stdin/stdout/stderr to completion, and blocks
    /// until the remote command exits.
    #[instrument(skip(self, req), fields(namespace = req.namespace, pod = req.pod, argv = ?req.argv))]
    pub async fn run(&self, req: ExecRequest<'_>) -> Result<ExecOutcome> {
        let ExecRequest {
            namespace,
            pod,
            container,
            argv,
            stdin,
            capture_stdout,
            capture_stderr,
        } = req;

        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let ap = AttachParams {
            container: container.map(str::to_string),
            stdin: stdin.is_some(),
            stdout: capture_stdout,
            stderr: capture_stderr,
            ..AttachParams::default()
        };

        let mut proc = api.exec(pod, argv, &ap).await?;

        let status_fut = proc.take_status();

        let stdin_task = match (stdin, proc.stdin()) {
            (Some(mut reader), Some(mut writer)) => Some(tokio::spawn(async move {
                if let Err(err) = tokio::io::copy(&mut reader, &mut writer).await {
                    warn!(%err, "writing exec stdin");
                }
                let _ = writer.shutdown().await;
            })),
            _ => None,
        };
        let stdout_task = proc.stdout().map(|mut reader| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = reader.read_to_end(&mut buf).await;
                buf
            })
        });
        let stderr_task = proc.stderr().map(|mut reader| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = reader.read_to_end(&mut buf).await;
                buf
            })
        });

        let status = if let Some(status_fut) = status_fut {
            let (join_result, status) = tokio::join!(proc.join(), status_fut);
            join_result.map_err(|err| Error::Attach(err.to_string()))?;
            status
        } else {
            proc.join().await.map_err(|err| Error::Attach(err.to_string()))?;
            None
        };

        if let Some(task) = stdin_task {
            let _ = task.await;
        }
        let stdout = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        let success = status_indicates_success(status.as_ref());

        Ok(ExecOutcome {
            stdout,
            stderr,
            success,
        })
    }
}

/// StatusIndicatesSuccess reads the exec subresource's terminal status object. A command whose
/// stream closes without ever sending a status (some runtimes omit it for a clean exit) is
/// treated as successful.
fn status_indicates_success(status: Option<&k8s_openapi::apimachinery::pkg::apis::meta::v1::Status>) -> bool {
    status
        .and_then(|s| s.status.as_deref())
        .is_none_or(|s| s == "Success")
}
