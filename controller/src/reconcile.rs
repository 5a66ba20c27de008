//! Reconcile implements the level-triggered state machine: one pass per spec-record or
//! deployment change, advancing `status.status` and, on entering `PodRunning` with a fresh
//! archive, driving the file sync, build, and run sequence inside the component's pod.

use std::pin::Pin;
use std::time::Duration;

use devfile::{CommandGroupKind, Devfile};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{Api, ListParams, Patch};
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::{Resource, ResourceExt};
use podexec::{ExecChannel, ExecRequest, TarExtractor};
use tracing::{info, instrument, warn};

use crate::{
    binding, inline, records, synth, Context, Error, Result, COMPONENT_LABEL, PATCH_PARAMS,
    SPEC_RECORD_NAME,
};

/// PidFile is where the run command's pid is recorded inside the container, per the contract the
/// stop snippet depends on.
const PID_FILE: &str = "/tmp/odo_command.pid";

/// StateName renders a resolved reconcile-pass outcome as the status tag written to the cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StateName {
    WaitDeployment,
    WaitBindings,
    PodRunning,
}

impl StateName {
    fn as_str(self) -> &'static str {
        match self {
            StateName::WaitDeployment => "WaitDeployment",
            StateName::WaitBindings => "WaitBindings",
            StateName::PodRunning => "PodRunning",
        }
    }
}

/// ObservedState resolves the coarse deployment-readiness state from the three cluster facts the
/// reconciler fetches each pass. Kept pure and separate from its callers so the state table in
/// spec is directly testable.
fn observed_state(
    available_replicas: i32,
    bindings_ready: bool,
    running_pods: &[Pod],
    component: &str,
) -> Result<StateName> {
    if available_replicas < 1 {
        return Ok(StateName::WaitDeployment);
    }
    if !bindings_ready {
        return Ok(StateName::WaitBindings);
    }
    match running_pods.len() {
        0 => Err(Error::NoRunningPod(component.to_string())),
        1 => Ok(StateName::PodRunning),
        _ => Err(Error::AmbiguousPod(component.to_string())),
    }
}

/// BuildOrRunArgv renders the remote shell contract shared by the build and run command
/// invocations: record the shell's own pid, then run the command line in `target_path`,
/// redirecting its output to the pod's pid 1 so it survives after the shell returns.
fn build_or_run_argv(target_path: &str, command_line: &str) -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!(
            "echo $$ > {PID_FILE}; (cd {target_path} && {command_line}) > /proc/1/fd/1 2> /proc/1/fd/2"
        ),
    ]
}

/// StopCommandArgv renders the shell snippet that kills every descendant of the recorded pid and
/// clears the pid file, used to stop a supervised run command.
fn stop_command_argv() -> Vec<String> {
    let snippet = format!(
        "PID=$(cat {PID_FILE} 2>/dev/null); \
         if [ -n \"$PID\" ]; then \
           while [ -n \"$(ls /proc/$PID/task/$PID/children 2>/dev/null)\" ]; do \
             for child in $(cat /proc/$PID/task/$PID/children 2>/dev/null); do kill \"$child\" 2>/dev/null; done; \
             sleep 0.1; \
           done; \
         fi; \
         rm -f {PID_FILE}"
    );
    vec!["/bin/sh".to_string(), "-c".to_string(), snippet]
}

/// SourceMountPath picks the in-container path the archive is extracted into: the
/// `sourceMapping` of the first container with `mountSources: true`, defaulting to `/projects`.
fn source_mount_path(devfile: &Devfile) -> String {
    devfile
        .containers()
        .find(|(_, cc)| cc.mount_sources)
        .and_then(|(_, cc)| cc.source_mapping.clone())
        .unwrap_or_else(|| "/projects".to_string())
}

/// Controller builds the kube-runtime controller over the spec record, scoped to the single
/// `devfile-spec` record this process targets, and reconciling on changes to the derived
/// deployment too.
pub fn controller(ctx: std::sync::Arc<Context>) -> impl futures::Future<Output = ()> {
    let spec_api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let deploy_api: Api<Deployment> = Api::namespaced(ctx.client.clone(), &ctx.namespace);

    let spec_watch = watcher::Config::default().fields(&format!("metadata.name={SPEC_RECORD_NAME}"));
    let deploy_watch = watcher::Config::default().labels(&format!("{COMPONENT_LABEL}={}", ctx.component));

    let cancel = ctx.cancel.clone();
    Controller::new(spec_api, spec_watch)
        .owns(deploy_api, deploy_watch)
        .graceful_shutdown_on(cancel.cancelled_owned())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!(?o, "reconciled"),
                Err(err) => warn!(%err, "reconcile failed"),
            }
        })
}

fn error_policy(_cm: std::sync::Arc<ConfigMap>, err: &Error, _ctx: std::sync::Arc<Context>) -> Action {
    warn!(%err, "reconcile error, requeuing");
    Action::requeue(Duration::from_secs(5))
}

#[instrument(skip_all)]
async fn reconcile(
    _cm: std::sync::Arc<ConfigMap>,
    ctx: std::sync::Arc<Context>,
) -> Result<Action> {
    let spec_api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let Some(cm) = spec_api.get_opt(SPEC_RECORD_NAME).await? else {
        return Ok(Action::await_change());
    };

    let parsed = records::read_spec(&cm)?;
    let owner = records::owner_ref(&cm)?;

    inline::apply_inline_components(&ctx.client, &ctx.namespace, &parsed.devfile, &owner).await?;

    let deployment_name = format!("{}-app", ctx.component);
    let mut deployment = synth::synthesize(&deployment_name, &ctx.component, &parsed.devfile, ctx.default_image.as_deref());
    deployment.metadata.owner_references = Some(vec![owner.clone()]);

    let deploy_api: Api<Deployment> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let applied = deploy_api
        .patch(&deployment_name, &PATCH_PARAMS, &Patch::Apply(&deployment))
        .await?;
    let observed = deploy_api.get(&deployment_name).await?;
    if observed.meta().generation < applied.meta().generation {
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let available = observed
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    let bindings_ready = binding::all_injected(&ctx.client, &ctx.namespace, &deployment_name).await?;

    let pod_api: Api<Pod> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let pods = pod_api
        .list(&ListParams::default().labels(&format!("{COMPONENT_LABEL}={}", ctx.component)))
        .await?;
    let running_pods: Vec<Pod> = pods
        .items
        .into_iter()
        .filter(|p| p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running"))
        .collect();

    let state = observed_state(available, bindings_ready, &running_pods, &ctx.component)?;
    records::set_status(&ctx.client, &ctx.namespace, &ctx.component, owner.clone(), state.as_str(), None).await?;

    if state == StateName::PodRunning {
        sync_if_needed(&ctx, &parsed, &owner, &running_pods[0]).await?;
    }

    Ok(Action::await_change())
}

/// SyncIfNeeded runs the file-sync/build/run sequence when the spec record's mod-time token is
/// strictly newer than the last synced one, per the reconciler's fencing rule.
async fn sync_if_needed(
    ctx: &Context,
    parsed: &records::ParsedSpec,
    owner: &k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference,
    pod: &Pod,
) -> Result<()> {
    let Some(spec_mod_time) = parsed.complete_sync_mod_time else {
        return Ok(());
    };
    let current_status = records::get_status(&ctx.client, &ctx.namespace).await?;
    let needs_sync = match current_status.as_ref().and_then(|s| s.synced_complete_mod_time) {
        Some(synced) => spec_mod_time > synced,
        None => true,
    };
    if !needs_sync {
        return Ok(());
    }

    let pod_name = pod.name_any();
    let target_path = source_mount_path(&parsed.devfile);
    let exec_channel = ExecChannel::new(ctx.client.clone());

    let archive_path = std::path::Path::new(".odo/complete.tar");
    let file = tokio::fs::File::open(archive_path).await?;
    let reader: Pin<Box<dyn tokio::io::AsyncRead + Send>> = Box::pin(file);
    let extractor = TarExtractor::new(&exec_channel, &ctx.namespace, &pod_name, &ctx.component);
    extractor.extract(&target_path, reader).await?;

    records::set_status(
        &ctx.client,
        &ctx.namespace,
        &ctx.component,
        owner.clone(),
        "FilesSynced",
        Some(spec_mod_time),
    )
    .await?;

    let build_cmd = parsed.devfile.default_command(CommandGroupKind::Build)?;
    let build_exec = build_cmd.exec.as_ref().ok_or(Error::MissingField("build command exec"))?;
    let build_working_dir = build_exec.working_dir.clone().unwrap_or_else(|| target_path.clone());
    let build_argv = build_or_run_argv(&build_working_dir, &build_exec.command_line);
    exec_channel
        .run(ExecRequest {
            namespace: &ctx.namespace,
            pod: &pod_name,
            container: Some(&ctx.component),
            argv: build_argv,
            stdin: None,
            capture_stdout: false,
            capture_stderr: false,
        })
        .await?;

    records::set_status(
        &ctx.client,
        &ctx.namespace,
        &ctx.component,
        owner.clone(),
        "BuildCommandExecuted",
        Some(spec_mod_time),
    )
    .await?;

    let run_cmd = parsed.devfile.default_command(CommandGroupKind::Run)?;
    let run_exec = run_cmd.exec.as_ref().ok_or(Error::MissingField("run command exec"))?;
    let run_working_dir = run_exec.working_dir.clone().unwrap_or_else(|| target_path.clone());
    let run_argv = build_or_run_argv(&run_working_dir, &run_exec.command_line);

    spawn_run_command_supervisor(ctx, pod_name.clone(), run_argv);

    records::set_status(
        &ctx.client,
        &ctx.namespace,
        &ctx.component,
        owner.clone(),
        "RunCommandExecuted",
        Some(spec_mod_time),
    )
    .await?;

    Ok(())
}

/// SpawnRunCommandSupervisor launches the run command in a detached task that holds the exec
/// stream open for the remote process's lifetime. On cancellation it cannot interrupt that
/// blocking stream cleanly, so it instead issues the stop snippet through a fresh exec.
fn spawn_run_command_supervisor(ctx: &Context, pod_name: String, run_argv: Vec<String>) {
    let client = ctx.client.clone();
    let namespace = ctx.namespace.clone();
    let container = ctx.component.clone();
    let cancel = ctx.cancel.clone();

    tokio::spawn(async move {
        let exec_channel = ExecChannel::new(client);
        let run = exec_channel.run(ExecRequest {
            namespace: &namespace,
            pod: &pod_name,
            container: Some(&container),
            argv: run_argv,
            stdin: None,
            capture_stdout: false,
            capture_stderr: false,
        });
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => {
                match result {
                    Ok(outcome) if !outcome.success => warn!(pod = pod_name, "run command exited non-zero"),
                    Ok(_) => info!(pod = pod_name, "run command exited"),
                    Err(err) => warn!(pod = pod_name, %err, "run command exec failed"),
                }
            }
            () = cancel.cancelled() => {
                info!(pod = pod_name, "stopping run command");
                let stop = exec_channel.run(ExecRequest {
                    namespace: &namespace,
                    pod: &pod_name,
                    container: Some(&container),
                    argv: stop_command_argv(),
                    stdin: None,
                    capture_stdout: false,
                    capture_stderr: false,
                }).await;
                if let Err(err) = stop {
                    warn!(pod = pod_name, %err, "stopping run command");
                }
            }
        }
    });
}
