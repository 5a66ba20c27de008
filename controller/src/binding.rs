//! Binding implements the service-binding gate: a read-only check of whether every binding
//! object targeting the component's deployment has finished injecting.

use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::{Client, Error as KubeError};
use tracing::{instrument, trace, warn};

use crate::Result;

/// ServiceBindingGvk is the kind this gate consumes — the redhat-developer
/// service-binding-operator's `ServiceBinding`, read-only.
fn service_binding_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("binding.operators.coreos.com", "v1alpha1", "ServiceBinding")
}

const INJECTION_READY: &str = "InjectionReady";

/// AllInjected lists every `ServiceBinding` in `namespace` and reports whether each one whose
/// `spec.application` targets a Deployment named `deployment_name` in the `apps` API group has
/// its `InjectionReady` condition set to `True`. A cluster that doesn't register the
/// `ServiceBinding` kind is treated as having no bindings to wait for.
#[instrument(skip(client), fields(namespace, deployment_name))]
pub async fn all_injected(client: &Client, namespace: &str, deployment_name: &str) -> Result<bool> {
    let ar = ApiResource::from_gvk(&service_binding_gvk());
    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &ar);

    let list = match api.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(KubeError::Api(err)) if err.code == 404 => {
            trace!("ServiceBinding kind not registered, treating as no bindings to wait for");
            return Ok(true);
        }
        Err(err) => return Err(err.into()),
    };

    for binding in list.items {
        if !targets_deployment(&binding, deployment_name) {
            continue;
        }
        if !injection_ready(&binding) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn targets_deployment(binding: &DynamicObject, deployment_name: &str) -> bool {
    let Some(app) = binding.data.get("spec").and_then(|s| s.get("application")) else {
        return false;
    };
    let group = app.get("group").and_then(|v| v.as_str()).unwrap_or("apps");
    let kind = app.get("kind").and_then(|v| v.as_str()).unwrap_or_default();
    let name = app.get("name").and_then(|v| v.as_str()).unwrap_or_default();
    group == "apps" && kind == "Deployment" && name == deployment_name
}

fn injection_ready(binding: &DynamicObject) -> bool {
    let Some(conditions) = binding
        .data
        .get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(|c| c.as_array())
    else {
        return false;
    };
    conditions.iter().any(|c| {
        c.get("type").and_then(|v| v.as_str()) == Some(INJECTION_READY)
            && c.get("status").and_then(|v| v.as_str()) == Some("True")
    })
}
