//! Inline applies the Devfile's inline Kubernetes manifest components that aren't referenced
//! by any Exec or Apply command — one create-if-absent per component, owned by the spec record.
//!
//! Objects are never updated after their first creation and components later removed from the
//! Devfile are never reaped; both are documented limitations of this pass, not omissions.

use devfile::{Component, Devfile};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, PostParams};
use kube::Client;
use tracing::{info, instrument, warn};

use crate::{Error, Result};

/// ApplyInlineComponents walks `devfile.kubernetes_components_to_push()`, decodes each inlined
/// manifest, and creates it in `namespace` if an object of that name doesn't already exist.
#[instrument(skip(client, devfile, owner), fields(namespace))]
pub async fn apply_inline_components(
    client: &Client,
    namespace: &str,
    devfile: &Devfile,
    owner: &OwnerReference,
) -> Result<()> {
    for component in devfile.kubernetes_components_to_push() {
        if let Err(err) = apply_one(client, namespace, component, owner).await {
            warn!(component = component.name, %err, "applying inline component");
            return Err(err);
        }
    }
    Ok(())
}

async fn apply_one(
    client: &Client,
    namespace: &str,
    component: &Component,
    owner: &OwnerReference,
) -> Result<()> {
    let manifest = component
        .kubernetes
        .as_ref()
        .and_then(|k| k.inlined.as_deref())
        .ok_or(Error::MissingField("kubernetes.inlined"))?;

    let mut obj: DynamicObject = serde_yaml::from_str(manifest)?;
    obj.metadata.namespace = Some(namespace.to_string());
    obj.metadata.owner_references.get_or_insert_with(Vec::new).push(owner.clone());
    let name = obj
        .metadata
        .name
        .clone()
        .ok_or(Error::MissingField("inline manifest metadata.name"))?;

    let gvk = gvk_of(&obj)?;
    let ar = ApiResource::from_gvk(&gvk);
    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &ar);

    if api.get_opt(&name).await?.is_some() {
        return Ok(());
    }

    info!(component = component.name, kind = gvk.kind, name, "creating inline component");
    api.create(&PostParams::default(), &obj).await?;
    Ok(())
}

fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind> {
    let api_version = obj
        .types
        .as_ref()
        .map(|t| t.api_version.as_str())
        .ok_or(Error::MissingField("inline manifest apiVersion"))?;
    let kind = obj
        .types
        .as_ref()
        .map(|t| t.kind.as_str())
        .ok_or(Error::MissingField("inline manifest kind"))?;
    GroupVersionKind::try_from(kube::api::TypeMeta {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
    })
    .map_err(|e| Error::Other(anyhow::anyhow!(e)))
}
