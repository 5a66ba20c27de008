//! Records implements the Devfile record store: the spec record the local side writes and the
//! status record the reconciler writes, both modeled as namespaced key/value ConfigMaps.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, ObjectMeta, Patch};
use kube::{Client, Resource, ResourceExt};
use tracing::instrument;

use crate::{Error, Result, PATCH_PARAMS, SPEC_LABEL, SPEC_RECORD_NAME, STATUS_LABEL, STATUS_RECORD_NAME};

/// ParsedSpec is the spec record's payload, parsed and validated.
pub struct ParsedSpec {
    /// Devfile is the parsed, validated Devfile.
    pub devfile: devfile::Devfile,
    /// CompleteSyncModTime is the mod-time token of the archive the local side last built, if any.
    pub complete_sync_mod_time: Option<i64>,
}

/// StatusRecord is the status record's payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusRecord {
    /// Status is the current state tag (see the reconciler's state machine).
    pub status: String,
    /// SyncedCompleteModTime is the mod-time token of the last archive successfully synced.
    pub synced_complete_mod_time: Option<i64>,
}

/// CreateSpec reads the Devfile at `devfile_path` and applies it as the spec record, labeled for
/// `component`, carrying `complete_sync_mod_time` as the sync fence.
#[instrument(skip(client), fields(namespace, component))]
pub async fn create_spec(
    client: &Client,
    namespace: &str,
    component: &str,
    devfile_path: &Path,
    complete_sync_mod_time: i64,
) -> Result<ConfigMap> {
    let contents = std::fs::read_to_string(devfile_path)?;
    let cm = ConfigMap {
        metadata: ObjectMeta {
            name: Some(SPEC_RECORD_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(SPEC_LABEL.to_string(), component.to_string())])),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            ("devfile".to_string(), contents),
            (
                "completeSyncModTime".to_string(),
                complete_sync_mod_time.to_string(),
            ),
        ])),
        ..Default::default()
    };
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let applied = api
        .patch(SPEC_RECORD_NAME, &PATCH_PARAMS, &Patch::Apply(&cm))
        .await?;
    Ok(applied)
}

/// ReadSpec parses and validates a fetched spec record.
pub fn read_spec(record: &ConfigMap) -> Result<ParsedSpec> {
    let data = record
        .data
        .as_ref()
        .ok_or(Error::MissingField("spec record data"))?;
    let yaml = data
        .get("devfile")
        .ok_or(Error::MissingField("data.devfile"))?;
    let devfile = devfile::Devfile::parse(yaml)?;
    let complete_sync_mod_time = data
        .get("completeSyncModTime")
        .map(|s| s.parse::<i64>())
        .transpose()
        .map_err(|e| Error::Other(anyhow::anyhow!(e)))?;
    Ok(ParsedSpec {
        devfile,
        complete_sync_mod_time,
    })
}

/// SetStatus applies the status record. When `synced_complete_mod_time` is `None`, the previously
/// observed value (read just before writing) is preserved rather than cleared.
#[instrument(skip(client), fields(namespace, component, status))]
pub async fn set_status(
    client: &Client,
    namespace: &str,
    component: &str,
    owner: OwnerReference,
    status: &str,
    synced_complete_mod_time: Option<i64>,
) -> Result<()> {
    let synced = match synced_complete_mod_time {
        Some(v) => Some(v),
        None => get_status(client, namespace)
            .await?
            .and_then(|s| s.synced_complete_mod_time),
    };

    let mut data = BTreeMap::from([("status".to_string(), status.to_string())]);
    if let Some(v) = synced {
        data.insert("syncedCompleteModTime".to_string(), v.to_string());
    }

    let cm = ConfigMap {
        metadata: ObjectMeta {
            name: Some(STATUS_RECORD_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                STATUS_LABEL.to_string(),
                component.to_string(),
            )])),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };

    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    api.patch(STATUS_RECORD_NAME, &PATCH_PARAMS, &Patch::Apply(&cm))
        .await?;
    Ok(())
}

/// GetStatus fetches and parses the status record, if it exists.
pub async fn get_status(client: &Client, namespace: &str) -> Result<Option<StatusRecord>> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let Some(cm) = api.get_opt(STATUS_RECORD_NAME).await? else {
        return Ok(None);
    };
    let Some(data) = cm.data else {
        return Ok(None);
    };
    if !data.contains_key("status") {
        return Ok(None);
    }
    parse_status(&data).map(Some)
}

/// ParseStatus reads a status record's raw key/value data into a [`StatusRecord`]. Shared by the
/// direct fetch path and the status watcher, which both start from the same ConfigMap shape.
pub fn parse_status(data: &BTreeMap<String, String>) -> Result<StatusRecord> {
    let status = data
        .get("status")
        .cloned()
        .ok_or(Error::MissingField("data.status"))?;
    let synced_complete_mod_time = data
        .get("syncedCompleteModTime")
        .map(|s| s.parse::<i64>())
        .transpose()
        .map_err(|e| Error::Other(anyhow::anyhow!(e)))?;
    Ok(StatusRecord {
        status,
        synced_complete_mod_time,
    })
}

/// DeleteSpecAndWait deletes the spec record and blocks until the cluster reports it gone, which
/// in turn drives cascade-deletion of every object owned by it.
#[instrument(skip(client), fields(namespace))]
pub async fn delete_spec_and_wait(client: &Client, namespace: &str) -> Result<()> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    if api.get_opt(SPEC_RECORD_NAME).await?.is_none() {
        return Ok(());
    }
    api.delete(SPEC_RECORD_NAME, &Default::default()).await?;
    loop {
        if api.get_opt(SPEC_RECORD_NAME).await?.is_none() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// OwnerRef builds a controller owner-reference pointing at the spec record.
pub fn owner_ref(record: &ConfigMap) -> Result<OwnerReference> {
    record
        .controller_owner_ref(&())
        .ok_or(Error::MissingField("spec record owner reference"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::io::Write;

    #[test]
    fn read_spec_parses_devfile_and_mod_time() {
        let yaml = indoc! {"
            schemaVersion: 2.2.0
            metadata:
              name: my-go-app
            components:
              - name: runtime
                container:
                  image: golang:1.22
        "};
        let cm = ConfigMap {
            data: Some(BTreeMap::from([
                ("devfile".to_string(), yaml.to_string()),
                ("completeSyncModTime".to_string(), "1000".to_string()),
            ])),
            ..Default::default()
        };
        let parsed = read_spec(&cm).unwrap();
        assert_eq!(parsed.complete_sync_mod_time, Some(1000));
        assert_eq!(parsed.devfile.metadata.name, "my-go-app");
    }

    #[test]
    fn read_spec_without_mod_time_is_none() {
        let yaml = indoc! {"
            schemaVersion: 2.2.0
            components:
              - name: runtime
                container:
                  image: golang:1.22
        "};
        let cm = ConfigMap {
            data: Some(BTreeMap::from([("devfile".to_string(), yaml.to_string())])),
            ..Default::default()
        };
        let parsed = read_spec(&cm).unwrap();
        assert!(parsed.complete_sync_mod_time.is_none());
    }

    #[test]
    fn read_spec_requires_devfile_key() {
        let cm = ConfigMap {
            data: Some(BTreeMap::new()),
            ..Default::default()
        };
        assert!(read_spec(&cm).is_err());
    }

    #[test]
    fn create_spec_reads_file_contents() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "schemaVersion: 2.2.0").unwrap();
        // create_spec itself needs a live client to apply; this only exercises the file read
        // and record shape, which is the part independent of the cluster.
        let contents = std::fs::read_to_string(f.path()).unwrap();
        assert!(contents.contains("schemaVersion"));
    }
}
