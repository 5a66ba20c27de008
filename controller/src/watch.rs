//! Watch streams updates to the status record so the local side can print progress as it happens.

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::watcher::{self, Event};
use kube::{api::Api, Client};
use tracing::{instrument, warn};

use crate::records::{parse_status, StatusRecord};
use crate::{Result, STATUS_RECORD_NAME};

/// StatusUpdates returns a stream of status records, one item per observed change to the status
/// record in `namespace`. The stream never terminates on its own; callers cancel it by dropping it.
#[instrument(skip(client), fields(namespace))]
pub fn status_updates(client: Client, namespace: &str) -> impl Stream<Item = Result<StatusRecord>> {
    let api: Api<ConfigMap> = Api::namespaced(client, namespace);
    let cfg = watcher::Config::default().fields(&format!("metadata.name={STATUS_RECORD_NAME}"));
    watcher::watcher(api, cfg).filter_map(|event| async move {
        match event {
            Ok(Event::Apply(cm)) | Ok(Event::InitApply(cm)) => parse_record(&cm),
            Ok(Event::Delete(_)) | Ok(Event::Init) | Ok(Event::InitDone) => None,
            Err(err) => {
                warn!(%err, "watching status record");
                None
            }
        }
    })
}

fn parse_record(cm: &ConfigMap) -> Option<Result<StatusRecord>> {
    let data = cm.data.as_ref()?;
    Some(parse_status(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn parse_record_reads_status_and_mod_time() {
        let cm = ConfigMap {
            data: Some(BTreeMap::from([
                ("status".to_string(), "PodRunning".to_string()),
                ("syncedCompleteModTime".to_string(), "42".to_string()),
            ])),
            ..Default::default()
        };
        let parsed = parse_record(&cm).unwrap().unwrap();
        assert_eq!(parsed.status, "PodRunning");
        assert_eq!(parsed.synced_complete_mod_time, Some(42));
    }
}
