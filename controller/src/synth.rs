//! Synth derives a Deployment from a parsed Devfile: one container per Devfile container
//! component, one init container per component reachable from an `events.preStart` Apply
//! command.

use std::collections::BTreeMap;

use devfile::{ContainerComponent, Devfile};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use crate::COMPONENT_LABEL;

/// TerminationGracePeriodSeconds bounds how long a replaced pod gets to drain the supervised
/// run command before being killed, per the stop-command contract.
const TERMINATION_GRACE_PERIOD_SECONDS: i64 = 5;

/// Synthesize derives the Deployment for `component` from its Devfile, named `<component>-app`
/// and selected by `component=<component>`. Containers without an explicit image fall back to
/// `default_image`.
pub fn synthesize(name: &str, component: &str, devfile: &Devfile, default_image: Option<&str>) -> Deployment {
    let init_names = devfile.init_container_names();
    let mut containers = Vec::new();
    let mut init_containers = Vec::new();
    for (cname, cc) in devfile.containers() {
        let container = to_container(cname, cc, default_image);
        if init_names.contains(cname) {
            init_containers.push(container);
        } else {
            containers.push(container);
        }
    }

    let labels = BTreeMap::from([(COMPONENT_LABEL.to_string(), component.to_string())]);

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers,
                    init_containers: if init_containers.is_empty() {
                        None
                    } else {
                        Some(init_containers)
                    },
                    termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD_SECONDS),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn to_container(name: &str, cc: &ContainerComponent, default_image: Option<&str>) -> Container {
    let image = cc
        .image
        .clone()
        .or_else(|| default_image.map(str::to_string));

    let env: Vec<EnvVar> = cc
        .env
        .iter()
        .map(|e| EnvVar {
            name: e.name.clone(),
            value: Some(e.value.clone()),
            ..Default::default()
        })
        .collect();

    let resources = resource_requirements(cc);

    Container {
        name: name.to_string(),
        image,
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: non_empty(cc.command.clone()),
        args: non_empty(cc.args.clone()),
        env: non_empty(env),
        resources,
        ..Default::default()
    }
}

fn non_empty<T>(v: Vec<T>) -> Option<Vec<T>> {
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

fn resource_requirements(cc: &ContainerComponent) -> Option<ResourceRequirements> {
    let mut limits = BTreeMap::new();
    let mut requests = BTreeMap::new();
    if let Some(v) = &cc.memory_limit {
        limits.insert("memory".to_string(), Quantity(v.clone()));
    }
    if let Some(v) = &cc.cpu_limit {
        limits.insert("cpu".to_string(), Quantity(v.clone()));
    }
    if let Some(v) = &cc.memory_request {
        requests.insert("memory".to_string(), Quantity(v.clone()));
    }
    if let Some(v) = &cc.cpu_request {
        requests.insert("cpu".to_string(), Quantity(v.clone()));
    }
    if limits.is_empty() && requests.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        limits: non_empty_map(limits),
        requests: non_empty_map(requests),
        ..Default::default()
    })
}

fn non_empty_map<K: Ord, V>(m: BTreeMap<K, V>) -> Option<BTreeMap<K, V>> {
    if m.is_empty() {
        None
    } else {
        Some(m)
    }
}
