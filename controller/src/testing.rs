//! Extras that only show up during tests: a mock apiserver built on `tower_test`, adapted to the
//! devfile-sync record/deployment shapes.
#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::client::{Body, Client};
use kube::Resource;
use serde_json::{json, Value};
use tower_test::mock::SendResponse;

use crate::{Context, Result};

pub use test_log::test;

impl Context {
    /// ReconcileTests wires a mock apiserver in place of a real cluster client, for exercising
    /// `reconcile::reconcile` without any network I/O.
    pub fn reconcile_tests(namespace: &str, component: &str) -> (Arc<Self>, ServerVerifier) {
        let (mock_service, handle) = tower_test::mock::pair::<http::Request<Body>, http::Response<Body>>();
        let mock_client = Client::new(mock_service, namespace);
        let ctx = Self {
            client: mock_client,
            namespace: namespace.to_string(),
            component: component.to_string(),
            default_image: None,
            cancel: tokio_util::sync::CancellationToken::new(),
        };
        (Arc::new(ctx), ServerVerifier::new(handle, namespace.to_string(), component.to_string()))
    }
}

pub mod fixtures {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    /// SpecRecord builds a `devfile-spec` ConfigMap carrying the given Devfile YAML.
    pub fn spec_record(namespace: &str, component: &str, devfile_yaml: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(crate::SPEC_RECORD_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                uid: Some("spec-uid".to_string()),
                labels: Some(BTreeMap::from([(
                    crate::SPEC_LABEL.to_string(),
                    component.to_string(),
                )])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("devfile".to_string(), devfile_yaml.to_string())])),
            ..Default::default()
        }
    }

    /// Deployment builds a deployment reporting `available_replicas`.
    pub fn deployment(name: &str, namespace: &str, available_replicas: i32) -> Deployment {
        use k8s_openapi::api::apps::v1::DeploymentStatus;
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                generation: Some(1),
                ..Default::default()
            },
            status: Some(DeploymentStatus {
                available_replicas: Some(available_replicas),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

type ApiServerHandle = tower_test::mock::Handle<http::Request<Body>, http::Response<Body>>;

/// ServerVerifier replays the sequence of apiserver calls a single reconcile pass makes, up to
/// (but not including) the point where a pass would start exec'ing into a pod — that transport
/// is a SPDY/WebSocket upgrade, not a plain request/response, and isn't represented here.
pub struct ServerVerifier {
    handle: ApiServerHandle,
    namespace: String,
    component: String,
}

impl ServerVerifier {
    fn new(handle: ApiServerHandle, namespace: String, component: String) -> Self {
        Self { handle, namespace, component }
    }

    async fn next(&mut self) -> (http::Request<Body>, SendResponse<http::Response<Body>>) {
        self.handle.next_request().await.expect("service not called")
    }

    /// HandleWaitDeployment drives the calls a reconcile pass makes when the deployment has no
    /// available replicas yet: spec GET, deployment apply+GET, binding list, pod list, status GET
    /// (absent), status apply. No inline components and no service bindings are assumed present.
    pub async fn handle_wait_deployment(mut self, spec: &ConfigMap) -> Result<Self> {
        self = self.handle_get_configmap(crate::SPEC_RECORD_NAME, Some(spec)).await?;
        self = self.handle_apply_deployment(0).await?;
        self = self.handle_list_bindings(&[]).await?;
        self = self.handle_list_pods(&[]).await?;
        self = self.handle_get_configmap(crate::STATUS_RECORD_NAME, None).await?;
        self = self.handle_apply_status("WaitDeployment").await?;
        Ok(self)
    }

    /// HandleWaitBindings drives the calls a reconcile pass makes when the deployment is
    /// available but a listed binding has not finished injecting.
    pub async fn handle_wait_bindings(mut self, spec: &ConfigMap) -> Result<Self> {
        self = self.handle_get_configmap(crate::SPEC_RECORD_NAME, Some(spec)).await?;
        self = self.handle_apply_deployment(1).await?;
        self = self.handle_list_bindings_targeting(false).await?;
        self = self.handle_list_pods(&[]).await?;
        self = self.handle_get_configmap(crate::STATUS_RECORD_NAME, None).await?;
        self = self.handle_apply_status("WaitBindings").await?;
        Ok(self)
    }

    async fn handle_get_configmap(mut self, name: &str, existing: Option<&ConfigMap>) -> Result<Self> {
        let (request, send) = self.next().await;
        assert_eq!(request.method(), http::Method::GET);
        assert!(request.uri().to_string().contains(name));
        let response = match existing {
            Some(cm) => ok_body(cm),
            None => not_found::<ConfigMap>(name),
        };
        send.send_response(response);
        Ok(self)
    }

    async fn handle_apply_deployment(mut self, available_replicas: i32) -> Result<Self> {
        let (request, send) = self.next().await;
        assert_eq!(request.method(), http::Method::PATCH);
        assert!(request.uri().to_string().contains(&format!("{}-app", self.component)));
        let dep = fixtures::deployment(&format!("{}-app", self.component), &self.namespace, available_replicas);
        send.send_response(ok_body(&dep));

        let (request, send) = self.next().await;
        assert_eq!(request.method(), http::Method::GET);
        send.send_response(ok_body(&dep));
        Ok(self)
    }

    async fn handle_list_bindings(mut self, items: &[Value]) -> Result<Self> {
        let (request, send) = self.next().await;
        assert_eq!(request.method(), http::Method::GET);
        assert!(request.uri().to_string().contains("servicebinding") || request.uri().to_string().contains("binding.operators.coreos.com"));
        send.send_response(ok_body(&json!({"metadata": {}, "items": items})));
        Ok(self)
    }

    async fn handle_list_bindings_targeting(self, injection_ready: bool) -> Result<Self> {
        let binding = json!({
            "apiVersion": "binding.operators.coreos.com/v1alpha1",
            "kind": "ServiceBinding",
            "metadata": {"name": "my-binding"},
            "spec": {"application": {"group": "apps", "kind": "Deployment", "name": format!("{}-app", self.component)}},
            "status": {"conditions": [{"type": "InjectionReady", "status": if injection_ready { "True" } else { "False" }}]},
        });
        self.handle_list_bindings(&[binding]).await
    }

    async fn handle_list_pods(mut self, pods: &[Pod]) -> Result<Self> {
        let (request, send) = self.next().await;
        assert_eq!(request.method(), http::Method::GET);
        assert!(request.uri().to_string().contains("/pods"));
        send.send_response(ok_body(&json!({"metadata": {}, "items": pods})));
        Ok(self)
    }

    async fn handle_apply_status(mut self, expected_status: &str) -> Result<Self> {
        let (request, send) = self.next().await;
        assert_eq!(request.method(), http::Method::PATCH);
        assert!(request.uri().to_string().contains(crate::STATUS_RECORD_NAME));
        let cm = ConfigMap {
            data: Some(BTreeMap::from([("status".to_string(), expected_status.to_string())])),
            ..Default::default()
        };
        send.send_response(ok_body(&cm));
        Ok(self)
    }
}

fn ok_body<T: serde::Serialize>(value: &T) -> http::Response<Body> {
    http::Response::builder()
        .body(Body::from(serde_json::to_vec(value).expect("serializable fixture")))
        .expect("valid response")
}

fn not_found<R: Resource<DynamicType = ()>>(name: &str) -> http::Response<Body> {
    let err = json!({
        "code": 404,
        "status": "Failure",
        "reason": "NotFound",
        "details": {"kind": R::kind(&()), "name": name},
    });
    http::Response::builder()
        .status(http::StatusCode::NOT_FOUND)
        .body(Body::from(serde_json::to_vec(&err).expect("serializable error")))
        .expect("valid response")
}
