/*
 * Copyright (c) Huawei Technologies Co., Ltd. 2023. All rights reserved.
 * KubeOS is licensed under the Mulan PSL v2.
 * You can use this software according to the terms and conditions of the Mulan PSL v2.
 * You may obtain a copy of Mulan PSL v2 at:
 *     http://license.coscl.org.cn/MulanPSL2
 * THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND, EITHER EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR
 * PURPOSE.
 * See the Mulan PSL v2 for more details.
 */

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use http::{Request, Response};
use hyper::Body;
use k8s_openapi::{
    api::{
        apps::v1::{DaemonSet, DaemonSetSpec},
        core::v1::{Container, Node, NodeCondition, NodeStatus, Pod, PodSpec, PodTemplateSpec},
    },
    apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference},
};
use kube::{
    api::ObjectMeta,
    core::{ListMeta, ObjectList},
    Client as KubeClient, ResourceExt,
};

use self::mock_error::Error;
use super::{
    controller::UpgradeController,
    expectations::ControllerExpectations,
    podcontrol::{podcontrol_error, PodControl},
    utils::workload_key,
};
use common::values::{LABEL_TEMPLATE_HASH, MAX_UNAVAILABLE_ANNOTATION, UPGRADE_ANNOTATION};

type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;
pub struct ApiServerVerifier(ApiServerHandle);

pub enum Testcases {
    SyncPods(DaemonSet, Vec<Pod>, Vec<Node>),
    SyncPodsTwice(DaemonSet, Vec<Pod>, Vec<Node>, Vec<Pod>, Vec<Node>),
    FetchOnly(DaemonSet),
    WorkloadGone(DaemonSet),
}

pub async fn timeout_after_5s(handle: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("scenario succeeded")
}

impl ApiServerVerifier {
    pub fn run(self, cases: Testcases) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            match cases {
                Testcases::SyncPods(workload, pods, nodes) => {
                    self.handler_workload_get(workload.clone())
                        .await
                        .unwrap()
                        .handler_pod_list(workload, pods)
                        .await
                        .unwrap()
                        .handler_node_list(nodes)
                        .await
                },
                Testcases::SyncPodsTwice(workload, first_pods, first_nodes, second_pods, second_nodes) => {
                    self.handler_workload_get(workload.clone())
                        .await
                        .unwrap()
                        .handler_pod_list(workload.clone(), first_pods)
                        .await
                        .unwrap()
                        .handler_node_list(first_nodes)
                        .await
                        .unwrap()
                        .handler_workload_get(workload.clone())
                        .await
                        .unwrap()
                        .handler_pod_list(workload, second_pods)
                        .await
                        .unwrap()
                        .handler_node_list(second_nodes)
                        .await
                },
                Testcases::FetchOnly(workload) => self.handler_workload_get(workload).await,
                Testcases::WorkloadGone(workload) => self.handler_workload_get_not_found(workload).await,
            }
            .expect("Case completed without errors");
        })
    }

    async fn handler_workload_get(mut self, workload: DaemonSet) -> Result<Self, Error> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);
        assert_eq!(
            request.uri().to_string(),
            format!("/apis/apps/v1/namespaces/default/daemonsets/{}", workload.name())
        );
        dbg!("handler_workload_get");
        let response = serde_json::to_vec(&workload).unwrap();
        send.send_response(Response::builder().body(Body::from(response)).unwrap());
        Ok(self)
    }

    async fn handler_workload_get_not_found(mut self, workload: DaemonSet) -> Result<Self, Error> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);
        assert_eq!(
            request.uri().to_string(),
            format!("/apis/apps/v1/namespaces/default/daemonsets/{}", workload.name())
        );
        let response_json = serde_json::json!(
            { "status": "Failure", "message": "daemonsets.apps \"agent\" not found", "reason": "NotFound", "code": 404 }
        );
        dbg!("handler_workload_get_not_found");
        let response = serde_json::to_vec(&response_json).unwrap();
        send.send_response(Response::builder().status(404).body(Body::from(response)).unwrap());
        Ok(self)
    }

    async fn handler_pod_list(mut self, workload: DaemonSet, pods: Vec<Pod>) -> Result<Self, Error> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);
        assert_eq!(
            request.uri().to_string(),
            format!("/api/v1/namespaces/default/pods?&labelSelector=name%3D{}", workload.name())
        );
        let pod_list = ObjectList::<Pod> { metadata: ListMeta::default(), items: pods };
        dbg!("handler_pod_list");
        let response = serde_json::to_vec(&pod_list).unwrap();
        send.send_response(Response::builder().body(Body::from(response)).unwrap());
        Ok(self)
    }

    async fn handler_node_list(mut self, nodes: Vec<Node>) -> Result<Self, Error> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);
        assert_eq!(request.uri().to_string(), "/api/v1/nodes?");
        let node_list = ObjectList::<Node> { metadata: ListMeta::default(), items: nodes };
        dbg!("handler_node_list");
        let response = serde_json::to_vec(&node_list).unwrap();
        send.send_response(Response::builder().body(Body::from(response)).unwrap());
        Ok(self)
    }
}

pub mod mock_error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Kubernetes reported error: {source}")]
        KubeError {
            #[from]
            source: kube::Error,
        },
    }
}

/// Test double for pod deletion. Mimics the production behavior of reporting
/// observed deletions back to the expectation tracker.
#[derive(Clone)]
pub struct FakePodControl {
    deleted: Arc<Mutex<Vec<String>>>,
    expectations: Arc<ControllerExpectations>,
}

impl FakePodControl {
    pub fn new(expectations: Arc<ControllerExpectations>) -> Self {
        FakePodControl { deleted: Arc::new(Mutex::new(Vec::new())), expectations }
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl PodControl for FakePodControl {
    async fn delete_pod(
        &self,
        namespace: &str,
        pod_name: &str,
        workload: &DaemonSet,
    ) -> Result<(), podcontrol_error::Error> {
        self.deleted.lock().unwrap().push(pod_name.to_string());
        self.expectations.deletion_observed(&workload_key(namespace, &workload.name()));
        Ok(())
    }
}

impl UpgradeController<FakePodControl> {
    pub fn test() -> (UpgradeController<FakePodControl>, ApiServerVerifier) {
        let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let mock_k8s_client = KubeClient::new(mock_service, "default");
        let expectations = Arc::new(ControllerExpectations::default());
        let pod_control = FakePodControl::new(expectations.clone());
        let upgrade_controller = UpgradeController::with_pod_control(mock_k8s_client, pod_control, expectations);
        (upgrade_controller, ApiServerVerifier(handle))
    }
}

pub fn new_workload(name: &str, image: &str, strategy: Option<&str>) -> DaemonSet {
    let mut match_labels = BTreeMap::new();
    match_labels.insert("name".to_string(), name.to_string());
    let mut annotations = BTreeMap::new();
    if let Some(strategy) = strategy {
        annotations.insert(UPGRADE_ANNOTATION.to_string(), strategy.to_string());
    }
    DaemonSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some(format!("{}-uid", name)),
            annotations: Some(annotations),
            ..ObjectMeta::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector { match_labels: Some(match_labels.clone()), ..LabelSelector::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(match_labels), ..ObjectMeta::default() }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: name.to_string(),
                        image: Some(image.to_string()),
                        ..Container::default()
                    }],
                    ..PodSpec::default()
                }),
            },
            ..DaemonSetSpec::default()
        }),
        status: None,
    }
}

pub fn set_max_unavailable(workload: &mut DaemonSet, limit: &str) {
    workload.annotations_mut().insert(MAX_UNAVAILABLE_ANNOTATION.to_string(), limit.to_string());
}

pub fn new_pod(name: &str, node_name: &str, workload: &DaemonSet, template_hash: &str) -> Pod {
    let mut labels = BTreeMap::new();
    labels.insert("name".to_string(), workload.name());
    labels.insert(LABEL_TEMPLATE_HASH.to_string(), template_hash.to_string());
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            labels: Some(labels),
            owner_references: Some(vec![OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: "DaemonSet".to_string(),
                name: workload.name(),
                uid: workload.uid().unwrap_or_default(),
                controller: Some(true),
                ..OwnerReference::default()
            }]),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec { node_name: Some(node_name.to_string()), ..PodSpec::default() }),
        status: None,
    }
}

pub fn new_node(name: &str, ready: bool) -> Node {
    let status = if ready { "True" } else { "False" };
    Node {
        metadata: ObjectMeta { name: Some(name.to_string()), ..ObjectMeta::default() },
        spec: None,
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: status.to_string(),
                ..NodeCondition::default()
            }]),
            ..NodeStatus::default()
        }),
    }
}
