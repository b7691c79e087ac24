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

use std::{collections::HashMap, sync::Arc};

use common::{
    hash::pod_template_hash,
    strategy::{determine_strategy, UpgradeStrategy},
    values::{no_requeue, requeue_error, requeue_normal, LABEL_TEMPLATE_HASH},
};
use k8s_openapi::api::{
    apps::v1::DaemonSet,
    core::v1::{Node, Pod},
};
use kube::{
    api::{Api, ListParams},
    core::ErrorResponse,
    runtime::controller::{Action, Context},
    Client, ResourceExt,
};
use log::{debug, error, info};
use reconciler_error::Error;

use super::{
    expectations::ControllerExpectations,
    podcontrol::{PodControl, RealPodControl},
    utils::{is_controlled_by, is_node_ready, match_labels_selector, max_unavailable, workload_key},
};

#[derive(Clone)]
pub struct UpgradeController<T: PodControl> {
    k8s_client: Client,
    pod_control: T,
    expectations: Arc<ControllerExpectations>,
}

impl UpgradeController<RealPodControl> {
    pub fn new(k8s_client: Client) -> Self {
        let expectations = Arc::new(ControllerExpectations::default());
        let pod_control = RealPodControl::new(k8s_client.clone(), expectations.clone());
        UpgradeController { k8s_client, pod_control, expectations }
    }
}

impl<T: PodControl> UpgradeController<T> {
    pub fn with_pod_control(k8s_client: Client, pod_control: T, expectations: Arc<ControllerExpectations>) -> Self {
        UpgradeController { k8s_client, pod_control, expectations }
    }

    // pods owned by the workload, matched by controller owner reference
    async fn get_owned_pods(&self, workload: &DaemonSet, namespace: &str) -> Result<Vec<Pod>, Error> {
        let pod_api: Api<Pod> = Api::namespaced(self.k8s_client.clone(), namespace);
        let selector = match_labels_selector(workload);
        let list_params =
            if selector.is_empty() { ListParams::default() } else { ListParams::default().labels(&selector) };
        let pods = pod_api.list(&list_params).await?;
        let owner_uid = workload.uid();
        Ok(pods.items.into_iter().filter(|pod| is_controlled_by(pod, owner_uid.as_deref())).collect())
    }

    async fn get_node_readiness(&self) -> Result<HashMap<String, bool>, Error> {
        let node_api: Api<Node> = Api::all(self.k8s_client.clone());
        let nodes = node_api.list(&ListParams::default()).await?;
        let mut readiness = HashMap::new();
        for node in nodes {
            readiness.insert(node.name(), is_node_ready(&node));
        }
        Ok(readiness)
    }

    /* Delete outdated pods bound to ready nodes, up to the workload's budget.
    Pods on not-ready nodes stay untouched and are re-evaluated once the node
    reports ready again. */
    async fn delete_outdated_pods(&self, workload: &DaemonSet, namespace: &str, key: &str) -> Result<(), Error> {
        let template = &workload
            .spec
            .as_ref()
            .ok_or(Error::MissingSubResource { value: String::from("daemonset.spec") })?
            .template;
        let current_hash = pod_template_hash(template)?;
        let pods = self.get_owned_pods(workload, namespace).await?;
        let node_readiness = self.get_node_readiness().await?;
        let mut candidates: Vec<String> = Vec::new();
        let mut pinned = 0;
        for pod in pods.iter() {
            let node_name = match pod.spec.as_ref().and_then(|spec| spec.node_name.as_ref()) {
                Some(node_name) => node_name,
                // unscheduled replica, there is no node to gate on
                None => continue,
            };
            if pod.labels().get(LABEL_TEMPLATE_HASH) == Some(&current_hash) {
                continue;
            }
            if !node_readiness.get(node_name).copied().unwrap_or(false) {
                pinned += 1;
                continue;
            }
            candidates.push(pod.name());
        }
        if pinned > 0 {
            info!(
                "workload {} has {} outdated pod(s) pinned on not-ready nodes, retrying after the nodes recover",
                key, pinned
            );
        }
        // deterministic order keeps budgeted deletion idempotent under retries
        candidates.sort();
        if let Some(limit) = max_unavailable(workload) {
            candidates.truncate(limit);
        }
        if candidates.is_empty() {
            debug!("workload {} has no deletable outdated pods", key);
            return Ok(());
        }
        self.expectations.expect_deletions(key, candidates.len() as i64);
        info!("workload {} deleting {} outdated pod(s)", key, candidates.len());
        let mut errors: Vec<String> = Vec::new();
        for pod_name in candidates {
            if let Err(e) = self.pod_control.delete_pod(namespace, &pod_name, workload).await {
                errors.push(format!("{}: {}", pod_name, e));
            }
        }
        if !errors.is_empty() {
            return Err(Error::DeletePods { value: errors.join("; ") });
        }
        Ok(())
    }
}

pub async fn reconcile<T: PodControl>(
    workload: Arc<DaemonSet>,
    ctx: Context<UpgradeController<T>>,
) -> Result<Action, Error> {
    debug!("start reconcile");
    let upgrade_controller = ctx.get_ref();
    let name = workload.name();
    let namespace: String = workload.namespace().ok_or(Error::MissingObjectKey {
        resource: "daemonset".to_string(),
        value: "namespace".to_string(),
    })?;
    let key = workload_key(&namespace, &name);
    /* Re-fetch the workload so a deletion that raced the watch event clears
    the bookkeeping instead of acting on a stale object. */
    let workload_api: Api<DaemonSet> = Api::namespaced(upgrade_controller.k8s_client.clone(), &namespace);
    let workload = match workload_api.get(&name).await {
        Ok(workload) => workload,
        Err(kube::Error::Api(ErrorResponse { reason, .. })) if &reason == "NotFound" => {
            debug!("workload {} is gone, clearing its expectations", key);
            upgrade_controller.expectations.delete_expectations(&key);
            return Ok(no_requeue());
        },
        Err(e) => return Err(Error::KubeClient { source: e }),
    };
    match determine_strategy(&workload) {
        UpgradeStrategy::Unmanaged => return Ok(no_requeue()),
        UpgradeStrategy::Ota => {
            // the node-local upgrader swaps the manifest, nothing to delete here
            debug!("workload {} uses ota upgrade, skipping pod deletion", key);
            return Ok(no_requeue());
        },
        UpgradeStrategy::Auto => {},
    }
    if !upgrade_controller.expectations.satisfied_expectations(&key) {
        debug!("expectations of {} not satisfied, deferring sync until actions are observed", key);
        return Ok(requeue_normal());
    }
    upgrade_controller.delete_outdated_pods(&workload, &namespace, &key).await?;
    Ok(requeue_normal())
}

pub fn error_policy<T: PodControl>(error: &Error, _ctx: Context<UpgradeController<T>>) -> Action {
    error!("Reconciliation error: {}", error.to_string());
    requeue_error()
}

pub mod reconciler_error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Kubernetes reported error: {source}")]
        KubeClient {
            #[from]
            source: kube::Error,
        },

        #[error("{}.metadata.{} is not exist", resource, value)]
        MissingObjectKey { resource: String, value: String },

        #[error("Cannot get {}, {} is None", value, value)]
        MissingSubResource { value: String },

        #[error("Cannot hash pod template: {source}")]
        TemplateHash {
            #[from]
            source: serde_json::Error,
        },

        #[error("Error when deleting pods: {}", value)]
        DeletePods { value: String },
    }
}
