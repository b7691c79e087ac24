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

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::{apps::v1::DaemonSet, core::v1::Pod};
use kube::{
    api::{Api, DeleteParams},
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client, Resource, ResourceExt,
};
use log::{debug, info};
use podcontrol_error::Error;

use super::{expectations::ControllerExpectations, utils::workload_key};

/// Deletion of workload replicas, behind a trait so the reconciler can be
/// exercised against a fake in tests. Creation stays with the ordinary
/// workload-creation path and is deliberately absent here.
#[async_trait]
pub trait PodControl: Clone + Sized + Send + Sync {
    async fn delete_pod(&self, namespace: &str, pod_name: &str, workload: &DaemonSet) -> Result<(), Error>;
}

#[derive(Clone)]
pub struct RealPodControl {
    client: Client,
    reporter: Reporter,
    expectations: Arc<ControllerExpectations>,
}

impl RealPodControl {
    pub fn new(client: Client, expectations: Arc<ControllerExpectations>) -> Self {
        RealPodControl {
            client,
            reporter: Reporter { controller: "pod-upgrade-operator".to_string(), instance: None },
            expectations,
        }
    }

    // best effort, a dropped event must never fail the deletion path
    async fn record(&self, workload: &DaemonSet, type_: EventType, reason: &str, note: String) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), workload.object_ref(&()));
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: "PodDeletion".to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(event).await {
            debug!("failed to publish {} event for {}: {}", reason, workload.name(), e);
        }
    }
}

#[async_trait]
impl PodControl for RealPodControl {
    async fn delete_pod(&self, namespace: &str, pod_name: &str, workload: &DaemonSet) -> Result<(), Error> {
        let key = workload_key(namespace, &workload.name());
        let pod_api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match pod_api.delete(pod_name, &DeleteParams::default()).await {
            Ok(_) => {
                self.expectations.deletion_observed(&key);
                info!("deleted pod {}/{} of workload {}", namespace, pod_name, key);
                self.record(
                    workload,
                    EventType::Normal,
                    "SuccessfulDelete",
                    format!("Deleted pod {}: outdated template, node ready", pod_name),
                )
                .await;
                Ok(())
            },
            Err(e) => {
                // roll the expectation back so the next sync retries this pod
                self.expectations.deletion_observed(&key);
                self.record(
                    workload,
                    EventType::Warning,
                    "FailedDelete",
                    format!("Error deleting pod {}: {}", pod_name, e),
                )
                .await;
                Err(Error::KubeClient { source: e })
            },
        }
    }
}

pub mod podcontrol_error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Kubernetes reported error: {source}")]
        KubeClient {
            #[from]
            source: kube::Error,
        },
    }
}
