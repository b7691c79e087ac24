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

use common::values::MAX_UNAVAILABLE_ANNOTATION;
use k8s_openapi::api::{
    apps::v1::DaemonSet,
    core::v1::{Node, Pod},
};
use kube::ResourceExt;
use log::warn;

pub fn workload_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Node readiness is the sole eligibility signal for pod deletion.
pub fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map_or(false, |conditions| conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

/// Upper bound on deletions per sync, from the max-unavailable annotation.
/// Absent or unparsable values mean every eligible pod may be deleted.
pub fn max_unavailable(workload: &DaemonSet) -> Option<usize> {
    let raw = workload.annotations().get(MAX_UNAVAILABLE_ANNOTATION)?;
    match raw.parse::<usize>() {
        Ok(limit) => Some(limit),
        Err(_) => {
            warn!(
                "workload {} carries unparsable max-unavailable {:?}, deleting all eligible pods",
                workload.name(),
                raw
            );
            None
        },
    }
}

/// Label selector string built from the workload's matchLabels, empty when
/// none are set. Owner references do the authoritative filtering either way.
pub fn match_labels_selector(workload: &DaemonSet) -> String {
    workload
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.match_labels.as_ref())
        .map(|labels| labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<String>>().join(","))
        .unwrap_or_default()
}

pub fn is_controlled_by(pod: &Pod, owner_uid: Option<&str>) -> bool {
    let owner_uid = match owner_uid {
        Some(owner_uid) => owner_uid,
        None => return false,
    };
    pod.metadata
        .owner_references
        .as_ref()
        .map_or(false, |refs| refs.iter().any(|r| r.controller == Some(true) && r.uid == owner_uid))
}
