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

use kube::runtime::controller::Action;
use tokio::time::Duration;

/// Per-workload annotation selecting how its pods are upgraded.
pub const UPGRADE_ANNOTATION: &str = "upgrade.openeuler.org/upgrade-strategy";
pub const AUTO_UPGRADE: &str = "auto";
pub const OTA_UPGRADE: &str = "ota";

/// Optional per-workload annotation bounding how many outdated pods one sync may delete.
pub const MAX_UNAVAILABLE_ANNOTATION: &str = "upgrade.openeuler.org/max-unavailable";

/// Label stamped on pods with the digest of the template they were created from.
pub const LABEL_TEMPLATE_HASH: &str = "upgrade.openeuler.org/pod-template-hash";

pub const MANIFEST_DIR: &str = "/etc/kubernetes/manifests";
pub const UPGRADE_DIR: &str = "upgrade";
pub const YAML_SUFFIX: &str = ".yaml";
pub const UPGRADE_SUFFIX: &str = ".upgrade";
pub const TMP_SUFFIX: &str = ".tmp";

/// Fallback manifest content lives in a configmap named `static-pod-<namespace>-<name>`.
pub const CONFIGMAP_NAMESPACE: &str = "kube-system";
pub const CONFIGMAP_PREFIX: &str = "static-pod-";

pub fn no_requeue() -> Action {
    Action::await_change()
}

pub fn requeue_normal() -> Action {
    Action::requeue(Duration::from_secs(15))
}

pub fn requeue_error() -> Action {
    Action::requeue(Duration::from_secs(1))
}
