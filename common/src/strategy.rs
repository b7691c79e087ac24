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

use k8s_openapi::api::apps::v1::DaemonSet;
use kube::ResourceExt;
use log::warn;

use crate::values::{AUTO_UPGRADE, OTA_UPGRADE, UPGRADE_ANNOTATION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeStrategy {
    /// The operator deletes outdated pods on ready nodes and lets the
    /// ordinary creation path recreate them from the new template.
    Auto,
    /// Pods are upgraded in place by the node-local static-pod upgrader;
    /// the operator never deletes them.
    Ota,
    Unmanaged,
}

/// Reads the upgrade strategy annotation of a workload. A missing annotation
/// means the workload is not managed by this operator; an unrecognized value
/// is logged and treated the same way.
pub fn determine_strategy(workload: &DaemonSet) -> UpgradeStrategy {
    match workload.annotations().get(UPGRADE_ANNOTATION).map(String::as_str) {
        Some(AUTO_UPGRADE) => UpgradeStrategy::Auto,
        Some(OTA_UPGRADE) => UpgradeStrategy::Ota,
        Some(other) => {
            warn!("workload {} carries unrecognized upgrade strategy {:?}, leaving it unmanaged", workload.name(), other);
            UpgradeStrategy::Unmanaged
        },
        None => UpgradeStrategy::Unmanaged,
    }
}
