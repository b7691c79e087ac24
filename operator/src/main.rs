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

use anyhow::Result;
use env_logger::{Builder, Env, Target};
use futures::StreamExt;
use k8s_openapi::api::{apps::v1::DaemonSet, core::v1::Pod};
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::controller::{Context, Controller},
};
use log::{error, info};

mod controller;

use controller::{error_policy, reconcile, UpgradeController};

const OPERATOR_VERSION: Option<&'static str> = option_env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    Builder::from_env(Env::default().default_filter_or("operator=info")).target(Target::Stdout).init();
    let client = Client::try_default().await?;
    let workloads: Api<DaemonSet> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client.clone());
    let upgrade_controller = UpgradeController::new(client);
    info!("pod-upgrade operator version is {}, starting controller", OPERATOR_VERSION.unwrap_or("Not Found"));
    Controller::new(workloads, ListParams::default())
        .owns(pods, ListParams::default())
        .run(reconcile, error_policy, Context::new(upgrade_controller))
        .for_each(|res| async move {
            match res {
                Ok(_) => {},
                Err(e) => error!("reconcile failed: {}", e.to_string()),
            }
        })
        .await;
    info!("pod-upgrade operator terminated");
    Ok(())
}
