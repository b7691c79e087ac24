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

use std::{path::PathBuf, process::exit};

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use common::values::MANIFEST_DIR;
use env_logger::{Builder, Env, Target};
use kube::Client;
use log::{error, info};

mod upgrade;

use upgrade::StaticPodUpgrader;

#[derive(Parser)]
#[clap(name = "upgrader")]
#[clap(author, version)]
#[clap(about = "Upgrade a static pod in place by swapping its manifest file")]
struct Cli {
    /// Name of the static pod which needs to be upgraded
    #[clap(long)]
    name: String,
    /// Namespace of the static pod which needs to be upgraded
    #[clap(long)]
    namespace: String,
    /// Manifest file base name of the static pod which needs to be upgraded
    #[clap(long)]
    manifest: String,
    /// Hash value of the new static pod specification
    #[clap(long)]
    hash: String,
    /// Upgrade mode which is used
    #[clap(long, value_enum)]
    mode: UpgradeMode,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum UpgradeMode {
    #[clap(name = "auto")]
    Auto,
    #[clap(name = "ota")]
    Ota,
}

// clap enforces flag presence, explicitly empty values still have to be rejected
fn validate(cli: &Cli) -> Result<()> {
    if cli.name.is_empty() || cli.namespace.is_empty() || cli.manifest.is_empty() || cli.hash.is_empty() {
        bail!(
            "args can not be empty, name is {:?}, namespace is {:?}, manifest is {:?}, hash is {:?}",
            cli.name,
            cli.namespace,
            cli.manifest,
            cli.hash
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    Builder::from_env(Env::default().default_filter_or("upgrader=info")).target(Target::Stdout).init();
    info!(
        "FLAG: --name={:?} --namespace={:?} --manifest={:?} --hash={:?} --mode={:?}",
        cli.name, cli.namespace, cli.manifest, cli.hash, cli.mode
    );
    if let Err(e) = validate(&cli) {
        error!("invalid static pod upgrade args: {}", e);
        exit(1);
    }
    let client = Client::try_default().await?;
    let upgrader = StaticPodUpgrader {
        client,
        namespace: cli.namespace,
        name: cli.name,
        manifest: cli.manifest,
        target_hash: cli.hash,
        manifest_dir: PathBuf::from(MANIFEST_DIR),
    };
    match upgrader.apply().await {
        Ok(()) => {
            info!("static pod upgrade success");
            Ok(())
        },
        Err(e) => {
            error!("failed to upgrade static pod: {}", e);
            exit(1);
        },
    }
}
