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

use std::{fs, path::PathBuf};

use common::{
    hash::content_hash,
    values::{CONFIGMAP_NAMESPACE, CONFIGMAP_PREFIX, TMP_SUFFIX, UPGRADE_DIR, UPGRADE_SUFFIX, YAML_SUFFIX},
};
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::{api::Api, core::ErrorResponse, Client};
use log::{debug, info};
use upgrade_error::Error;

/// One-shot, in-place upgrade of a static pod manifest. The new content comes
/// from a staged file under the upgrade subdirectory, or failing that from a
/// fallback configmap, and becomes visible to kubelet through an atomic
/// rename over the active manifest path.
pub struct StaticPodUpgrader {
    pub client: Client,
    pub namespace: String,
    pub name: String,
    pub manifest: String,
    pub target_hash: String,
    pub manifest_dir: PathBuf,
}

impl StaticPodUpgrader {
    fn active_path(&self) -> PathBuf {
        self.manifest_dir.join(format!("{}{}", self.manifest, YAML_SUFFIX))
    }

    fn staged_path(&self) -> PathBuf {
        self.manifest_dir.join(UPGRADE_DIR).join(format!("{}{}", self.manifest, UPGRADE_SUFFIX))
    }

    fn tmp_path(&self) -> PathBuf {
        self.manifest_dir.join(format!("{}{}", self.manifest, TMP_SUFFIX))
    }

    fn configmap_name(&self) -> String {
        format!("{}{}-{}", CONFIGMAP_PREFIX, self.namespace, self.name)
    }

    /// Runs the upgrade. Re-running after a successful swap with the same
    /// target hash is a no-op success.
    pub async fn apply(&self) -> Result<(), Error> {
        let active = self.active_path();
        if active.exists() {
            let current = fs::read(&active)?;
            if content_hash(&current) == self.target_hash {
                info!("active manifest {} already matches hash {}, nothing to do", active.display(), self.target_hash);
                return Ok(());
            }
        }
        let content = self.resolve_content().await?;
        self.swap(&content)?;
        info!("swapped manifest {} to hash {}", active.display(), content_hash(content.as_bytes()));
        Ok(())
    }

    async fn resolve_content(&self) -> Result<String, Error> {
        let staged = self.staged_path();
        if staged.exists() {
            debug!("found staged manifest {}", staged.display());
            let content = fs::read_to_string(&staged)?;
            let actual = content_hash(content.as_bytes());
            if actual != self.target_hash {
                return Err(Error::HashMismatch {
                    path: staged.display().to_string(),
                    actual,
                    expect: self.target_hash.clone(),
                });
            }
            return Ok(content);
        }
        self.fallback_content().await
    }

    async fn fallback_content(&self) -> Result<String, Error> {
        let cm_name = self.configmap_name();
        debug!("no staged manifest, looking up fallback configmap {}/{}", CONFIGMAP_NAMESPACE, cm_name);
        let cm_api: Api<ConfigMap> = Api::namespaced(self.client.clone(), CONFIGMAP_NAMESPACE);
        let cm = match cm_api.get(&cm_name).await {
            Ok(cm) => cm,
            Err(kube::Error::Api(ErrorResponse { reason, .. })) if &reason == "NotFound" => {
                return Err(Error::MissingSource { namespace: self.namespace.clone(), name: self.name.clone() });
            },
            Err(e) => return Err(Error::KubeClient { source: e }),
        };
        let content = cm
            .data
            .as_ref()
            .and_then(|data| data.get(&self.manifest))
            .cloned()
            .ok_or_else(|| Error::MissingSource { namespace: self.namespace.clone(), name: self.name.clone() })?;
        serde_yaml::from_str::<Pod>(&content).map_err(|source| Error::InvalidManifest {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            source,
        })?;
        // keep a staged copy so a repeated invocation can re-read it
        self.write_staged(&content)?;
        Ok(content)
    }

    fn write_staged(&self, content: &str) -> Result<(), Error> {
        let staged = self.staged_path();
        if let Some(dir) = staged.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&staged, content)?;
        Ok(())
    }

    /* kubelet scans the manifest directory, so the new content has to appear
    through an atomic rename. At every instant the active path holds either
    the complete old manifest or the complete new one. */
    fn swap(&self, content: &str) -> Result<(), Error> {
        let tmp = self.tmp_path();
        fs::write(&tmp, content)?;
        if let Err(e) = fs::rename(&tmp, self.active_path()) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::Io { source: e });
        }
        Ok(())
    }
}

pub mod upgrade_error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Kubernetes reported error: {source}")]
        KubeClient {
            #[from]
            source: kube::Error,
        },

        #[error("Filesystem reported error: {source}")]
        Io {
            #[from]
            source: std::io::Error,
        },

        #[error("staged manifest {} hash is {}, expect {}, no swap performed", path, actual, expect)]
        HashMismatch { path: String, actual: String, expect: String },

        #[error("no staged manifest and no fallback configmap content for {}/{}", namespace, name)]
        MissingSource { namespace: String, name: String },

        #[error("fallback content for {}/{} does not parse as a pod manifest: {source}", namespace, name)]
        InvalidManifest {
            namespace: String,
            name: String,
            source: serde_yaml::Error,
        },
    }
}
