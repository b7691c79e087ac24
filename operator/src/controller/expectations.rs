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
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use log::{debug, warn};

/// Entries older than this are treated as satisfied so a lost watch event can
/// never block a workload forever.
pub const EXPECTATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
struct ControlleeExpectations {
    adds: i64,
    dels: i64,
    timestamp: Instant,
}

impl ControlleeExpectations {
    fn fulfilled(&self) -> bool {
        self.adds <= 0 && self.dels <= 0
    }

    fn expired(&self) -> bool {
        self.timestamp.elapsed() > EXPECTATION_TIMEOUT
    }
}

/// Pending-action counters per workload key. A sync must not issue new
/// actions for a workload until the actions of the previous sync have been
/// observed, otherwise a delete can be issued twice before the first one
/// shows up in the watch stream.
#[derive(Debug, Default)]
pub struct ControllerExpectations {
    cache: Mutex<HashMap<String, ControlleeExpectations>>,
}

impl ControllerExpectations {
    fn cache(&self) -> MutexGuard<HashMap<String, ControlleeExpectations>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_expectations(&self, workload_key: &str, adds: i64, dels: i64) {
        debug!("setting expectations of {} to adds {}, dels {}", workload_key, adds, dels);
        self.cache().insert(
            workload_key.to_string(),
            ControlleeExpectations { adds, dels, timestamp: Instant::now() },
        );
    }

    pub fn expect_deletions(&self, workload_key: &str, dels: i64) {
        self.set_expectations(workload_key, 0, dels);
    }

    /// True when the workload has no pending actions. An expired entry counts
    /// as satisfied, with a logged anomaly.
    pub fn satisfied_expectations(&self, workload_key: &str) -> bool {
        match self.cache().get(workload_key) {
            Some(expectations) if expectations.fulfilled() => true,
            Some(expectations) if expectations.expired() => {
                warn!(
                    "expectations of {} expired after {:?} without being observed, treating them as satisfied",
                    workload_key, EXPECTATION_TIMEOUT
                );
                true
            },
            Some(_) => false,
            None => true,
        }
    }

    pub fn creation_observed(&self, workload_key: &str) {
        self.lower_expectations(workload_key, 1, 0);
    }

    pub fn deletion_observed(&self, workload_key: &str) {
        self.lower_expectations(workload_key, 0, 1);
    }

    pub fn delete_expectations(&self, workload_key: &str) {
        self.cache().remove(workload_key);
    }

    fn lower_expectations(&self, workload_key: &str, adds: i64, dels: i64) {
        let mut cache = self.cache();
        let expectations = match cache.get_mut(workload_key) {
            Some(expectations) => expectations,
            None => {
                debug!("observed an action of {} without expectations", workload_key);
                return;
            },
        };
        if expectations.adds - adds < 0 || expectations.dels - dels < 0 {
            warn!(
                "expectation counters of {} dropped below zero (adds {}, dels {}), clamping to zero",
                workload_key, expectations.adds, expectations.dels
            );
        }
        expectations.adds = (expectations.adds - adds).max(0);
        expectations.dels = (expectations.dels - dels).max(0);
        debug!(
            "lowered expectations of {} to adds {}, dels {}",
            workload_key, expectations.adds, expectations.dels
        );
    }

    #[cfg(test)]
    pub fn backdate(&self, workload_key: &str, age: Duration) {
        if let Some(expectations) = self.cache().get_mut(workload_key) {
            expectations.timestamp = Instant::now() - age;
        }
    }
}
