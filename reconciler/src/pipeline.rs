// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One reconciliation run, from pairing to instance links

use crate::directory::{InstanceDirectory, SecurityGroupDirectory};
use crate::error::{error_chain, EntityError, RunError};
use crate::lifecycle::{cleanup_orphans, create_mirrors, CleanupOutcome};
use crate::links::link_instances;
use crate::pairing::describe_pairs;
use crate::rules::{sync_rules, MirrorIdMap};
use serde::Serialize;
use slog::{error, info, o, Logger};
use std::sync::Arc;
use uuid::Uuid;

/// Summary of a reconciliation run
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// pairs found at the start of the run
    pub pairs: usize,
    pub mirrors_created: usize,
    /// pairs missing a side after creation, including deleted orphans
    pub retired: usize,
    /// pairs with both sides whose rules were synced
    pub synced: usize,
    pub rules_authorized: usize,
    pub rules_revoked: usize,
    pub instances_relinked: usize,
    /// every per-entity failure, with its causes
    pub errors: Vec<String>,
    #[serde(skip)]
    entity_errors: Vec<EntityError>,
}

impl RunReport {
    pub fn entity_errors(&self) -> &[EntityError] {
        &self.entity_errors
    }

    pub fn is_clean(&self) -> bool {
        self.entity_errors.is_empty()
    }

    fn record(&mut self, error: &EntityError) {
        self.errors.push(error_chain(error));
        self.entity_errors.push(error.clone());
    }

    /// Turns a run with per-entity failures into an error
    pub fn into_result(self) -> Result<RunReport, RunError> {
        if self.entity_errors.is_empty() {
            Ok(self)
        } else {
            Err(RunError::EntityFailures(self.entity_errors))
        }
    }
}

/// Runs the reconciliation stages, in order, against a pair of directories
pub struct Reconciler {
    groups: Arc<dyn SecurityGroupDirectory>,
    instances: Arc<dyn InstanceDirectory>,
    log: Logger,
}

impl Reconciler {
    pub fn new(
        groups: Arc<dyn SecurityGroupDirectory>,
        instances: Arc<dyn InstanceDirectory>,
        log: &Logger,
    ) -> Reconciler {
        Reconciler {
            groups,
            instances,
            log: log.new(o!("component" => "Reconciler")),
        }
    }

    /// Runs every stage once
    ///
    /// Fails early only if resources could not be listed.  Otherwise the
    /// returned report carries whatever went wrong with individual groups and
    /// instances; use [`RunReport::into_result`] to treat those as failure.
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4();
        let log = self.log.new(o!("run_id" => run_id.to_string()));
        info!(log, "starting reconciliation");
        let mut report = RunReport { run_id, ..Default::default() };

        let groups = &*self.groups;
        let pairs = describe_pairs(groups, &log).await.map_err(|error| {
            error!(
                log,
                "failed to describe security groups";
                "error" => %error,
            );
            RunError::Describe { source: error, earlier: Vec::new() }
        })?;
        report.pairs = pairs.len();

        let pending = pairs
            .iter()
            .filter(|p| p.legacy.is_some() && p.mirror.is_none())
            .count();
        let pairs = create_mirrors(groups, pairs, &log).await;
        let failed = pairs
            .iter()
            .filter(|p| p.legacy.is_some() && p.mirror.is_none())
            .count();
        report.mirrors_created = pending - failed;

        let CleanupOutcome { active, retired } =
            cleanup_orphans(groups, pairs, &log).await;
        report.retired = retired.len();

        let active = sync_rules(groups, active, &log).await;
        report.synced = active.len();
        for pair in &active {
            report.rules_authorized += pair.to_authorize.len();
            report.rules_revoked += pair.to_revoke.len();
        }

        let pair_errors =
            retired.iter().chain(&active).filter_map(|p| p.error.as_ref());
        for error in pair_errors {
            report.record(error);
        }

        let map = MirrorIdMap::from_pairs(&active);
        let tasks = match link_instances(&*self.instances, &map, &log).await {
            Ok(tasks) => tasks,
            Err(error) => {
                error!(log, "failed to describe instances"; "error" => %error);
                for message in &report.errors {
                    error!(log, "earlier failure"; "error" => %message);
                }
                return Err(RunError::Describe {
                    source: error,
                    earlier: report.entity_errors,
                });
            }
        };
        report.instances_relinked =
            tasks.iter().filter(|t| t.error.is_none()).count();
        for error in tasks.iter().filter_map(|t| t.error.as_ref()) {
            report.record(error);
        }

        info!(
            log,
            "reconciliation finished";
            "pairs" => report.pairs,
            "mirrors_created" => report.mirrors_created,
            "rules_authorized" => report.rules_authorized,
            "rules_revoked" => report.rules_revoked,
            "instances_relinked" => report.instances_relinked,
            "errors" => report.errors.len(),
        );
        Ok(report)
    }
}
