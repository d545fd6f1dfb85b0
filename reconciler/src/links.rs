// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Linking legacy instances to the mirrors of their groups
//!
//! A running instance that belongs to mirrored legacy groups should be linked
//! into the mirrors' network with exactly the mirrors of those groups.  The
//! set of groups on an existing link cannot be changed in place, so an
//! instance whose link is wrong is detached and then attached again.

use crate::directory::{linked_instances, DirectoryError, InstanceDirectory};
use crate::error::{error_chain, EntityError};
use crate::rules::MirrorIdMap;
use chrono::Utc;
use classic_mirror_types::ids::{GroupId, InstanceId, NetworkId};
use classic_mirror_types::instance::{Instance, LinkRecord};
use classic_mirror_types::tags::{Tag, LAST_ERROR_TAG_KEY};
use futures::future::join_all;
use futures::TryStreamExt;
use slog::{debug, info, o, warn, Logger};
use std::collections::{BTreeMap, BTreeSet};

/// What must be done to one instance's link
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceLinkTask {
    pub instance_id: InstanceId,
    /// network to attach to, if the instance should be linked at all
    pub target_network_id: Option<NetworkId>,
    /// mirror groups to attach with, sorted
    pub desired_group_ids: Vec<GroupId>,
    /// network of the current link, which has to be detached first
    pub existing_network_id: Option<NetworkId>,
    pub error: Option<EntityError>,
}

impl InstanceLinkTask {
    pub fn had_existing_link(&self) -> bool {
        self.existing_network_id.is_some()
    }
}

/// Works out which instances need their link changed
///
/// `instances` are the running members of mirrored legacy groups and
/// `linked` the current links involving our mirrors.  An instance whose
/// mirrored groups span more than one network cannot be linked and is
/// skipped.  The result is in instance id order.
pub fn plan_links(
    instances: &[Instance],
    linked: &[LinkRecord],
    map: &MirrorIdMap,
    log: &Logger,
) -> Vec<InstanceLinkTask> {
    let links: BTreeMap<&InstanceId, &LinkRecord> =
        linked.iter().map(|record| (&record.instance_id, record)).collect();
    let instances: BTreeMap<&InstanceId, &Instance> =
        instances.iter().map(|instance| (&instance.id, instance)).collect();

    let mut tasks = Vec::new();
    'instances: for (instance_id, instance) in instances {
        let mut target_network_id: Option<&NetworkId> = None;
        let mut desired = BTreeSet::new();
        for legacy_id in &instance.group_ids {
            let Some(mapped) = map.mirror_of(legacy_id) else {
                continue;
            };
            if let Some(network_id) = target_network_id {
                if *network_id != mapped.network_id {
                    warn!(
                        log,
                        "instance groups are mirrored into more than one \
                         network; skipping";
                        "instance_id" => %instance_id,
                        "network_id" => %network_id,
                        "other_network_id" => %mapped.network_id,
                    );
                    continue 'instances;
                }
            }
            target_network_id = Some(&mapped.network_id);
            desired.insert(mapped.mirror_id.clone());
        }
        let desired: Vec<GroupId> = desired.into_iter().collect();

        let existing = links.get(instance_id);
        let mut actual: Vec<GroupId> = existing
            .map(|record| record.group_ids.clone())
            .unwrap_or_default();
        actual.sort();

        if desired == actual {
            debug!(
                log,
                "instance already linked correctly";
                "instance_id" => %instance_id,
                "group_ids" => ?desired,
            );
            continue;
        }

        info!(
            log,
            "instance needs relinking";
            "instance_id" => %instance_id,
            "linked_to" => ?actual,
            "link_to" => ?desired,
            "network_id" => ?target_network_id,
        );
        tasks.push(InstanceLinkTask {
            instance_id: instance_id.clone(),
            target_network_id: target_network_id.cloned(),
            desired_group_ids: desired,
            existing_network_id: existing
                .map(|record| record.network_id.clone()),
            error: None,
        });
    }
    tasks
}

/// Links every running member of a mirrored legacy group to the mirrors of
/// its groups
///
/// Failing to list instances or their links fails the whole stage before
/// any link is touched.  After that, each instance is handled on its own: a
/// failure is recorded on its task and in its last-error tag.
pub async fn link_instances(
    directory: &dyn InstanceDirectory,
    map: &MirrorIdMap,
    log: &Logger,
) -> Result<Vec<InstanceLinkTask>, DirectoryError> {
    let log = log.new(o!("component" => "InstanceLinker"));
    if map.is_empty() {
        info!(log, "no mirrored groups; nothing to link");
        return Ok(Vec::new());
    }

    let legacy_ids = map.legacy_ids();
    let mirror_ids = map.mirror_ids();
    let instances =
        directory.describe_running_by_group_ids(&legacy_ids).await?;
    let linked: Vec<LinkRecord> =
        linked_instances(directory, &mirror_ids).try_collect().await?;
    info!(
        log,
        "found instances";
        "running" => instances.len(),
        "linked" => linked.len(),
    );

    let tasks = plan_links(&instances, &linked, map, &log);
    Ok(join_all(tasks.into_iter().map(|task| relink(directory, task, &log)))
        .await)
}

async fn relink(
    directory: &dyn InstanceDirectory,
    mut task: InstanceLinkTask,
    log: &Logger,
) -> InstanceLinkTask {
    let log = log.new(o!("instance_id" => task.instance_id.to_string()));
    let resource = [task.instance_id.to_string()];
    let now = Utc::now();

    match apply_link(directory, &task, &log).await {
        Ok(()) => {
            if let Err(error) = directory
                .delete_tags(&resource, &[Tag::key_only(LAST_ERROR_TAG_KEY)])
                .await
            {
                warn!(log, "failed to clear last error"; "error" => %error);
            }
        }
        Err(source) => {
            let error = EntityError::LinkInstance {
                instance_id: task.instance_id.clone(),
                source,
            };
            warn!(
                log,
                "failed to link instance";
                "error" => error_chain(&error),
            );
            if let Err(error) = directory
                .create_tags(
                    &resource,
                    &[Tag::last_error(&error_chain(&error), now)],
                )
                .await
            {
                warn!(log, "failed to record error"; "error" => %error);
            }
            task.error = Some(error);
        }
    }

    if let Err(error) =
        directory.create_tags(&resource, &[Tag::last_update(now)]).await
    {
        warn!(log, "failed to record update time"; "error" => %error);
    }
    task
}

async fn apply_link(
    directory: &dyn InstanceDirectory,
    task: &InstanceLinkTask,
    log: &Logger,
) -> Result<(), DirectoryError> {
    if let Some(network_id) = &task.existing_network_id {
        info!(log, "detaching"; "network_id" => %network_id);
        directory.detach(&task.instance_id, network_id).await?;
    }
    match &task.target_network_id {
        Some(network_id) if !task.desired_group_ids.is_empty() => {
            info!(
                log,
                "attaching";
                "network_id" => %network_id,
                "group_ids" => ?task.desired_group_ids,
            );
            directory
                .attach(&task.instance_id, network_id, &task.desired_group_ids)
                .await
        }
        _ => Ok(()),
    }
}
