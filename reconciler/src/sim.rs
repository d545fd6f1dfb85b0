// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated resource directory
//!
//! Keeps security groups and instances in memory and enforces the parts of
//! the provider's contract the reconciler depends on: the reserved default
//! group cannot be created or deleted, group names are unique per network,
//! rule requests must not be empty, an instance must be running and unlinked
//! before it can be linked, and so on.  Any operation can be made to fail on
//! demand, and every call is recorded so that tests can check what was done.

use crate::directory::{
    DirectoryError, InstanceDirectory, ResourceTags, SecurityGroupDirectory,
};
use async_trait::async_trait;
use classic_mirror_types::group::{SecurityGroup, DEFAULT_GROUP_NAME};
use classic_mirror_types::ids::{GroupId, InstanceId, NetworkId, OwnerId};
use classic_mirror_types::instance::{
    Instance, InstanceState, LinkPage, LinkRecord,
};
use classic_mirror_types::rule::IngressRule;
use classic_mirror_types::tags::{Tag, TagMap};
use futures::lock::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Page size used for link records unless configured otherwise
pub const DEFAULT_PAGE_SIZE: usize = 5;

/// A simulated link between an instance and groups in a network
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimLink {
    pub network_id: NetworkId,
    pub group_ids: Vec<GroupId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimInstance {
    #[serde(flatten)]
    pub instance: Instance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<SimLink>,
}

impl SimInstance {
    pub fn running(id: &str) -> SimInstance {
        SimInstance {
            instance: Instance {
                id: InstanceId::new(id),
                state: InstanceState::Running,
                group_ids: Vec::new(),
                tags: TagMap::new(),
            },
            link: None,
        }
    }

    pub fn with_group(mut self, group_id: &str) -> SimInstance {
        self.instance.group_ids.push(GroupId::new(group_id));
        self
    }

    pub fn with_state(mut self, state: InstanceState) -> SimInstance {
        self.instance.state = state;
        self
    }

    pub fn with_link(
        mut self,
        network_id: &str,
        group_ids: &[&str],
    ) -> SimInstance {
        self.link = Some(SimLink {
            network_id: NetworkId::new(network_id),
            group_ids: group_ids.iter().copied().map(GroupId::new).collect(),
        });
        self
    }
}

fn default_owner() -> OwnerId {
    OwnerId::new("000000000000")
}

/// Everything the simulated directory knows about
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimState {
    /// owner of groups created by the simulator
    #[serde(default = "default_owner")]
    pub owner_id: OwnerId,
    #[serde(default)]
    pub groups: Vec<SecurityGroup>,
    #[serde(default)]
    pub instances: Vec<SimInstance>,
}

impl Default for SimState {
    fn default() -> Self {
        SimState {
            owner_id: default_owner(),
            groups: Vec::new(),
            instances: Vec::new(),
        }
    }
}

impl SimState {
    pub fn new() -> SimState {
        SimState::default()
    }

    pub fn group(&self, id: &str) -> Option<&SecurityGroup> {
        self.groups.iter().find(|g| g.id.as_str() == id)
    }

    pub fn instance(&self, id: &str) -> Option<&SimInstance> {
        self.instances.iter().find(|i| i.instance.id.as_str() == id)
    }

    /// Returns the groups in `network_id`
    pub fn groups_in(&self, network_id: &str) -> Vec<&SecurityGroup> {
        self.groups
            .iter()
            .filter(|g| {
                g.network_id.as_ref().map(NetworkId::as_str) == Some(network_id)
            })
            .collect()
    }

    fn tags_mut(&mut self, resource_id: &str) -> Option<&mut TagMap> {
        if let Some(group) =
            self.groups.iter_mut().find(|g| g.id.as_str() == resource_id)
        {
            return Some(&mut group.tags);
        }
        self.instances
            .iter_mut()
            .find(|i| i.instance.id.as_str() == resource_id)
            .map(|i| &mut i.instance.tags)
    }

    fn has_resource(&self, resource_id: &str) -> bool {
        self.group(resource_id).is_some()
            || self.instance(resource_id).is_some()
    }
}

/// Operations that can be made to fail
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SimOp {
    DescribeByTagKey,
    DescribeByIds,
    DescribeDefault,
    CreateGroup,
    DeleteGroup,
    CreateTags,
    DeleteTags,
    AuthorizeIngress,
    RevokeIngress,
    DescribeRunning,
    DescribeLinked,
    Attach,
    Detach,
}

/// One call made against the simulator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimCall {
    pub op: SimOp,
    /// the resource the call was about (group name for `CreateGroup`, network
    /// id for `DescribeDefault`, empty for listings)
    pub target: String,
}

struct SimInner {
    state: SimState,
    next_group_id: u32,
    page_size: usize,
    faults: BTreeSet<(SimOp, Option<String>)>,
    calls: Vec<SimCall>,
}

impl SimInner {
    /// Records a call about each of `targets`, then fails if any fault
    /// matches.
    fn enter(
        &mut self,
        op: SimOp,
        targets: &[&str],
    ) -> Result<(), DirectoryError> {
        if targets.is_empty() {
            self.calls.push(SimCall { op, target: String::new() });
        }
        for target in targets {
            self.calls.push(SimCall { op, target: target.to_string() });
        }
        let hit = self.faults.contains(&(op, None))
            || targets.iter().any(|target| {
                self.faults.contains(&(op, Some(target.to_string())))
            });
        if hit {
            return Err(DirectoryError::Unavailable(format!(
                "injected failure for {:?} on {:?}",
                op, targets
            )));
        }
        Ok(())
    }

    fn group_mut(
        &mut self,
        id: &GroupId,
    ) -> Result<&mut SecurityGroup, DirectoryError> {
        self.state
            .groups
            .iter_mut()
            .find(|g| &g.id == id)
            .ok_or_else(|| {
                DirectoryError::NotFound(format!("security group {id}"))
            })
    }

    fn instance_mut(
        &mut self,
        id: &InstanceId,
    ) -> Result<&mut SimInstance, DirectoryError> {
        self.state
            .instances
            .iter_mut()
            .find(|i| &i.instance.id == id)
            .ok_or_else(|| DirectoryError::NotFound(format!("instance {id}")))
    }
}

/// An in-memory directory of security groups and instances
pub struct SimDirectory {
    inner: Mutex<SimInner>,
}

impl SimDirectory {
    pub fn new(state: SimState) -> SimDirectory {
        SimDirectory::with_page_size(state, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(state: SimState, page_size: usize) -> SimDirectory {
        SimDirectory {
            inner: Mutex::new(SimInner {
                state,
                next_group_id: 0,
                page_size: page_size.max(1),
                faults: BTreeSet::new(),
                calls: Vec::new(),
            }),
        }
    }

    /// Makes every call of `op` fail
    pub async fn fail_always(&self, op: SimOp) {
        self.inner.lock().await.faults.insert((op, None));
    }

    /// Makes calls of `op` about `target` fail
    pub async fn fail_for(&self, op: SimOp, target: &str) {
        self.inner.lock().await.faults.insert((op, Some(target.to_string())));
    }

    pub async fn clear_faults(&self) {
        self.inner.lock().await.faults.clear();
    }

    pub async fn snapshot(&self) -> SimState {
        self.inner.lock().await.state.clone()
    }

    pub async fn calls(&self) -> Vec<SimCall> {
        self.inner.lock().await.calls.clone()
    }

    /// Returns the calls of `op` made so far, by target
    pub async fn calls_of(&self, op: SimOp) -> Vec<String> {
        self.inner
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.op == op)
            .map(|c| c.target.clone())
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.inner.lock().await.calls.clear();
    }
}

fn reject_empty_rules(rules: &[IngressRule]) -> Result<(), DirectoryError> {
    if rules.is_empty() {
        return Err(DirectoryError::InvalidRequest(
            "no rules in request".to_string(),
        ));
    }
    if let Some(rule) = rules.iter().find(|r| r.is_empty()) {
        return Err(DirectoryError::InvalidRequest(format!(
            "rule {} has neither address ranges nor group references",
            rule.key()
        )));
    }
    Ok(())
}

#[async_trait]
impl ResourceTags for SimDirectory {
    async fn create_tags(
        &self,
        resource_ids: &[String],
        tags: &[Tag],
    ) -> Result<(), DirectoryError> {
        let mut inner = self.inner.lock().await;
        let targets: Vec<&str> =
            resource_ids.iter().map(String::as_str).collect();
        inner.enter(SimOp::CreateTags, &targets)?;
        if let Some(missing) =
            resource_ids.iter().find(|id| !inner.state.has_resource(id))
        {
            return Err(DirectoryError::NotFound(format!("resource {missing}")));
        }
        for id in resource_ids {
            if let Some(resource_tags) = inner.state.tags_mut(id) {
                for tag in tags {
                    resource_tags.insert(
                        tag.key.clone(),
                        tag.value.clone().unwrap_or_default(),
                    );
                }
            }
        }
        Ok(())
    }

    async fn delete_tags(
        &self,
        resource_ids: &[String],
        tags: &[Tag],
    ) -> Result<(), DirectoryError> {
        let mut inner = self.inner.lock().await;
        let targets: Vec<&str> =
            resource_ids.iter().map(String::as_str).collect();
        inner.enter(SimOp::DeleteTags, &targets)?;
        if let Some(missing) =
            resource_ids.iter().find(|id| !inner.state.has_resource(id))
        {
            return Err(DirectoryError::NotFound(format!("resource {missing}")));
        }
        for id in resource_ids {
            if let Some(resource_tags) = inner.state.tags_mut(id) {
                resource_tags.retain(|key, value| {
                    !tags.iter().any(|tag| {
                        &tag.key == key
                            && tag.value.as_ref().map_or(true, |v| v == value)
                    })
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SecurityGroupDirectory for SimDirectory {
    async fn describe_by_tag_key(
        &self,
        key: &str,
    ) -> Result<Vec<SecurityGroup>, DirectoryError> {
        let mut inner = self.inner.lock().await;
        inner.enter(SimOp::DescribeByTagKey, &[key])?;
        Ok(inner
            .state
            .groups
            .iter()
            .filter(|g| g.tags.contains_key(key))
            .cloned()
            .collect())
    }

    async fn describe_by_ids(
        &self,
        ids: &[GroupId],
    ) -> Result<Vec<SecurityGroup>, DirectoryError> {
        let mut inner = self.inner.lock().await;
        let targets: Vec<&str> = ids.iter().map(GroupId::as_str).collect();
        inner.enter(SimOp::DescribeByIds, &targets)?;
        ids.iter()
            .map(|id| {
                inner.state.group(id.as_str()).cloned().ok_or_else(|| {
                    DirectoryError::NotFound(format!("security group {id}"))
                })
            })
            .collect()
    }

    async fn describe_default(
        &self,
        network_id: &NetworkId,
    ) -> Result<SecurityGroup, DirectoryError> {
        let mut inner = self.inner.lock().await;
        inner.enter(SimOp::DescribeDefault, &[network_id.as_str()])?;
        inner
            .state
            .groups_in(network_id.as_str())
            .into_iter()
            .find(|g| g.is_reserved_default())
            .cloned()
            .ok_or_else(|| {
                DirectoryError::NotFound(format!(
                    "default security group of {network_id}"
                ))
            })
    }

    async fn create_group(
        &self,
        network_id: &NetworkId,
        name: &str,
        description: &str,
    ) -> Result<GroupId, DirectoryError> {
        let mut inner = self.inner.lock().await;
        inner.enter(SimOp::CreateGroup, &[name])?;
        if name == DEFAULT_GROUP_NAME {
            return Err(DirectoryError::InvalidRequest(format!(
                "cannot use reserved security group name: {name}"
            )));
        }
        if inner
            .state
            .groups_in(network_id.as_str())
            .iter()
            .any(|g| g.name == name)
        {
            return Err(DirectoryError::Conflict(format!(
                "security group '{name}' already exists in {network_id}"
            )));
        }
        // State loaded from a file may already hold generated ids.
        let id = loop {
            let id = GroupId::new(format!("sg-sim-{:04}", inner.next_group_id));
            inner.next_group_id += 1;
            if inner.state.group(id.as_str()).is_none() {
                break id;
            }
        };
        let group =
            SecurityGroup::new(id.clone(), name, inner.state.owner_id.clone())
                .with_description(description)
                .in_network(network_id.clone());
        inner.state.groups.push(group);
        Ok(id)
    }

    async fn delete_group(&self, id: &GroupId) -> Result<(), DirectoryError> {
        let mut inner = self.inner.lock().await;
        inner.enter(SimOp::DeleteGroup, &[id.as_str()])?;
        let group = inner.group_mut(id)?;
        if group.is_reserved_default() {
            return Err(DirectoryError::ReservedDefault(id.clone()));
        }
        inner.state.groups.retain(|g| &g.id != id);
        Ok(())
    }

    async fn authorize_ingress(
        &self,
        id: &GroupId,
        rules: &[IngressRule],
    ) -> Result<(), DirectoryError> {
        let mut inner = self.inner.lock().await;
        inner.enter(SimOp::AuthorizeIngress, &[id.as_str()])?;
        reject_empty_rules(rules)?;
        let group = inner.group_mut(id)?;

        // Validate everything before changing anything.
        for rule in rules {
            let key = rule.key();
            if let Some(existing) =
                group.rules.iter().find(|r| r.key() == key)
            {
                let dup_cidr = rule.cidrs.intersection(&existing.cidrs).next();
                let dup_ref =
                    rule.group_refs.intersection(&existing.group_refs).next();
                if dup_cidr.is_some() || dup_ref.is_some() {
                    return Err(DirectoryError::Conflict(format!(
                        "rule {key} already exists on {id}"
                    )));
                }
            }
        }
        for rule in rules {
            let key = rule.key();
            match group.rules.iter_mut().find(|r| r.key() == key) {
                Some(existing) => existing.merge(rule),
                None => group.rules.push(rule.clone()),
            }
        }
        Ok(())
    }

    async fn revoke_ingress(
        &self,
        id: &GroupId,
        rules: &[IngressRule],
    ) -> Result<(), DirectoryError> {
        let mut inner = self.inner.lock().await;
        inner.enter(SimOp::RevokeIngress, &[id.as_str()])?;
        reject_empty_rules(rules)?;
        let group = inner.group_mut(id)?;

        for rule in rules {
            let key = rule.key();
            let found = group.rules.iter().find(|r| r.key() == key).is_some_and(
                |existing| {
                    rule.cidrs.is_subset(&existing.cidrs)
                        && rule.group_refs.is_subset(&existing.group_refs)
                },
            );
            if !found {
                return Err(DirectoryError::NotFound(format!(
                    "rule {key} on {id}"
                )));
            }
        }
        for rule in rules {
            let key = rule.key();
            if let Some(existing) =
                group.rules.iter_mut().find(|r| r.key() == key)
            {
                existing.cidrs.retain(|c| !rule.cidrs.contains(c));
                existing.group_refs.retain(|g| !rule.group_refs.contains(g));
            }
        }
        group.rules.retain(|r| !r.is_empty());
        Ok(())
    }
}

#[async_trait]
impl InstanceDirectory for SimDirectory {
    async fn describe_running_by_group_ids(
        &self,
        group_ids: &[GroupId],
    ) -> Result<Vec<Instance>, DirectoryError> {
        let mut inner = self.inner.lock().await;
        inner.enter(SimOp::DescribeRunning, &[])?;
        Ok(inner
            .state
            .instances
            .iter()
            .filter(|i| i.instance.state == InstanceState::Running)
            .filter(|i| {
                i.instance.group_ids.iter().any(|g| group_ids.contains(g))
            })
            .map(|i| i.instance.clone())
            .collect())
    }

    async fn describe_linked_page(
        &self,
        group_ids: &[GroupId],
        next_token: Option<String>,
    ) -> Result<LinkPage, DirectoryError> {
        let mut inner = self.inner.lock().await;
        inner.enter(SimOp::DescribeLinked, &[])?;
        let start = match next_token {
            None => 0,
            Some(token) => token.parse::<usize>().map_err(|_| {
                DirectoryError::InvalidRequest(format!(
                    "bad page token {token:?}"
                ))
            })?,
        };
        let matching: Vec<LinkRecord> = inner
            .state
            .instances
            .iter()
            .filter_map(|i| {
                let link = i.link.as_ref()?;
                link.group_ids.iter().any(|g| group_ids.contains(g)).then(|| {
                    LinkRecord {
                        instance_id: i.instance.id.clone(),
                        network_id: link.network_id.clone(),
                        group_ids: link.group_ids.clone(),
                    }
                })
            })
            .collect();
        let end = (start + inner.page_size).min(matching.len());
        let records = matching.get(start..end).unwrap_or_default().to_vec();
        let next_token = (end < matching.len()).then(|| end.to_string());
        Ok(LinkPage { records, next_token })
    }

    async fn attach(
        &self,
        instance_id: &InstanceId,
        network_id: &NetworkId,
        group_ids: &[GroupId],
    ) -> Result<(), DirectoryError> {
        let mut inner = self.inner.lock().await;
        inner.enter(SimOp::Attach, &[instance_id.as_str()])?;
        if group_ids.is_empty() {
            return Err(DirectoryError::InvalidRequest(
                "at least one security group is required".to_string(),
            ));
        }
        if let Some(stray) = group_ids.iter().find(|g| {
            inner.state.group(g.as_str()).and_then(|g| g.network_id.as_ref())
                != Some(network_id)
        }) {
            return Err(DirectoryError::InvalidRequest(format!(
                "security group {stray} is not in {network_id}"
            )));
        }
        let instance = inner.instance_mut(instance_id)?;
        if instance.instance.state != InstanceState::Running {
            return Err(DirectoryError::InvalidRequest(format!(
                "instance {instance_id} is not running"
            )));
        }
        if let Some(link) = &instance.link {
            return Err(DirectoryError::InvalidRequest(format!(
                "instance {instance_id} is already linked to {}",
                link.network_id
            )));
        }
        instance.link = Some(SimLink {
            network_id: network_id.clone(),
            group_ids: group_ids.to_vec(),
        });
        Ok(())
    }

    async fn detach(
        &self,
        instance_id: &InstanceId,
        network_id: &NetworkId,
    ) -> Result<(), DirectoryError> {
        let mut inner = self.inner.lock().await;
        inner.enter(SimOp::Detach, &[instance_id.as_str()])?;
        let instance = inner.instance_mut(instance_id)?;
        let linked_to = instance.link.as_ref().map(|l| l.network_id.clone());
        match linked_to {
            None => Err(DirectoryError::InvalidRequest(format!(
                "instance {instance_id} is not linked"
            ))),
            Some(linked_to) if &linked_to != network_id => {
                Err(DirectoryError::InvalidRequest(format!(
                    "instance {instance_id} is linked to {linked_to}, not \
                     {network_id}"
                )))
            }
            Some(_) => {
                instance.link = None;
                Ok(())
            }
        }
    }
}
