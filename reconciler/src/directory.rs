// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces to the provider's resource directories
//!
//! The reconciler never talks to the provider directly.  Everything it reads
//! and writes goes through these traits, which are implemented by the real
//! API client (outside this crate) and by the simulator in [`crate::sim`].

use async_trait::async_trait;
use classic_mirror_types::group::SecurityGroup;
use classic_mirror_types::ids::{GroupId, InstanceId, NetworkId};
use classic_mirror_types::instance::{Instance, LinkPage, LinkRecord};
use classic_mirror_types::rule::IngressRule;
use classic_mirror_types::tags::Tag;
use futures::stream;
use futures::Stream;
use futures::TryStreamExt;
use thiserror::Error;

/// Errors reported by a resource directory
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    /// The resource (or the rule being revoked) does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Something with the same identity already exists, e.g. a group with
    /// the requested name in the target network.
    #[error("already exists: {0}")]
    Conflict(String),
    /// The reserved default group of a network cannot be created or deleted.
    #[error("{0} is a reserved default group")]
    ReservedDefault(GroupId),
    /// The request was well-formed but cannot be carried out in the current
    /// state of the resource.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The directory could not be reached or failed internally.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Tagging is the same for every kind of resource.
#[async_trait]
pub trait ResourceTags: Send + Sync {
    /// Creates `tags` on every resource in `resource_ids`, replacing any
    /// existing values.
    async fn create_tags(
        &self,
        resource_ids: &[String],
        tags: &[Tag],
    ) -> Result<(), DirectoryError>;

    /// Deletes `tags` from every resource in `resource_ids`.  A tag without
    /// a value matches by key alone.
    async fn delete_tags(
        &self,
        resource_ids: &[String],
        tags: &[Tag],
    ) -> Result<(), DirectoryError>;
}

/// Security groups, in both spaces
#[async_trait]
pub trait SecurityGroupDirectory: ResourceTags {
    /// Lists every group carrying a tag with key `key`.
    async fn describe_by_tag_key(
        &self,
        key: &str,
    ) -> Result<Vec<SecurityGroup>, DirectoryError>;

    /// Describes the given groups.  Fails if any of them does not exist.
    async fn describe_by_ids(
        &self,
        ids: &[GroupId],
    ) -> Result<Vec<SecurityGroup>, DirectoryError>;

    /// Describes the reserved default group of `network_id`.
    async fn describe_default(
        &self,
        network_id: &NetworkId,
    ) -> Result<SecurityGroup, DirectoryError>;

    async fn create_group(
        &self,
        network_id: &NetworkId,
        name: &str,
        description: &str,
    ) -> Result<GroupId, DirectoryError>;

    async fn delete_group(&self, id: &GroupId) -> Result<(), DirectoryError>;

    async fn authorize_ingress(
        &self,
        id: &GroupId,
        rules: &[IngressRule],
    ) -> Result<(), DirectoryError>;

    async fn revoke_ingress(
        &self,
        id: &GroupId,
        rules: &[IngressRule],
    ) -> Result<(), DirectoryError>;
}

/// Legacy instances and their cross-space links
#[async_trait]
pub trait InstanceDirectory: ResourceTags {
    /// Lists running instances that are members of any of `group_ids`.
    async fn describe_running_by_group_ids(
        &self,
        group_ids: &[GroupId],
    ) -> Result<Vec<Instance>, DirectoryError>;

    /// Lists one page of link records for instances linked to any of
    /// `group_ids`.  Pass the previous page's `next_token` to continue.
    async fn describe_linked_page(
        &self,
        group_ids: &[GroupId],
        next_token: Option<String>,
    ) -> Result<LinkPage, DirectoryError>;

    /// Links a running, currently unlinked instance to `group_ids` (which
    /// must not be empty) in `network_id`.
    async fn attach(
        &self,
        instance_id: &InstanceId,
        network_id: &NetworkId,
        group_ids: &[GroupId],
    ) -> Result<(), DirectoryError>;

    /// Removes an instance's link to `network_id`.
    async fn detach(
        &self,
        instance_id: &InstanceId,
        network_id: &NetworkId,
    ) -> Result<(), DirectoryError>;
}

enum PageCursor {
    First,
    Next(String),
    Done,
}

/// Returns every link record for instances linked to any of `group_ids`,
/// following continuation tokens until the directory reports no more pages.
///
/// The stream does nothing until polled, and calling this again starts over
/// from the first page.
pub fn linked_instances<'a>(
    directory: &'a dyn InstanceDirectory,
    group_ids: &'a [GroupId],
) -> impl Stream<Item = Result<LinkRecord, DirectoryError>> + Send + 'a {
    stream::try_unfold(PageCursor::First, move |cursor| async move {
        let token = match cursor {
            PageCursor::First => None,
            PageCursor::Next(token) => Some(token),
            PageCursor::Done => return Ok(None),
        };
        let page = directory.describe_linked_page(group_ids, token).await?;
        let next = match page.next_token {
            Some(token) => PageCursor::Next(token),
            None => PageCursor::Done,
        };
        let records =
            stream::iter(page.records.into_iter().map(Ok::<_, DirectoryError>));
        Ok(Some((records, next)))
    })
    .try_flatten()
}
