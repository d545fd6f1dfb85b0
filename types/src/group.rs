// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Security groups in the legacy and virtual-network spaces

use crate::ids::{GroupId, NetworkId, OwnerId};
use crate::rule::IngressRule;
use crate::tags::{self, TagMap};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every network has exactly one group with this name.  It can be neither
/// created nor deleted, only tagged and have its rules changed.
pub const DEFAULT_GROUP_NAME: &str = "default";

/// A security group as described by the directory
///
/// Legacy groups have no `network_id`; groups in a virtual network do.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SecurityGroup {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub owner_id: OwnerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<NetworkId>,
    #[serde(default)]
    pub rules: Vec<IngressRule>,
    #[serde(default)]
    pub tags: TagMap,
}

impl SecurityGroup {
    /// Returns a legacy-space group with no rules and no tags
    pub fn new(
        id: impl Into<GroupId>,
        name: impl Into<String>,
        owner_id: impl Into<OwnerId>,
    ) -> SecurityGroup {
        SecurityGroup {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            owner_id: owner_id.into(),
            network_id: None,
            rules: Vec::new(),
            tags: TagMap::new(),
        }
    }

    pub fn in_network(mut self, network_id: impl Into<NetworkId>) -> Self {
        self.network_id = Some(network_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tag(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_rule(mut self, rule: IngressRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn is_reserved_default(&self) -> bool {
        self.name == DEFAULT_GROUP_NAME
    }
}

/// A group in the legacy space that the user asked us to mirror
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyGroup {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub owner_id: OwnerId,
    pub rules: Vec<IngressRule>,
    pub tags: TagMap,
    pub is_reserved_default: bool,
}

impl LegacyGroup {
    /// The network the user asked for this group to be mirrored into
    pub fn link_target(&self) -> Option<NetworkId> {
        tags::tag_value(&self.tags, tags::LINK_TO_NETWORK_TAG_KEY)
            .map(NetworkId::from)
    }

    /// The mirror this group was last known to be mirrored to
    pub fn mirrored_to(&self) -> Option<GroupId> {
        tags::tag_value(&self.tags, tags::MIRRORED_TO_TAG_KEY)
            .map(GroupId::from)
    }
}

impl From<SecurityGroup> for LegacyGroup {
    fn from(group: SecurityGroup) -> Self {
        let is_reserved_default = group.is_reserved_default();
        LegacyGroup {
            id: group.id,
            name: group.name,
            description: group.description,
            owner_id: group.owner_id,
            rules: group.rules,
            tags: group.tags,
            is_reserved_default,
        }
    }
}

/// A group in a virtual network that shadows a legacy group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorGroup {
    pub id: GroupId,
    pub network_id: NetworkId,
    pub name: String,
    pub description: String,
    pub rules: Vec<IngressRule>,
    pub tags: TagMap,
    pub is_reserved_default: bool,
}

impl MirrorGroup {
    /// The legacy group this mirror claims to have been created for
    pub fn mirrored_from(&self) -> Option<GroupId> {
        tags::tag_value(&self.tags, tags::MIRRORED_FROM_TAG_KEY)
            .map(GroupId::from)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("security group {0} does not belong to a network")]
pub struct NotInNetwork(pub GroupId);

impl TryFrom<SecurityGroup> for MirrorGroup {
    type Error = NotInNetwork;

    fn try_from(group: SecurityGroup) -> Result<Self, Self::Error> {
        let is_reserved_default = group.is_reserved_default();
        let Some(network_id) = group.network_id else {
            return Err(NotInNetwork(group.id));
        };
        Ok(MirrorGroup {
            id: group.id,
            network_id,
            name: group.name,
            description: group.description,
            rules: group.rules,
            tags: group.tags,
            is_reserved_default,
        })
    }
}
