// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Legacy compute instances and their cross-space links

use crate::ids::{GroupId, InstanceId, NetworkId};
use crate::tags::TagMap;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

/// An instance in the legacy space
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Instance {
    pub id: InstanceId,
    pub state: InstanceState,
    /// legacy security groups this instance is a member of
    #[serde(default)]
    pub group_ids: Vec<GroupId>,
    #[serde(default)]
    pub tags: TagMap,
}

/// An instance's attachment to a set of groups in a virtual network
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LinkRecord {
    pub instance_id: InstanceId,
    pub network_id: NetworkId,
    pub group_ids: Vec<GroupId>,
}

/// One page of link records
///
/// `next_token` is an opaque continuation token; when present there are more
/// records to fetch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LinkPage {
    pub records: Vec<LinkRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}
