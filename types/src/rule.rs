// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ingress rules

use crate::ids::{GroupId, OwnerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A reference from a rule to another security group
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
pub struct GroupRef {
    pub owner_id: OwnerId,
    pub group_id: GroupId,
}

impl GroupRef {
    pub fn new(
        owner_id: impl Into<OwnerId>,
        group_id: impl Into<GroupId>,
    ) -> Self {
        GroupRef { owner_id: owner_id.into(), group_id: group_id.into() }
    }
}

/// Identifies comparable rules: two rules with the same key describe the same
/// protocol and port range and differ only in who they admit.
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
pub struct RuleKey {
    pub protocol: String,
    pub from_port: Option<i32>,
    pub to_port: Option<i32>,
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port =
            |p: Option<i32>| p.map_or("*".to_string(), |p| p.to_string());
        write!(
            f,
            "{}:{}-{}",
            self.protocol,
            port(self.from_port),
            port(self.to_port)
        )
    }
}

/// One ingress rule (or a fragment of one, when authorizing or revoking)
///
/// Admits traffic on `protocol` between `from_port` and `to_port` from any of
/// `cidrs` and from members of any of the `group_refs`.  The provider rejects
/// requests carrying an empty list, so empty sets are left off the wire.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct IngressRule {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_port: Option<i32>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub cidrs: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub group_refs: BTreeSet<GroupRef>,
}

impl IngressRule {
    /// Returns a rule for `key` that admits nothing
    pub fn empty(key: &RuleKey) -> IngressRule {
        IngressRule {
            protocol: key.protocol.clone(),
            from_port: key.from_port,
            to_port: key.to_port,
            cidrs: BTreeSet::new(),
            group_refs: BTreeSet::new(),
        }
    }

    pub fn tcp(port: i32) -> IngressRule {
        IngressRule::empty(&RuleKey {
            protocol: "tcp".to_string(),
            from_port: Some(port),
            to_port: Some(port),
        })
    }

    pub fn with_cidr(mut self, cidr: impl Into<String>) -> IngressRule {
        self.cidrs.insert(cidr.into());
        self
    }

    pub fn with_group_ref(mut self, group_ref: GroupRef) -> IngressRule {
        self.group_refs.insert(group_ref);
        self
    }

    pub fn key(&self) -> RuleKey {
        RuleKey {
            protocol: self.protocol.clone(),
            from_port: self.from_port,
            to_port: self.to_port,
        }
    }

    /// A rule that admits nothing is never sent to the provider.
    pub fn is_empty(&self) -> bool {
        self.cidrs.is_empty() && self.group_refs.is_empty()
    }

    /// Adds everything `other` admits to this rule.
    pub fn merge(&mut self, other: &IngressRule) {
        self.cidrs.extend(other.cidrs.iter().cloned());
        self.group_refs.extend(other.group_refs.iter().cloned());
    }
}
