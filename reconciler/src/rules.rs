// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Keeping mirror ingress rules in line with their legacy groups

use crate::directory::{DirectoryError, SecurityGroupDirectory};
use crate::error::{error_chain, EntityError};
use crate::pairing::Pair;
use chrono::Utc;
use classic_mirror_types::ids::{GroupId, NetworkId};
use classic_mirror_types::rule::{GroupRef, IngressRule, RuleKey};
use classic_mirror_types::tags::{Tag, LAST_ERROR_TAG_KEY};
use futures::future::join_all;
use slog::{debug, info, o, warn, Logger};
use std::collections::{BTreeMap, BTreeSet};

/// Where a legacy group is mirrored to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappedMirror {
    pub mirror_id: GroupId,
    pub network_id: NetworkId,
}

/// Maps legacy group ids to mirror ids and back, over every synced pair
#[derive(Clone, Debug, Default)]
pub struct MirrorIdMap {
    legacy_to_mirror: BTreeMap<GroupId, MappedMirror>,
    mirror_to_legacy: BTreeMap<GroupId, GroupId>,
}

impl MirrorIdMap {
    pub fn from_pairs(pairs: &[Pair]) -> MirrorIdMap {
        let mut map = MirrorIdMap::default();
        for (legacy, mirror) in pairs.iter().filter_map(Pair::synced) {
            map.legacy_to_mirror.insert(
                legacy.id.clone(),
                MappedMirror {
                    mirror_id: mirror.id.clone(),
                    network_id: mirror.network_id.clone(),
                },
            );
            map.mirror_to_legacy.insert(mirror.id.clone(), legacy.id.clone());
        }
        map
    }

    pub fn mirror_of(&self, legacy_id: &GroupId) -> Option<&MappedMirror> {
        self.legacy_to_mirror.get(legacy_id)
    }

    pub fn legacy_of(&self, mirror_id: &GroupId) -> Option<&GroupId> {
        self.mirror_to_legacy.get(mirror_id)
    }

    pub fn is_empty(&self) -> bool {
        self.legacy_to_mirror.is_empty()
    }

    pub fn len(&self) -> usize {
        self.legacy_to_mirror.len()
    }

    pub fn legacy_ids(&self) -> Vec<GroupId> {
        self.legacy_to_mirror.keys().cloned().collect()
    }

    pub fn mirror_ids(&self) -> Vec<GroupId> {
        self.mirror_to_legacy.keys().cloned().collect()
    }
}

/// Rule fragments that would bring a mirror in line with its legacy group
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleDelta {
    pub authorize: Vec<IngressRule>,
    pub revoke: Vec<IngressRule>,
}

impl RuleDelta {
    pub fn is_empty(&self) -> bool {
        self.authorize.is_empty() && self.revoke.is_empty()
    }
}

fn merge_by_key(
    rules: impl Iterator<Item = IngressRule>,
) -> BTreeMap<RuleKey, IngressRule> {
    let mut merged: BTreeMap<RuleKey, IngressRule> = BTreeMap::new();
    for rule in rules {
        merged
            .entry(rule.key())
            .and_modify(|existing| existing.merge(&rule))
            .or_insert(rule);
    }
    merged
}

/// Computes what to authorize on and revoke from a mirror so that it admits
/// the same traffic as its legacy group
///
/// Address ranges are compared literally.  References to other groups are
/// compared after translating the legacy side into mirror ids: a legacy
/// reference to a group that is not mirrored has no counterpart and is
/// dropped, and a mirror reference to a group that is not one of our mirrors
/// was put there by somebody else and is left alone.
pub fn diff_rules(
    legacy_rules: &[IngressRule],
    mirror_rules: &[IngressRule],
    map: &MirrorIdMap,
) -> RuleDelta {
    let source = merge_by_key(legacy_rules.iter().map(|rule| IngressRule {
        group_refs: rule
            .group_refs
            .iter()
            .filter_map(|r| {
                map.mirror_of(&r.group_id).map(|mapped| {
                    GroupRef::new(r.owner_id.clone(), mapped.mirror_id.clone())
                })
            })
            .collect(),
        ..rule.clone()
    }));
    let target = merge_by_key(mirror_rules.iter().map(|rule| IngressRule {
        group_refs: rule
            .group_refs
            .iter()
            .filter(|r| map.legacy_of(&r.group_id).is_some())
            .cloned()
            .collect(),
        ..rule.clone()
    }));

    let mut delta = RuleDelta::default();
    let keys: BTreeSet<&RuleKey> = source.keys().chain(target.keys()).collect();
    for key in keys {
        let nothing = IngressRule::empty(key);
        let want = source.get(key).unwrap_or(&nothing);
        let have = target.get(key).unwrap_or(&nothing);

        let authorize = IngressRule {
            cidrs: want.cidrs.difference(&have.cidrs).cloned().collect(),
            group_refs: want
                .group_refs
                .difference(&have.group_refs)
                .cloned()
                .collect(),
            ..IngressRule::empty(key)
        };
        let revoke = IngressRule {
            cidrs: have.cidrs.difference(&want.cidrs).cloned().collect(),
            group_refs: have
                .group_refs
                .difference(&want.group_refs)
                .cloned()
                .collect(),
            ..IngressRule::empty(key)
        };
        if !authorize.is_empty() {
            delta.authorize.push(authorize);
        }
        if !revoke.is_empty() {
            delta.revoke.push(revoke);
        }
    }
    delta
}

/// Brings the rules of every synced pair's mirror in line with its legacy
/// group
///
/// The fragments sent are stored on the pair.  A failure to apply them is
/// recorded on the pair and in the mirror's last-error tag; pairs missing a
/// side pass through untouched.
pub async fn sync_rules(
    directory: &dyn SecurityGroupDirectory,
    pairs: Vec<Pair>,
    log: &Logger,
) -> Vec<Pair> {
    let log = log.new(o!("component" => "RuleSync"));
    let map = MirrorIdMap::from_pairs(&pairs);
    info!(log, "syncing rules"; "pairs" => map.len());

    join_all(
        pairs.into_iter().map(|pair| sync_pair(directory, pair, &map, &log)),
    )
    .await
}

async fn sync_pair(
    directory: &dyn SecurityGroupDirectory,
    mut pair: Pair,
    map: &MirrorIdMap,
    log: &Logger,
) -> Pair {
    let Some((legacy, mirror)) = pair.synced() else {
        return pair;
    };
    let legacy_id = legacy.id.clone();
    let mirror_id = mirror.id.clone();
    let delta = diff_rules(&legacy.rules, &mirror.rules, map);
    let log = log.new(o!(
        "legacy_id" => legacy_id.to_string(),
        "mirror_id" => mirror_id.to_string(),
    ));

    for rule in &delta.authorize {
        info!(log, "authorize"; "rule" => ?rule);
    }
    for rule in &delta.revoke {
        info!(log, "revoke"; "rule" => ?rule);
    }
    if delta.is_empty() {
        debug!(log, "rules already in sync");
    }

    let result = apply_delta(directory, &mirror_id, &delta).await;
    pair.to_authorize = delta.authorize;
    pair.to_revoke = delta.revoke;

    let now = Utc::now();
    let resource = [mirror_id.to_string()];
    match result {
        Ok(()) => {
            if let Err(error) = directory
                .delete_tags(&resource, &[Tag::key_only(LAST_ERROR_TAG_KEY)])
                .await
            {
                warn!(log, "failed to clear last error"; "error" => %error);
            }
            if let Err(error) =
                directory.create_tags(&resource, &[Tag::last_update(now)]).await
            {
                warn!(log, "failed to record update time"; "error" => %error);
            }
        }
        Err(source) => {
            let error = EntityError::SyncRules { legacy_id, mirror_id, source };
            warn!(log, "failed to sync rules"; "error" => error_chain(&error));
            let tags = [
                Tag::last_update(now),
                Tag::last_error(&error_chain(&error), now),
            ];
            if let Err(error) = directory.create_tags(&resource, &tags).await {
                warn!(log, "failed to record error"; "error" => %error);
            }
            pair.error.get_or_insert(error);
        }
    }
    pair
}

async fn apply_delta(
    directory: &dyn SecurityGroupDirectory,
    mirror_id: &GroupId,
    delta: &RuleDelta,
) -> Result<(), DirectoryError> {
    let authorize = async {
        if delta.authorize.is_empty() {
            return Ok(());
        }
        directory.authorize_ingress(mirror_id, &delta.authorize).await
    };
    let revoke = async {
        if delta.revoke.is_empty() {
            return Ok(());
        }
        directory.revoke_ingress(mirror_id, &delta.revoke).await
    };
    // Both calls run to completion even if one of them fails.
    let (authorized, revoked) = futures::join!(authorize, revoke);
    authorized.and(revoked)
}
