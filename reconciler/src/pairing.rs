// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pairing legacy groups with their mirrors
//!
//! A pair may have:
//!
//! * just a legacy group: its mirror has yet to be created;
//! * both sides: the legacy group is already being mirrored;
//! * just a mirror: it was created for a legacy group that has since been
//!   deleted or untagged (or it lost a claim to some other mirror), so it
//!   should be cleaned up.

use crate::directory::DirectoryError;
use crate::directory::SecurityGroupDirectory;
use crate::error::EntityError;
use classic_mirror_types::group::{LegacyGroup, MirrorGroup, SecurityGroup};
use classic_mirror_types::ids::GroupId;
use classic_mirror_types::rule::IngressRule;
use classic_mirror_types::tags::{
    LINK_TO_NETWORK_TAG_KEY, MIRRORED_FROM_TAG_KEY,
};
use slog::{debug, info, warn, Logger};
use std::collections::BTreeMap;
use std::fmt;

/// A legacy group and its mirror, as far as we know them during one run
#[derive(Clone, Debug, Default)]
pub struct Pair {
    pub legacy: Option<LegacyGroup>,
    pub mirror: Option<MirrorGroup>,
    /// the first failure encountered while reconciling this pair
    pub error: Option<EntityError>,
    /// rule fragments authorized on the mirror by the last rule sync
    pub to_authorize: Vec<IngressRule>,
    /// rule fragments revoked from the mirror by the last rule sync
    pub to_revoke: Vec<IngressRule>,
}

impl Pair {
    pub fn legacy_only(legacy: LegacyGroup) -> Pair {
        Pair { legacy: Some(legacy), ..Default::default() }
    }

    pub fn mirror_only(mirror: MirrorGroup) -> Pair {
        Pair { mirror: Some(mirror), ..Default::default() }
    }

    /// Returns both sides if this pair has them
    pub fn synced(&self) -> Option<(&LegacyGroup, &MirrorGroup)> {
        match (&self.legacy, &self.mirror) {
            (Some(legacy), Some(mirror)) => Some((legacy, mirror)),
            _ => None,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.synced().is_some()
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let legacy = self.legacy.as_ref().map_or("NONE", |g| g.id.as_str());
        let mirror = self.mirror.as_ref().map_or("NONE", |g| g.id.as_str());
        write!(f, "{} --> {}", legacy, mirror)
    }
}

/// Fetches the groups we manage in both spaces and pairs them up
///
/// Failures to list groups are not handled here: without both lists there is
/// nothing safe to do, so the caller should fail the run.
pub async fn describe_pairs(
    directory: &dyn SecurityGroupDirectory,
    log: &Logger,
) -> Result<Vec<Pair>, DirectoryError> {
    let (legacy, mirrors) = tokio::try_join!(
        directory.describe_by_tag_key(LINK_TO_NETWORK_TAG_KEY),
        directory.describe_by_tag_key(MIRRORED_FROM_TAG_KEY),
    )?;
    Ok(resolve_pairs(legacy, mirrors, log))
}

/// Pairs legacy groups (those the user tagged for mirroring) with mirror
/// groups (those we tagged with the legacy group they were created for)
///
/// The result depends only on the contents of the two lists, not on their
/// order: legacy-seeded pairs come first in legacy id order, followed by
/// orphaned mirrors in mirror id order.
pub fn resolve_pairs(
    legacy: Vec<SecurityGroup>,
    mirrors: Vec<SecurityGroup>,
    log: &Logger,
) -> Vec<Pair> {
    let mut legacy: Vec<LegacyGroup> =
        legacy.into_iter().map(LegacyGroup::from).collect();
    legacy.sort_by(|a, b| a.id.cmp(&b.id));
    legacy.dedup_by(|a, b| a.id == b.id);

    let mut pairs: Vec<Pair> =
        legacy.into_iter().map(Pair::legacy_only).collect();
    let by_legacy_id: BTreeMap<GroupId, usize> = pairs
        .iter()
        .enumerate()
        .filter_map(|(i, pair)| pair.legacy.as_ref().map(|g| (g.id.clone(), i)))
        .collect();

    // Visit mirrors in id order so that when two of them claim the same
    // legacy group, the same one wins no matter how they were listed.
    let mut mirrors: Vec<MirrorGroup> = mirrors
        .into_iter()
        .filter_map(|group| match MirrorGroup::try_from(group) {
            Ok(mirror) => Some(mirror),
            Err(error) => {
                warn!(log, "ignoring mirror-tagged group"; "error" => %error);
                None
            }
        })
        .collect();
    mirrors.sort_by(|a, b| a.id.cmp(&b.id));
    mirrors.dedup_by(|a, b| a.id == b.id);

    let mut orphans = Vec::new();
    for mirror in mirrors {
        let claimed = mirror
            .mirrored_from()
            .and_then(|legacy_id| by_legacy_id.get(&legacy_id).copied());
        let Some(pair) = claimed.map(|i| &mut pairs[i]) else {
            orphans.push(Pair::mirror_only(mirror));
            continue;
        };
        let Some(legacy) = &pair.legacy else {
            orphans.push(Pair::mirror_only(mirror));
            continue;
        };

        let link_target = legacy.link_target();
        if link_target.as_ref() != Some(&mirror.network_id) {
            warn!(
                log,
                "mirror is not in the network its legacy group links to";
                "mirror_id" => %mirror.id,
                "legacy_id" => %legacy.id,
                "link_target" => ?link_target,
                "mirror_network_id" => %mirror.network_id,
            );
            orphans.push(Pair::mirror_only(mirror));
        } else if let Some(existing) = &pair.mirror {
            warn!(
                log,
                "legacy group is already mirrored by another group";
                "mirror_id" => %mirror.id,
                "legacy_id" => %legacy.id,
                "existing_mirror_id" => %existing.id,
            );
            orphans.push(Pair::mirror_only(mirror));
        } else {
            pair.mirror = Some(mirror);
        }
    }
    pairs.extend(orphans);

    for (i, pair) in pairs.iter().enumerate() {
        debug!(log, "pair {}: {}", i, pair);
    }
    info!(
        log,
        "resolved security group pairs";
        "total" => pairs.len(),
        "synced" => pairs.iter().filter(|p| p.is_synced()).count(),
    );
    pairs
}
