// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Creating mirrors for new legacy groups and cleaning up orphaned ones

use crate::directory::{DirectoryError, SecurityGroupDirectory};
use crate::error::{error_chain, EntityError};
use crate::pairing::Pair;
use chrono::Utc;
use classic_mirror_types::group::{LegacyGroup, MirrorGroup};
use classic_mirror_types::ids::GroupId;
use classic_mirror_types::tags::{
    Tag, LAST_ERROR_TAG_KEY, LAST_UPDATE_TAG_KEY, MIRRORED_FROM_TAG_KEY,
    MIRRORED_TO_TAG_KEY,
};
use futures::future::join_all;
use slog::{debug, error, info, o, warn, Logger};

/// Makes sure every pair with a legacy group has a mirror
///
/// Pairs that already have both sides just get their forward-reference tag
/// rewritten.  For the others a mirror is created (or, for the reserved
/// default group, the target network's own default group is adopted) and
/// both sides are tagged with each other's id.  If any step of that fails,
/// the error is recorded on the pair and whatever was created is undone.
pub async fn create_mirrors(
    directory: &dyn SecurityGroupDirectory,
    pairs: Vec<Pair>,
    log: &Logger,
) -> Vec<Pair> {
    let log = log.new(o!("component" => "MirrorCreator"));
    let ncreate = pairs
        .iter()
        .filter(|p| p.legacy.is_some() && p.mirror.is_none())
        .count();
    info!(log, "creating mirror groups"; "count" => ncreate);

    join_all(pairs.into_iter().map(|pair| ensure_mirror(directory, pair, &log)))
        .await
}

async fn ensure_mirror(
    directory: &dyn SecurityGroupDirectory,
    mut pair: Pair,
    log: &Logger,
) -> Pair {
    let Some(legacy) = &pair.legacy else {
        return pair;
    };
    let log = log.new(o!("legacy_id" => legacy.id.to_string()));

    if let Some(mirror) = &pair.mirror {
        // Keep the forward reference current in case somebody removed it.
        if let Err(error) =
            tag_legacy(directory, &legacy.id, &mirror.id).await
        {
            warn!(
                log,
                "failed to tag legacy group with its mirror";
                "mirror_id" => %mirror.id,
                "error" => %error,
            );
        }
        return pair;
    }

    let mut undo = CreationUndo { legacy_id: legacy.id.clone(), created: None };
    match create_and_tag(directory, legacy, &mut undo, &log).await {
        Ok(mirror) => {
            info!(log, "mirror ready"; "mirror_id" => %mirror.id);
            pair.mirror = Some(mirror);
        }
        Err(error) => {
            error!(
                log,
                "failed to create mirror";
                "error" => error_chain(&error),
            );
            undo.run(directory, &error, &log).await;
            pair.error = Some(error);
        }
    }
    pair
}

async fn tag_legacy(
    directory: &dyn SecurityGroupDirectory,
    legacy_id: &GroupId,
    mirror_id: &GroupId,
) -> Result<(), DirectoryError> {
    directory
        .create_tags(
            &[legacy_id.to_string()],
            &[Tag::new(MIRRORED_TO_TAG_KEY, mirror_id.as_str())],
        )
        .await
}

async fn create_and_tag(
    directory: &dyn SecurityGroupDirectory,
    legacy: &LegacyGroup,
    undo: &mut CreationUndo,
    log: &Logger,
) -> Result<MirrorGroup, EntityError> {
    let Some(network_id) = legacy.link_target() else {
        return Err(EntityError::MissingLinkTarget {
            legacy_id: legacy.id.clone(),
        });
    };
    let fail = |source: DirectoryError| EntityError::CreateMirror {
        legacy_id: legacy.id.clone(),
        source,
    };

    let mirror_id = if legacy.is_reserved_default {
        let group =
            directory.describe_default(&network_id).await.map_err(fail)?;
        info!(
            log,
            "adopting default group of target network";
            "mirror_id" => %group.id,
            "network_id" => %network_id,
        );
        undo.created = Some(Created { id: group.id.clone(), reserved: true });
        group.id
    } else {
        let id = directory
            .create_group(&network_id, &legacy.name, &legacy.description)
            .await
            .map_err(fail)?;
        info!(
            log,
            "created mirror group";
            "mirror_id" => %id,
            "network_id" => %network_id,
        );
        undo.created = Some(Created { id: id.clone(), reserved: false });
        id
    };

    directory
        .create_tags(
            &[mirror_id.to_string()],
            &[Tag::new(MIRRORED_FROM_TAG_KEY, legacy.id.as_str())],
        )
        .await
        .map_err(fail)?;
    tag_legacy(directory, &legacy.id, &mirror_id).await.map_err(fail)?;

    let group = directory
        .describe_by_ids(&[mirror_id.clone()])
        .await
        .map_err(fail)?
        .into_iter()
        .find(|g| g.id == mirror_id)
        .ok_or_else(|| {
            fail(DirectoryError::NotFound(format!(
                "security group {mirror_id}"
            )))
        })?;
    MirrorGroup::try_from(group)
        .map_err(|e| fail(DirectoryError::InvalidRequest(e.to_string())))
}

struct Created {
    id: GroupId,
    reserved: bool,
}

/// Undoes a failed mirror creation
///
/// Failures here are logged and otherwise ignored: the pair's error is
/// always the one that caused the undo.
struct CreationUndo {
    legacy_id: GroupId,
    created: Option<Created>,
}

impl CreationUndo {
    async fn run(
        self,
        directory: &dyn SecurityGroupDirectory,
        cause: &EntityError,
        log: &Logger,
    ) {
        let now = Utc::now();
        let tags =
            [Tag::last_update(now), Tag::last_error(&error_chain(cause), now)];
        if let Err(error) =
            directory.create_tags(&[self.legacy_id.to_string()], &tags).await
        {
            warn!(
                log,
                "failed to record error on legacy group";
                "error" => %error,
            );
        }

        match self.created {
            None => (),
            Some(Created { id, reserved: true }) => {
                debug!(
                    log,
                    "leaving adopted default group";
                    "mirror_id" => %id,
                );
            }
            Some(Created { id, reserved: false }) => {
                match directory.delete_group(&id).await {
                    Ok(()) => {
                        info!(log, "deleted partial mirror"; "mirror_id" => %id)
                    }
                    Err(error) => warn!(
                        log,
                        "failed to delete partial mirror";
                        "mirror_id" => %id,
                        "error" => %error,
                    ),
                }
            }
        }
    }
}

/// Result of [`cleanup_orphans`]
#[derive(Debug, Default)]
pub struct CleanupOutcome {
    /// pairs with both sides, which go on to rule sync
    pub active: Vec<Pair>,
    /// pairs missing a side, kept so that their errors can be reported
    pub retired: Vec<Pair>,
}

/// Removes mirrors whose legacy group is gone
///
/// A mirror that is its network's default group cannot be deleted, so it is
/// released by removing the tags we put on it instead.  Legacy groups still
/// without a mirror (because creation failed) are left alone.  Every pair
/// missing a side is retired whether or not its cleanup succeeded.
pub async fn cleanup_orphans(
    directory: &dyn SecurityGroupDirectory,
    pairs: Vec<Pair>,
    log: &Logger,
) -> CleanupOutcome {
    let log = log.new(o!("component" => "OrphanCleanup"));
    let (active, retired): (Vec<Pair>, Vec<Pair>) =
        pairs.into_iter().partition(Pair::is_synced);

    let cleanups = retired.iter().filter_map(|pair| {
        match (&pair.legacy, &pair.mirror) {
            (None, Some(mirror)) => {
                Some(release_mirror(directory, mirror, &log))
            }
            (Some(legacy), None) => {
                debug!(
                    log,
                    "legacy group has no mirror";
                    "legacy_id" => %legacy.id,
                );
                None
            }
            _ => None,
        }
    });
    join_all(cleanups).await;

    info!(
        log,
        "cleaned up orphans";
        "active" => active.len(),
        "retired" => retired.len(),
    );
    CleanupOutcome { active, retired }
}

async fn release_mirror(
    directory: &dyn SecurityGroupDirectory,
    mirror: &MirrorGroup,
    log: &Logger,
) {
    let log = log.new(o!("mirror_id" => mirror.id.to_string()));
    if mirror.is_reserved_default {
        let tags = [
            Tag::key_only(MIRRORED_FROM_TAG_KEY),
            Tag::key_only(LAST_UPDATE_TAG_KEY),
            Tag::key_only(LAST_ERROR_TAG_KEY),
        ];
        match directory.delete_tags(&[mirror.id.to_string()], &tags).await {
            Ok(()) => info!(log, "released orphaned default group"),
            Err(error) => warn!(
                log,
                "failed to untag orphaned default group";
                "error" => %error,
            ),
        }
    } else {
        match directory.delete_group(&mirror.id).await {
            Ok(()) => info!(log, "deleted orphaned mirror"),
            Err(error) => warn!(
                log,
                "failed to delete orphaned mirror";
                "error" => %error,
            ),
        }
    }
}
