// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Errors produced while reconciling

use crate::directory::DirectoryError;
use classic_mirror_types::ids::{GroupId, InstanceId};
use std::fmt::Write;
use thiserror::Error;

/// A failure confined to one pair or one instance
///
/// These are recorded on the entity (and in its last-error tag) and do not
/// stop the rest of the run.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EntityError {
    #[error("legacy group {legacy_id} does not declare a target network")]
    MissingLinkTarget { legacy_id: GroupId },

    #[error("failed to create mirror for legacy group {legacy_id}")]
    CreateMirror {
        legacy_id: GroupId,
        #[source]
        source: DirectoryError,
    },

    #[error("failed to sync rules from {legacy_id} to {mirror_id}")]
    SyncRules {
        legacy_id: GroupId,
        mirror_id: GroupId,
        #[source]
        source: DirectoryError,
    },

    #[error("failed to link instance {instance_id}")]
    LinkInstance {
        instance_id: InstanceId,
        #[source]
        source: DirectoryError,
    },
}

/// Why a reconciliation run failed as a whole
#[derive(Debug, Error)]
pub enum RunError {
    /// Listing resources failed, so nothing past that point was attempted.
    /// `earlier` holds failures from stages that had already run.
    #[error("failed to enumerate resources")]
    Describe {
        #[source]
        source: DirectoryError,
        earlier: Vec<EntityError>,
    },

    /// Every stage ran, but some entities could not be brought in sync.
    #[error("{} entities failed to reconcile", .0.len())]
    EntityFailures(Vec<EntityError>),
}

/// Formats an error and all of its sources on one line, separated by `: `
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(message, ": {}", cause);
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chain_includes_directory_error() {
        let error = EntityError::CreateMirror {
            legacy_id: GroupId::new("sg-1"),
            source: DirectoryError::Conflict("group web in vpc-1".to_string()),
        };
        assert_eq!(
            error_chain(&error),
            "failed to create mirror for legacy group sg-1: \
             already exists: group web in vpc-1"
        );
    }
}
