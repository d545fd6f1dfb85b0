// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tag vocabulary
//!
//! Tags on the managed resources are the only state the reconciler persists.
//! They record which legacy groups the user wants mirrored, which mirror
//! belongs to which legacy group, and when (and how) the last update of a
//! resource went.  These keys are read back from resources managed by earlier
//! runs, so they must never change.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Written by the user on a legacy group: value is the target network id
pub const LINK_TO_NETWORK_TAG_KEY: &str = "classicmirror:linkToVPC";

/// Written on a legacy group: value is the id of its mirror
pub const MIRRORED_TO_TAG_KEY: &str =
    "classicmirror:mirroredToVpcSecurityGroupId";

/// Written on a mirror group: value is the id of the legacy group it mirrors
pub const MIRRORED_FROM_TAG_KEY: &str =
    "classicmirror:mirroredFromClassicSecurityGroupId";

/// ISO-8601 time of the last update attempt
pub const LAST_UPDATE_TAG_KEY: &str = "classicmirror:lastUpdatedTime";

/// Truncated message and time of the last failed update
pub const LAST_ERROR_TAG_KEY: &str = "classicmirror:lastUpdateError";

/// The provider rejects tag values longer than this
pub const MAX_TAG_VALUE_LEN: usize = 255;

/// Error messages are cut down to this many characters before being written
/// into a tag value, leaving room for the quoting and the timestamp.
pub const MAX_ERROR_DETAIL: usize = 200;

/// Tags as reported on a resource, keyed by tag key
pub type TagMap = BTreeMap<String, String>;

/// A tag to create or delete
///
/// When deleting, a tag without a value matches any tag with the same key.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Tag {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Tag {
        Tag { key: key.into(), value: Some(value.into()) }
    }

    /// A tag that matches by key only (for deletion)
    pub fn key_only(key: impl Into<String>) -> Tag {
        Tag { key: key.into(), value: None }
    }

    pub fn last_update(now: DateTime<Utc>) -> Tag {
        Tag::new(LAST_UPDATE_TAG_KEY, timestamp_tag_value(now))
    }

    pub fn last_error(message: &str, now: DateTime<Utc>) -> Tag {
        Tag::new(LAST_ERROR_TAG_KEY, last_error_tag_value(message, now))
    }
}

/// Returns the value of `key` in `tags`, treating an empty value as absent
pub fn tag_value<'a>(tags: &'a TagMap, key: &str) -> Option<&'a str> {
    tags.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

/// Formats `now` the way every timestamp tag is written:
/// `2016-05-04T18:21:07.123Z`
pub fn timestamp_tag_value(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Formats an error for the last-error tag: `'<detail>' at <timestamp>`
///
/// The detail is shortened to [`MAX_ERROR_DETAIL`] characters so that the
/// whole value stays within [`MAX_TAG_VALUE_LEN`].
pub fn last_error_tag_value(message: &str, now: DateTime<Utc>) -> String {
    let detail = match message.char_indices().nth(MAX_ERROR_DETAIL) {
        Some((cut, _)) => format!("{}...", &message[..cut]),
        None => message.to_string(),
    };
    format!("'{}' at {}", detail, timestamp_tag_value(now))
}
