// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deciding whether an incoming event could require a reconciliation run
//!
//! Runs are triggered by change notifications.  Most of them have nothing to
//! do with mirrored groups, and some are caused by our own changes; both kinds
//! are filtered out here so that a run is not started for nothing.

use async_trait::async_trait;
use classic_mirror_types::tags::LINK_TO_NETWORK_TAG_KEY;
use serde::Deserialize;
use slog::{debug, Logger};
use thiserror::Error;

pub const DETAIL_TYPE_API_CALL: &str = "AWS API Call via CloudTrail";
pub const DETAIL_TYPE_INSTANCE_STATE: &str =
    "EC2 Instance State-change Notification";

/// API calls that may change what we mirror, regardless of their parameters
const RELEVANT_CALLS: &[&str] = &[
    "AuthorizeSecurityGroupIngress",
    "RevokeSecurityGroupIngress",
    "DeleteSecurityGroup",
    "RunInstances",
];

/// A change notification, as far as we care about it
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Event {
    #[serde(rename = "detail-type", default)]
    pub detail_type: Option<String>,
    #[serde(default)]
    pub detail: Option<EventDetail>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetail {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub user_identity: Option<UserIdentity>,
    #[serde(default)]
    pub request_parameters: Option<RequestParameters>,
    /// new state, for instance state changes
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    #[serde(default)]
    pub session_context: Option<SessionContext>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    #[serde(default)]
    pub session_issuer: Option<SessionIssuer>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SessionIssuer {
    #[serde(rename = "type", default)]
    pub issuer_type: Option<String>,
    #[serde(default)]
    pub arn: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestParameters {
    #[serde(default)]
    pub tag_set: Option<TagSet>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TagSet {
    #[serde(default)]
    pub items: Vec<TagItem>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TagItem {
    #[serde(default)]
    pub key: Option<String>,
}

impl EventDetail {
    /// The role that made an API call, if it was made under a role
    pub fn caller_role(&self) -> Option<&str> {
        let issuer = self
            .user_identity
            .as_ref()?
            .session_context
            .as_ref()?
            .session_issuer
            .as_ref()?;
        match issuer.issuer_type.as_deref() {
            Some("Role") => issuer.arn.as_deref(),
            _ => None,
        }
    }

    fn tag_keys(&self) -> impl Iterator<Item = &str> {
        self.request_parameters
            .iter()
            .filter_map(|p| p.tag_set.as_ref())
            .flat_map(|set| set.items.iter())
            .filter_map(|item| item.key.as_deref())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("failed to look up own role: {0}")]
pub struct RoleLookupError(pub String);

/// Tells us which role our own changes are made under
#[async_trait]
pub trait RoleLookup: Send + Sync {
    async fn own_role(&self) -> Result<Option<String>, RoleLookupError>;
}

/// A role known ahead of time, e.g. from configuration
#[derive(Clone, Debug, Default)]
pub struct ConfiguredRole(pub Option<String>);

#[async_trait]
impl RoleLookup for ConfiguredRole {
    async fn own_role(&self) -> Result<Option<String>, RoleLookupError> {
        Ok(self.0.clone())
    }
}

/// Returns whether `event` could have changed anything we reconcile
///
/// Anything that does not parse as an event is irrelevant.  The own role is
/// only looked up for API call events, and a failure to do so is returned.
pub async fn is_relevant(
    event: &serde_json::Value,
    roles: &dyn RoleLookup,
    log: &Logger,
) -> Result<bool, RoleLookupError> {
    let event = match Event::deserialize(event) {
        Ok(event) => event,
        Err(error) => {
            debug!(log, "ignoring unrecognized event"; "error" => %error);
            return Ok(false);
        }
    };
    let Some(detail) = &event.detail else {
        debug!(log, "ignoring event without detail");
        return Ok(false);
    };
    if let Some(code) = &detail.error_code {
        debug!(log, "ignoring failed call"; "error_code" => %code);
        return Ok(false);
    }

    match event.detail_type.as_deref() {
        Some(DETAIL_TYPE_API_CALL) => {
            let own_role = roles.own_role().await?;
            let caller = detail.caller_role();
            if caller.is_some() && caller == own_role.as_deref() {
                debug!(log, "ignoring call made by own role");
                return Ok(false);
            }
            let relevant = match detail.event_name.as_deref() {
                Some("CreateTags" | "DeleteTags") => {
                    detail.tag_keys().any(|key| key == LINK_TO_NETWORK_TAG_KEY)
                }
                Some(name) => RELEVANT_CALLS.contains(&name),
                None => false,
            };
            debug!(
                log,
                "api call";
                "event_name" => ?detail.event_name,
                "relevant" => relevant,
            );
            Ok(relevant)
        }
        Some(DETAIL_TYPE_INSTANCE_STATE) => {
            Ok(detail.state.as_deref() == Some("running"))
        }
        other => {
            debug!(log, "ignoring event"; "detail_type" => ?other);
            Ok(false)
        }
    }
}
