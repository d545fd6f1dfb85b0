// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Creating, syncing and cleaning up mirrors

use crate::common::{base_state, legacy, ssh_from, Harness, OWNER};
use classic_mirror::sim::SimOp;
use classic_mirror_test_utils::dev::test_setup_log;
use classic_mirror_types::group::{SecurityGroup, DEFAULT_GROUP_NAME};
use classic_mirror_types::rule::{GroupRef, IngressRule};
use classic_mirror_types::tags::{
    LAST_ERROR_TAG_KEY, LAST_UPDATE_TAG_KEY, LINK_TO_NETWORK_TAG_KEY,
    MIRRORED_FROM_TAG_KEY, MIRRORED_TO_TAG_KEY,
};

#[tokio::test]
async fn test_new_legacy_group_is_mirrored() {
    let logctx = test_setup_log("test_new_legacy_group_is_mirrored");
    let mut state = base_state();
    state.groups.push(
        legacy("sg-web", "web", "vpc-1").with_rule(ssh_from("10.0.0.0/8")),
    );
    let harness = Harness::new(state, &logctx.log);

    let report = harness.run().await;
    assert_eq!(report.pairs, 1);
    assert_eq!(report.mirrors_created, 1);
    assert_eq!(report.synced, 1);
    assert_eq!(report.rules_authorized, 1);
    assert!(report.errors.is_empty());

    let mirror_id = harness.mirror_of("sg-web").await.expect("no mirror");
    let state = harness.sim.snapshot().await;
    let mirror = state.group(&mirror_id).unwrap();
    assert_eq!(mirror.network_id.as_ref().unwrap().as_str(), "vpc-1");
    assert_eq!(mirror.name, "web");
    assert_eq!(mirror.description, "web tier");
    assert_eq!(mirror.rules, [ssh_from("10.0.0.0/8")]);
    assert!(mirror.tags.contains_key(LAST_UPDATE_TAG_KEY));

    let legacy = state.group("sg-web").unwrap();
    assert_eq!(legacy.tags.get(MIRRORED_TO_TAG_KEY), Some(&mirror_id));

    // In the network: the default group and the one mirror.
    assert_eq!(state.groups_in("vpc-1").len(), 2);

    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_rerun_changes_nothing() {
    let logctx = test_setup_log("test_rerun_changes_nothing");
    let mut state = base_state();
    state.groups.push(
        legacy("sg-web", "web", "vpc-1")
            .with_rule(ssh_from("10.0.0.0/8"))
            .with_rule(
                IngressRule::tcp(443)
                    .with_group_ref(GroupRef::new(OWNER, "sg-lb")),
            ),
    );
    state.groups.push(
        legacy("sg-lb", "lb", "vpc-1")
            .with_rule(IngressRule::tcp(443).with_cidr("0.0.0.0/0")),
    );
    let harness = Harness::new(state, &logctx.log);

    let first = harness.run().await;
    assert_eq!(first.mirrors_created, 2);
    assert_eq!(first.rules_authorized, 3);
    let after_first = harness.sim.snapshot().await;

    harness.sim.clear_calls().await;
    let second = harness.run().await;
    assert_eq!(second.mirrors_created, 0);
    assert_eq!(second.rules_authorized, 0);
    assert_eq!(second.rules_revoked, 0);
    assert!(second.errors.is_empty());
    for op in [
        SimOp::CreateGroup,
        SimOp::DeleteGroup,
        SimOp::AuthorizeIngress,
        SimOp::RevokeIngress,
        SimOp::Attach,
        SimOp::Detach,
    ] {
        assert!(harness.sim.calls_of(op).await.is_empty(), "{:?}", op);
    }

    // The references between mirrors point at mirrors.
    let web_mirror = harness.mirror_of("sg-web").await.unwrap();
    let lb_mirror = harness.mirror_of("sg-lb").await.unwrap();
    let state = harness.sim.snapshot().await;
    assert!(state.group(&web_mirror).unwrap().rules.contains(
        &IngressRule::tcp(443)
            .with_group_ref(GroupRef::new(OWNER, lb_mirror.as_str()))
    ));
    assert_eq!(
        state.groups.iter().map(|g| &g.rules).collect::<Vec<_>>(),
        after_first.groups.iter().map(|g| &g.rules).collect::<Vec<_>>(),
    );

    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_rule_changes_follow_legacy_group() {
    let logctx = test_setup_log("test_rule_changes_follow_legacy_group");
    let mut state = base_state();
    state.groups.push(
        legacy("sg-web", "web", "vpc-1").with_rule(ssh_from("10.0.0.0/8")),
    );
    let harness = Harness::new(state, &logctx.log);
    harness.run().await;
    let mirror_id = harness.mirror_of("sg-web").await.unwrap();

    // Somebody changes the legacy group's rules.
    let mut state = harness.sim.snapshot().await;
    let legacy =
        state.groups.iter_mut().find(|g| g.id.as_str() == "sg-web").unwrap();
    legacy.rules = vec![ssh_from("172.16.0.0/12")];
    let harness = Harness::new(state, &logctx.log);

    let report = harness.run().await;
    assert_eq!(report.rules_authorized, 1);
    assert_eq!(report.rules_revoked, 1);
    let state = harness.sim.snapshot().await;
    assert_eq!(
        state.group(&mirror_id).unwrap().rules,
        [ssh_from("172.16.0.0/12")]
    );

    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_orphans_are_cleaned_up() {
    let logctx = test_setup_log("test_orphans_are_cleaned_up");
    let mut state = base_state();
    // A mirror whose legacy group is gone
    state.groups.push(
        SecurityGroup::new("sg-old", "old", OWNER)
            .in_network("vpc-1")
            .with_tag(MIRRORED_FROM_TAG_KEY, "sg-gone"),
    );
    // A default group that mirrored a legacy default group that is gone
    let default = state
        .groups
        .iter_mut()
        .find(|g| g.id.as_str() == "sg-vpc-2-default")
        .unwrap();
    for (key, value) in [
        (MIRRORED_FROM_TAG_KEY, "sg-gone-too"),
        (LAST_UPDATE_TAG_KEY, "earlier"),
        (LAST_ERROR_TAG_KEY, "'oops' at earlier"),
        ("Name", "keep me"),
    ] {
        default.tags.insert(key.to_string(), value.to_string());
    }
    let harness = Harness::new(state, &logctx.log);

    let report = harness.run().await;
    assert_eq!(report.retired, 2);
    assert!(report.errors.is_empty());

    let state = harness.sim.snapshot().await;
    assert!(state.group("sg-old").is_none());
    let default = state.group("sg-vpc-2-default").unwrap();
    assert_eq!(default.name, DEFAULT_GROUP_NAME);
    assert_eq!(default.tags.len(), 1);
    assert_eq!(default.tags.get("Name").map(String::as_str), Some("keep me"));

    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_untagged_legacy_group_loses_mirror() {
    let logctx = test_setup_log("test_untagged_legacy_group_loses_mirror");
    let mut state = base_state();
    state.groups.push(legacy("sg-web", "web", "vpc-1"));
    let harness = Harness::new(state, &logctx.log);
    harness.run().await;
    let mirror_id = harness.mirror_of("sg-web").await.unwrap();

    let mut state = harness.sim.snapshot().await;
    let legacy =
        state.groups.iter_mut().find(|g| g.id.as_str() == "sg-web").unwrap();
    legacy.tags.remove(LINK_TO_NETWORK_TAG_KEY);
    let harness = Harness::new(state, &logctx.log);

    let report = harness.run().await;
    assert_eq!(report.pairs, 1);
    assert_eq!(report.retired, 1);
    assert!(harness.sim.snapshot().await.group(&mirror_id).is_none());

    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_legacy_default_group_uses_network_default() {
    let logctx =
        test_setup_log("test_legacy_default_group_uses_network_default");
    let mut state = base_state();
    state.groups.push(
        legacy("sg-legacy-default", DEFAULT_GROUP_NAME, "vpc-2")
            .with_rule(ssh_from("10.0.0.0/8")),
    );
    let harness = Harness::new(state, &logctx.log);

    let report = harness.run().await;
    assert!(report.errors.is_empty());
    assert_eq!(
        harness.mirror_of("sg-legacy-default").await.as_deref(),
        Some("sg-vpc-2-default")
    );
    assert!(harness.sim.calls_of(SimOp::CreateGroup).await.is_empty());
    let state = harness.sim.snapshot().await;
    assert_eq!(
        state.group("sg-vpc-2-default").unwrap().rules,
        [ssh_from("10.0.0.0/8")]
    );

    logctx.cleanup_successful();
}
