// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Failures of individual entities and of the run as a whole

use crate::common::{base_state, legacy, ssh_from, Harness};
use assert_matches::assert_matches;
use classic_mirror::sim::{SimInstance, SimOp};
use classic_mirror::{EntityError, RunError};
use classic_mirror_test_utils::dev::test_setup_log;
use classic_mirror_types::tags::LAST_ERROR_TAG_KEY;

#[tokio::test]
async fn test_one_failed_creation_does_not_stop_others() {
    let logctx =
        test_setup_log("test_one_failed_creation_does_not_stop_others");
    let mut state = base_state();
    state.groups.push(
        legacy("sg-web", "web", "vpc-1").with_rule(ssh_from("10.0.0.0/8")),
    );
    state.groups.push(legacy("sg-db", "db", "vpc-1"));
    state.instances.push(SimInstance::running("i-1").with_group("sg-web"));
    let harness = Harness::new(state, &logctx.log);
    harness.sim.fail_for(SimOp::CreateGroup, "db").await;

    let report = harness.run().await;
    assert_eq!(report.mirrors_created, 1);
    assert_eq!(report.synced, 1);
    assert_eq!(report.instances_relinked, 1);
    assert_eq!(report.errors.len(), 1);
    assert_matches!(
        report.entity_errors(),
        [EntityError::CreateMirror { legacy_id, .. }]
            if legacy_id.as_str() == "sg-db"
    );

    let state = harness.sim.snapshot().await;
    let tags = &state.group("sg-db").unwrap().tags;
    assert!(tags[LAST_ERROR_TAG_KEY].starts_with(
        "'failed to create mirror for legacy group sg-db: directory unavailable"
    ));
    assert!(harness.mirror_of("sg-web").await.is_some());
    assert!(harness.mirror_of("sg-db").await.is_none());

    assert_matches!(report.into_result(), Err(RunError::EntityFailures(_)));

    // The next run picks it up once the directory recovers.
    harness.sim.clear_faults().await;
    let report = harness.run().await;
    assert_eq!(report.mirrors_created, 1);
    assert!(report.into_result().is_ok());
    assert!(harness.mirror_of("sg-db").await.is_some());

    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_rule_sync_failure_is_isolated() {
    let logctx = test_setup_log("test_rule_sync_failure_is_isolated");
    let mut state = base_state();
    state.groups.push(
        legacy("sg-web", "web", "vpc-1").with_rule(ssh_from("10.0.0.0/8")),
    );
    state.groups.push(
        legacy("sg-db", "db", "vpc-1").with_rule(ssh_from("10.0.0.0/8")),
    );
    let harness = Harness::new(state, &logctx.log);
    harness.run().await;
    let web_mirror = harness.mirror_of("sg-web").await.unwrap();
    let db_mirror = harness.mirror_of("sg-db").await.unwrap();

    // Change both legacy groups, then break rule changes on one mirror.
    let mut state = harness.sim.snapshot().await;
    for group in state.groups.iter_mut().filter(|g| g.network_id.is_none()) {
        group.rules = vec![ssh_from("192.168.0.0/16")];
    }
    let harness = Harness::new(state, &logctx.log);
    harness.sim.fail_for(SimOp::AuthorizeIngress, &web_mirror).await;

    let report = harness.run().await;
    assert_matches!(
        report.entity_errors(),
        [EntityError::SyncRules { mirror_id, .. }]
            if mirror_id.as_str() == web_mirror
    );
    let state = harness.sim.snapshot().await;
    let web = state.group(&web_mirror).unwrap();
    let db = state.group(&db_mirror).unwrap();
    assert_eq!(db.rules, [ssh_from("192.168.0.0/16")]);
    assert!(web.tags.contains_key(LAST_ERROR_TAG_KEY));
    assert!(!db.tags.contains_key(LAST_ERROR_TAG_KEY));

    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_link_failure_is_isolated() {
    let logctx = test_setup_log("test_link_failure_is_isolated");
    let mut state = base_state();
    state.groups.push(legacy("sg-web", "web", "vpc-1"));
    state.instances.push(SimInstance::running("i-1").with_group("sg-web"));
    state.instances.push(SimInstance::running("i-2").with_group("sg-web"));
    let harness = Harness::new(state, &logctx.log);
    harness.sim.fail_for(SimOp::Attach, "i-1").await;

    let report = harness.run().await;
    assert_eq!(report.instances_relinked, 1);
    assert_matches!(
        report.entity_errors(),
        [EntityError::LinkInstance { instance_id, .. }]
            if instance_id.as_str() == "i-1"
    );
    let state = harness.sim.snapshot().await;
    assert!(state.instance("i-1").unwrap().link.is_none());
    assert!(state.instance("i-2").unwrap().link.is_some());
    let tags = &state.instance("i-1").unwrap().instance.tags;
    assert!(tags.contains_key(LAST_ERROR_TAG_KEY));

    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_describe_failure_changes_nothing() {
    let logctx = test_setup_log("test_describe_failure_changes_nothing");
    let mut state = base_state();
    state.groups.push(legacy("sg-web", "web", "vpc-1"));
    state.instances.push(SimInstance::running("i-1").with_group("sg-web"));
    let harness = Harness::new(state.clone(), &logctx.log);
    harness.sim.fail_always(SimOp::DescribeRunning).await;

    let log = logctx.log.clone();
    let reconciler = classic_mirror::Reconciler::new(
        harness.sim.clone(),
        harness.sim.clone(),
        &log,
    );
    assert_matches!(reconciler.run().await, Err(RunError::Describe { .. }));
    // The groups were handled before instances were listed.
    assert!(harness.mirror_of("sg-web").await.is_some());
    assert!(harness.sim.calls_of(SimOp::Attach).await.is_empty());

    // A failure to list groups stops the run before anything is created.
    let harness = Harness::new(state, &logctx.log);
    harness.sim.fail_always(SimOp::DescribeByTagKey).await;
    let reconciler = classic_mirror::Reconciler::new(
        harness.sim.clone(),
        harness.sim.clone(),
        &log,
    );
    assert_matches!(reconciler.run().await, Err(RunError::Describe { .. }));
    assert!(harness.sim.calls_of(SimOp::CreateGroup).await.is_empty());

    logctx.cleanup_successful();
}
