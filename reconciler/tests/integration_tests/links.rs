// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Linking instances to mirrors

use crate::common::{base_state, legacy, Harness, OWNER};
use classic_mirror::sim::{SimInstance, SimOp, SimState};
use classic_mirror_test_utils::dev::test_setup_log;
use classic_mirror_types::group::SecurityGroup;
use classic_mirror_types::instance::InstanceState;
use classic_mirror_types::tags::LAST_UPDATE_TAG_KEY;

/// sg-web and sg-db are mirrored into vpc-1, sg-batch into vpc-2, and
/// sg-other is not mirrored at all
fn groups() -> SimState {
    let mut state = base_state();
    state.groups.push(legacy("sg-web", "web", "vpc-1"));
    state.groups.push(legacy("sg-db", "db", "vpc-1"));
    state.groups.push(legacy("sg-batch", "batch", "vpc-2"));
    state.groups.push(SecurityGroup::new("sg-other", "other", OWNER));
    state
}

#[tokio::test]
async fn test_member_of_one_mirrored_group_is_attached() {
    let logctx =
        test_setup_log("test_member_of_one_mirrored_group_is_attached");
    let mut state = groups();
    state.instances.push(
        SimInstance::running("i-1").with_group("sg-web").with_group("sg-other"),
    );
    let harness = Harness::new(state, &logctx.log);

    let report = harness.run().await;
    assert_eq!(report.instances_relinked, 1);
    let web_mirror = harness.mirror_of("sg-web").await.unwrap();

    assert_eq!(harness.sim.calls_of(SimOp::Attach).await, ["i-1"]);
    assert!(harness.sim.calls_of(SimOp::Detach).await.is_empty());
    let state = harness.sim.snapshot().await;
    let instance = state.instance("i-1").unwrap();
    let link = instance.link.as_ref().unwrap();
    assert_eq!(link.network_id.as_str(), "vpc-1");
    assert_eq!(
        link.group_ids.iter().map(|g| g.to_string()).collect::<Vec<_>>(),
        [web_mirror]
    );
    assert!(instance.instance.tags.contains_key(LAST_UPDATE_TAG_KEY));

    // A second run leaves the link alone.
    harness.sim.clear_calls().await;
    let report = harness.run().await;
    assert_eq!(report.instances_relinked, 0);
    assert!(harness.sim.calls_of(SimOp::Attach).await.is_empty());

    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_membership_change_relinks() {
    let logctx = test_setup_log("test_membership_change_relinks");
    let mut state = groups();
    state.instances.push(SimInstance::running("i-1").with_group("sg-web"));
    let harness = Harness::new(state, &logctx.log);
    harness.run().await;

    // The instance joins sg-db as well.
    let mut state = harness.sim.snapshot().await;
    let instance = state
        .instances
        .iter_mut()
        .find(|i| i.instance.id.as_str() == "i-1")
        .unwrap();
    instance.instance.group_ids.push("sg-db".into());
    let harness = Harness::new(state, &logctx.log);

    let report = harness.run().await;
    assert_eq!(report.instances_relinked, 1);
    assert_eq!(harness.sim.calls_of(SimOp::Detach).await, ["i-1"]);
    assert_eq!(harness.sim.calls_of(SimOp::Attach).await, ["i-1"]);

    let mut expected = vec![
        harness.mirror_of("sg-web").await.unwrap(),
        harness.mirror_of("sg-db").await.unwrap(),
    ];
    expected.sort();
    let state = harness.sim.snapshot().await;
    let link = state.instance("i-1").unwrap().link.clone().unwrap();
    assert_eq!(
        link.group_ids.iter().map(|g| g.to_string()).collect::<Vec<_>>(),
        expected
    );

    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_instances_that_cannot_be_linked() {
    let logctx = test_setup_log("test_instances_that_cannot_be_linked");
    let mut state = groups();
    // groups in two different networks
    state.instances.push(
        SimInstance::running("i-split")
            .with_group("sg-web")
            .with_group("sg-batch"),
    );
    // not running
    state.instances.push(
        SimInstance::running("i-stopped")
            .with_group("sg-web")
            .with_state(InstanceState::Stopped),
    );
    // no mirrored groups
    state
        .instances
        .push(SimInstance::running("i-other").with_group("sg-other"));
    let harness = Harness::new(state, &logctx.log);

    let report = harness.run().await;
    assert_eq!(report.instances_relinked, 0);
    assert!(report.errors.is_empty());
    assert!(harness.sim.calls_of(SimOp::Attach).await.is_empty());

    logctx.cleanup_successful();
}

#[tokio::test]
async fn test_many_linked_instances() {
    let logctx = test_setup_log("test_many_linked_instances");
    let mut state = groups();
    for i in 0..13 {
        state.instances.push(
            SimInstance::running(&format!("i-{i:02}")).with_group("sg-batch"),
        );
    }
    let harness = Harness::new(state, &logctx.log);

    let report = harness.run().await;
    assert_eq!(report.instances_relinked, 13);

    // Every link is found again across pages, so nothing is redone.
    harness.sim.clear_calls().await;
    let report = harness.run().await;
    assert_eq!(report.instances_relinked, 0);
    assert_eq!(harness.sim.calls_of(SimOp::DescribeLinked).await.len(), 3);

    logctx.cleanup_successful();
}
