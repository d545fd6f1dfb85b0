// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use classic_mirror::sim::{SimDirectory, SimState};
use classic_mirror::Reconciler;
use classic_mirror::RunReport;
use classic_mirror_types::group::{SecurityGroup, DEFAULT_GROUP_NAME};
use classic_mirror_types::rule::IngressRule;
use classic_mirror_types::tags::LINK_TO_NETWORK_TAG_KEY;
use slog::Logger;
use std::sync::Arc;

pub const OWNER: &str = "123456789012";

/// A simulated account with networks `vpc-1` and `vpc-2`, each with its
/// default group
pub fn base_state() -> SimState {
    let mut state = SimState::new();
    for network in ["vpc-1", "vpc-2"] {
        state.groups.push(
            SecurityGroup::new(
                format!("sg-{network}-default"),
                DEFAULT_GROUP_NAME,
                OWNER,
            )
            .in_network(network),
        );
    }
    state
}

/// A legacy group asking to be mirrored into `network`
pub fn legacy(id: &str, name: &str, network: &str) -> SecurityGroup {
    SecurityGroup::new(id, name, OWNER)
        .with_description(format!("{name} tier"))
        .with_tag(LINK_TO_NETWORK_TAG_KEY, network)
}

pub fn ssh_from(cidr: &str) -> IngressRule {
    IngressRule::tcp(22).with_cidr(cidr)
}

pub struct Harness {
    pub sim: Arc<SimDirectory>,
    reconciler: Reconciler,
}

impl Harness {
    pub fn new(state: SimState, log: &Logger) -> Harness {
        let sim = Arc::new(SimDirectory::new(state));
        let reconciler = Reconciler::new(sim.clone(), sim.clone(), log);
        Harness { sim, reconciler }
    }

    /// Runs once, expecting the run as a whole to succeed
    pub async fn run(&self) -> RunReport {
        self.reconciler.run().await.expect("run failed")
    }

    /// Id of the mirror tagged as created for `legacy_id`
    pub async fn mirror_of(&self, legacy_id: &str) -> Option<String> {
        use classic_mirror_types::tags::MIRRORED_FROM_TAG_KEY;
        let state = self.sim.snapshot().await;
        let mirrors: Vec<String> = state
            .groups
            .iter()
            .filter(|g| {
                g.tags.get(MIRRORED_FROM_TAG_KEY).map(String::as_str)
                    == Some(legacy_id)
            })
            .map(|g| g.id.to_string())
            .collect();
        assert!(mirrors.len() <= 1, "more than one mirror: {:?}", mirrors);
        mirrors.into_iter().next()
    }
}
