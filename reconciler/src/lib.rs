// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mirrors legacy security groups into virtual networks
//!
//! Users tag a legacy security group with the network it should be mirrored
//! into.  Each run of the [`Reconciler`]:
//!
//! 1. pairs tagged legacy groups with the mirrors we created for them
//!    ([`pairing`]);
//! 2. creates mirrors for legacy groups that lack one and removes mirrors
//!    whose legacy group is gone ([`lifecycle`]);
//! 3. copies ingress rules from each legacy group to its mirror
//!    ([`rules`]);
//! 4. links running members of legacy groups to the corresponding mirrors
//!    ([`links`]).
//!
//! All relationships are stored as tags on the resources themselves, so runs
//! keep no state of their own.  Everything is done through the traits in
//! [`directory`]; [`sim`] provides an in-memory implementation.

pub mod config;
pub mod directory;
pub mod error;
pub mod event_filter;
pub mod lifecycle;
pub mod links;
pub mod pairing;
pub mod pipeline;
pub mod rules;
pub mod sim;

pub use directory::{DirectoryError, InstanceDirectory, SecurityGroupDirectory};
pub use error::{EntityError, RunError};
pub use pipeline::{Reconciler, RunReport};
