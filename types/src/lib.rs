// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types shared by the classic-mirror reconciler and its collaborators
//!
//! These describe the resources as the provider's directory reports them
//! (security groups, ingress rules, instances and their cross-space links)
//! along with the tag vocabulary the reconciler uses to persist the
//! relationships between them.

pub mod group;
pub mod ids;
pub mod instance;
pub mod rule;
pub mod tags;
