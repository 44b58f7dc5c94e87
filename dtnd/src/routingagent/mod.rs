// Copyright (C) 2024 The dtnd Authors
//
// This file is part of dtnd.
//
// dtnd is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// dtnd is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::collections::{HashMap, HashSet};

use bp7::{
    bundle::{Bundle, BundleId},
    endpoint::Endpoint,
};

use crate::{bundlestorageagent::BundlePack, convergenceagent::messages::ClaPeer};

pub mod agent;
pub mod epidemic;
pub mod messages;
pub mod prophet;

/// Narrow capability an algorithm gets for injecting its own metadata
/// bundles into the pipeline. It never holds the core itself.
pub type SendBundleFn = Box<dyn Fn(Bundle) + Send>;

/// A pluggable forwarding strategy.
///
/// The routing agent feeds it incoming bundles, peer events and send
/// failures; in return it picks the convergence senders for each bundle.
pub trait RoutingAlgorithm: Send {
    fn name(&self) -> &'static str;

    /// Inspect a freshly stored bundle, e.g. to seed its sent-set from the
    /// previous-node block or to consume routing metadata.
    fn notify_incoming(&mut self, pack: &BundlePack);

    /// Veto dispatching, e.g. for metadata bundles that only exist for the
    /// algorithm itself.
    fn dispatching_allowed(&self, pack: &BundlePack) -> bool;

    /// Choose senders among the currently connected peers. The second
    /// return value asks the pipeline to drop the bundle once at least one
    /// send succeeded.
    fn senders_for_bundle(
        &mut self,
        pack: &BundlePack,
        peers: &HashMap<Endpoint, ClaPeer>,
    ) -> (Vec<ClaPeer>, bool);

    /// A send to `peer` failed; it may be offered this bundle again.
    fn report_failure(&mut self, id: &BundleId, peer: &Endpoint);

    fn report_peer_appeared(&mut self, peer: &ClaPeer);

    fn report_peer_disappeared(&mut self, endpoint: &Endpoint);

    /// Periodic decay of internal state, a no-op for most algorithms.
    fn age(&mut self) {}

    /// Bundles that just left the store.
    fn forget(&mut self, removed: &[BundleId]);

    /// Drop per-bundle state for everything outside `known`.
    fn retain_known(&mut self, known: &HashSet<BundleId>);

    /// The EIDs this bundle was already offered to, in a persistable form.
    fn sent_eids(&self, id: &BundleId) -> Vec<String>;
}

/// The store property carrying an algorithm's per-bundle sent-set.
pub fn sent_property_key(name: &str) -> String {
    format!("routing/{name}/sent")
}

/// Rebuilds a sent-set from the persisted property list.
pub fn sent_set_from_properties(pack: &BundlePack, name: &str) -> HashSet<Endpoint> {
    pack.properties
        .get(&sent_property_key(name))
        .map(|values| {
            values
                .iter()
                .filter_map(|uri| Endpoint::new(uri))
                .collect()
        })
        .unwrap_or_default()
}
