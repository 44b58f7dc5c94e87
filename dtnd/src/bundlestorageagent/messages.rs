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

use actix::prelude::*;
use bp7::{bundle::Bundle, bundle::BundleId, endpoint::Endpoint};

use super::BundlePack;

#[derive(Debug)]
pub enum StoreError {
    NotFound,
    Internal,
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        log::error!("store backend error: {e}");
        StoreError::Internal
    }
}

impl From<serde_cbor::Error> for StoreError {
    fn from(e: serde_cbor::Error) -> Self {
        log::error!("store codec error: {e}");
        StoreError::Internal
    }
}

impl From<bp7::SerializationError> for StoreError {
    fn from(e: bp7::SerializationError) -> Self {
        log::error!("store bundle codec error: {e:?}");
        StoreError::Internal
    }
}

#[derive(Debug)]
pub enum StoreBundleOutcome {
    /// The bundle is new and now persisted.
    Stored(BundlePack),
    /// A fragment was stored, the whole bundle is not complete yet.
    AwaitingFragments,
    /// This bundle is already known, nothing was written.
    Duplicate,
}

/// Push a bundle that arrived from a peer into the store.
#[derive(Message)]
#[rtype(result = "Result<StoreBundleOutcome, StoreError>")]
pub struct StoreBundle {
    pub bundle: Bundle,
    /// EID of the convergence receiver the bundle came in on.
    pub receiver: Endpoint,
}

/// Push a locally originated bundle. The store assigns the creation
/// sequence number so equal timestamps stay unique.
#[derive(Message)]
#[rtype(result = "Result<BundlePack, StoreError>")]
pub struct StoreNewBundle {
    pub bundle: Bundle,
}

/// Write back a mutated pack, refreshing the pending flag and expiry.
#[derive(Message)]
#[rtype(result = "Result<(), StoreError>")]
pub struct SyncBundlePack {
    pub pack: BundlePack,
}

#[derive(Message)]
#[rtype(result = "Result<BundlePack, StoreError>")]
pub struct QueryBundle {
    pub id: BundleId,
}

#[derive(Message)]
#[rtype(result = "Vec<BundlePack>")]
pub struct QueryPending {}

#[derive(Message)]
#[rtype(result = "Vec<BundleId>")]
pub struct QueryAllIds {}

#[derive(Message)]
#[rtype(result = "Result<bool, StoreError>")]
pub struct KnowsBundle {
    pub id: BundleId,
}

/// Remove bundle bytes and metadata of one entry.
#[derive(Message)]
#[rtype(result = "()")]
pub struct DeleteBundle {
    pub id: BundleId,
}

/// Drop everything whose expiry passed; reports the removals to routing.
#[derive(Message)]
#[rtype(result = "usize")]
pub struct DeleteExpired {}

/// Merge one property list into a stored entry, e.g. the epidemic
/// sent-set.
#[derive(Message)]
#[rtype(result = "()")]
pub struct UpdateBundleProperties {
    pub id: BundleId,
    pub key: String,
    pub values: Vec<String>,
}
