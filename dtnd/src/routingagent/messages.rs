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
use bp7::{bundle::BundleId, endpoint::Endpoint};

use crate::{bundlestorageagent::BundlePack, convergenceagent::messages::ClaPeer};

#[derive(Message)]
#[rtype(result = "()")]
pub struct NotifyIncoming {
    pub pack: BundlePack,
}

#[derive(Message)]
#[rtype(result = "Result<bool, ()>")]
pub struct DispatchingAllowed {
    pub pack: BundlePack,
}

#[derive(Debug)]
pub struct SenderForBundleResponse {
    pub senders: Vec<ClaPeer>,
    /// Drop the bundle once at least one sender succeeded.
    pub delete_afterwards: bool,
}

#[derive(Message)]
#[rtype(result = "Result<SenderForBundleResponse, ()>")]
pub struct SenderForBundle {
    pub pack: BundlePack,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct ReportFailure {
    pub id: BundleId,
    pub endpoint: Endpoint,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct ReportPeerAppeared {
    pub peer: ClaPeer,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct ReportPeerDisappeared {
    pub endpoint: Endpoint,
}

/// Bundles the store dropped (expiry or explicit deletion).
#[derive(Message)]
#[rtype(result = "()")]
pub struct NotifyCleanup {
    pub ids: Vec<BundleId>,
}

/// Periodic decay, e.g. PRoPHET predictability aging.
#[derive(Message)]
#[rtype(result = "()")]
pub struct AgeTick {}

/// Periodic garbage collection of per-bundle routing state.
#[derive(Message)]
#[rtype(result = "()")]
pub struct GcTick {}
