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

//! The processing pipeline: receive, dispatch, forward, deliver,
//! contraindicate and delete, with the retention-constraint bookkeeping
//! synced to the store after every transition.

use std::collections::HashSet;

use bp7::{
    administrative_record::{
        AdministrativeRecord,
        bundle_status_report::{BundleStatusReason, BundleStatusReport, StatusInformation},
    },
    block::{Block, CanonicalBlock, hop_count_block::HopCountBlock, payload_block::PayloadBlock},
    blockflags::BlockFlags,
    bundle::{Bundle, BundleId},
    bundleflags::BundleFlags,
    crc::CRCType,
    endpoint::Endpoint,
    primaryblock::PrimaryBlock,
    time::{CreationTimestamp, DtnTime},
    Validate,
};
use futures_util::future::join_all;
use log::{debug, info, warn};
use tokio::sync::oneshot;

use crate::{
    bundlestorageagent::{
        BundlePack, Constraint,
        messages::{
            DeleteBundle, QueryPending, StoreBundle, StoreBundleOutcome, StoreNewBundle,
            SyncBundlePack,
        },
    },
    clientagent::messages::AgentDeliverBundle,
    common::settings::Settings,
    convergenceagent::messages::{AgentForwardBundle, ListClaReceivers},
    routingagent::messages::{
        DispatchingAllowed, NotifyIncoming, ReportFailure, SenderForBundle,
    },
};

use super::messages::{ReceiveBundle, RetryPending, TransmitBundle, TransmitPayload};
use actix::prelude::*;

const HOP_LIMIT_DEFAULT: u64 = 32;

/// Orchestrates all bundle transitions. Per-bundle processing runs as a
/// spawned future; the `in_flight` set keeps a second transition of the
/// same bundle from starting before the first finished.
#[derive(Default)]
pub struct Daemon {
    endpoint: Option<Endpoint>,
    inspect_all_bundles: bool,
    in_flight: HashSet<BundleId>,
}

impl Actor for Daemon {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        let settings = Settings::from_env();
        self.endpoint = Some(Endpoint::new(&settings.my_node_id).unwrap());
        self.inspect_all_bundles = settings.inspect_all_bundles;
    }
}

impl actix::Supervised for Daemon {}

impl SystemService for Daemon {}

impl Daemon {
    fn node(&self) -> Endpoint {
        self.endpoint
            .as_ref()
            .expect("the node endpoint is set on startup")
            .clone()
    }

    /// Runs one pipeline future under the in-flight guard for `id`.
    fn spawn_guarded<F>(&mut self, id: BundleId, ctx: &mut Context<Self>, fut: F)
    where
        F: std::future::Future<Output = ()> + 'static,
    {
        if !self.in_flight.insert(id.clone()) {
            debug!("Bundle {id} is already being processed");
            return;
        }
        ctx.spawn(fut.into_actor(self).map(move |_, act, _ctx| {
            act.in_flight.remove(&id);
        }));
    }
}

impl Handler<ReceiveBundle> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: ReceiveBundle, ctx: &mut Context<Self>) -> Self::Result {
        let ReceiveBundle { bundle, receiver } = msg;
        if !bundle.validate() {
            warn!(
                "Dropping invalid bundle from {}",
                bundle.primary_block.source_node
            );
            return;
        }
        let node = self.node();
        let inspect_all = self.inspect_all_bundles;
        let id = bundle.id();
        self.spawn_guarded(id, ctx, async move {
            receive(node, bundle, receiver, inspect_all).await;
        });
    }
}

impl Handler<TransmitBundle> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: TransmitBundle, ctx: &mut Context<Self>) -> Self::Result {
        let node = self.node();
        let bundle = msg.bundle;
        let id = bundle.id();
        self.spawn_guarded(id, ctx, async move {
            transmit(node, bundle).await;
        });
    }
}

impl Handler<TransmitPayload> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: TransmitPayload, ctx: &mut Context<Self>) -> Self::Result {
        let TransmitPayload {
            destination,
            payload,
            lifetime,
        } = msg;
        let node = self.node();
        let bundle = Bundle {
            primary_block: PrimaryBlock {
                version: 7,
                bundle_processing_flags: BundleFlags::empty(),
                crc: CRCType::NoCRC,
                destination_endpoint: destination,
                source_node: node.clone(),
                report_to: node.clone(),
                creation_timestamp: CreationTimestamp {
                    creation_time: DtnTime::now(),
                    sequence_number: 0,
                },
                lifetime,
                fragment_offset: None,
                total_data_length: None,
            },
            blocks: vec![
                CanonicalBlock {
                    block: Block::HopCount(HopCountBlock {
                        limit: HOP_LIMIT_DEFAULT,
                        count: 0,
                    }),
                    block_number: 2,
                    block_flags: BlockFlags::empty(),
                    crc: CRCType::NoCRC,
                },
                CanonicalBlock {
                    block: Block::Payload(PayloadBlock { data: payload }),
                    block_number: 1,
                    block_flags: BlockFlags::empty(),
                    crc: CRCType::NoCRC,
                },
            ],
        };
        let id = bundle.id();
        self.spawn_guarded(id, ctx, async move {
            transmit(node, bundle).await;
        });
    }
}

impl Handler<RetryPending> for Daemon {
    type Result = ();

    fn handle(&mut self, _msg: RetryPending, ctx: &mut Context<Self>) -> Self::Result {
        let node = self.node();
        storage()
            .send(QueryPending {})
            .into_actor(self)
            .map(move |res, act, ctx| {
                let Ok(packs) = res else {
                    warn!("Could not query pending bundles");
                    return;
                };
                for pack in packs {
                    let node = node.clone();
                    let id = pack.id();
                    act.spawn_guarded(id, ctx, async move {
                        redispatch(node, pack).await;
                    });
                }
            })
            .spawn(ctx);
    }
}

fn storage() -> Addr<crate::bundlestorageagent::agent::Daemon> {
    crate::bundlestorageagent::agent::Daemon::from_registry()
}

fn routing() -> Addr<crate::routingagent::agent::Daemon> {
    crate::routingagent::agent::Daemon::from_registry()
}

/// Writes the pack back; all constraint changes go through here before
/// anything user visible (status reports, sends) happens.
async fn sync(pack: &BundlePack) -> Result<(), ()> {
    match storage().send(SyncBundlePack { pack: pack.clone() }).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            warn!("Could not sync bundle {}: {e:?}", pack.id());
            Err(())
        }
        Err(e) => {
            warn!("Storage agent unreachable: {e}");
            Err(())
        }
    }
}

async fn receive(node: Endpoint, bundle: Bundle, receiver: Endpoint, inspect_all: bool) {
    let outcome = match storage().send(StoreBundle { bundle, receiver }).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!("Could not store received bundle: {e:?}");
            return;
        }
        Err(e) => {
            warn!("Storage agent unreachable: {e}");
            return;
        }
    };
    let mut pack = match outcome {
        StoreBundleOutcome::Stored(pack) => pack,
        StoreBundleOutcome::AwaitingFragments => {
            debug!("Stored a fragment, waiting for the rest");
            return;
        }
        StoreBundleOutcome::Duplicate => {
            debug!("Ignoring a bundle we already know");
            return;
        }
    };

    info!("Received bundle {}", pack.id());
    pack.add_constraint(Constraint::DispatchPending);
    if sync(&pack).await.is_err() {
        return;
    }
    send_status_report(
        &node,
        &pack,
        StatusInformation::ReceivedBundle,
        BundleStatusReason::NoAdditionalInformation,
        BundleFlags::BUNDLE_RECEPTION_STATUS_REQUESTED,
    );

    if inspect_all
        && pack.bundle.is_administrative_record()
        && !pack
            .bundle
            .primary_block
            .destination_endpoint
            .matches_node(&node)
    {
        handle_administrative_record(&pack);
    }

    if !inspect_unknown_blocks(&node, &mut pack).await {
        return;
    }

    routing().do_send(NotifyIncoming { pack: pack.clone() });
    dispatch(node, pack).await;
}

/// Walks the canonical blocks in reverse and reacts to unknown block
/// types according to their block processing flags. Returns false when the
/// bundle was deleted along the way.
async fn inspect_unknown_blocks(node: &Endpoint, pack: &mut BundlePack) -> bool {
    let mut remove_numbers = Vec::new();
    let mut delete_bundle = false;
    let mut report = false;
    for block in pack.bundle.blocks.iter().rev() {
        let Block::Unknown(unknown) = &block.block else {
            continue;
        };
        warn!(
            "Bundle {} carries unknown block type {}",
            pack.id(),
            unknown.block_type
        );
        if block
            .block_flags
            .contains(BlockFlags::STATUS_REPORT_WHEN_NOT_PROCESSABLE)
        {
            report = true;
        }
        if block
            .block_flags
            .contains(BlockFlags::DELETE_BUNDLE_WHEN_NOT_PROCESSABLE)
        {
            delete_bundle = true;
            break;
        }
        if block
            .block_flags
            .contains(BlockFlags::DELETE_BLOCK_WHEN_NOT_PROCESSABLE)
        {
            remove_numbers.push(block.block_number);
        }
    }

    if report {
        send_status_report(
            node,
            pack,
            StatusInformation::ReceivedBundle,
            BundleStatusReason::BlockUnintelligible,
            BundleFlags::empty(),
        );
    }
    if delete_bundle {
        delete(node, pack.clone(), BundleStatusReason::BlockUnintelligible).await;
        return false;
    }
    if !remove_numbers.is_empty() {
        pack.bundle
            .blocks
            .retain(|b| !remove_numbers.contains(&b.block_number));
        if sync(pack).await.is_err() {
            return false;
        }
    }
    true
}

async fn transmit(node: Endpoint, bundle: Bundle) {
    let source = &bundle.primary_block.source_node;
    if !source.is_null_endpoint() && !source.matches_node(&node) {
        warn!(
            "Refusing to transmit a bundle sourced at foreign node {source}"
        );
        return;
    }

    let mut pack = match storage().send(StoreNewBundle { bundle }).await {
        Ok(Ok(pack)) => pack,
        Ok(Err(e)) => {
            warn!("Could not store new bundle: {e:?}");
            return;
        }
        Err(e) => {
            warn!("Storage agent unreachable: {e}");
            return;
        }
    };
    debug!("Transmitting bundle {}", pack.id());
    pack.add_constraint(Constraint::DispatchPending);
    if sync(&pack).await.is_err() {
        return;
    }
    dispatch(node, pack).await;
}

/// Re-entry point for pending bundles coming back out of the store.
async fn redispatch(node: Endpoint, mut pack: BundlePack) {
    pack.remove_constraint(Constraint::Contraindicated);
    pack.remove_constraint(Constraint::ForwardPending);
    pack.add_constraint(Constraint::DispatchPending);
    if sync(&pack).await.is_err() {
        return;
    }
    dispatch(node, pack).await;
}

async fn dispatch(node: Endpoint, pack: BundlePack) {
    match routing()
        .send(DispatchingAllowed { pack: pack.clone() })
        .await
    {
        Ok(Ok(true)) => {}
        Ok(Ok(false)) => {
            debug!("Routing vetoed dispatching of {}", pack.id());
            contraindicate(pack).await;
            return;
        }
        _ => {
            warn!("Routing agent unreachable, contraindicating {}", pack.id());
            contraindicate(pack).await;
            return;
        }
    }

    if is_local_destination(&node, &pack).await {
        local_delivery(node, pack).await;
    } else {
        forward(node, pack).await;
    }
}

async fn is_local_destination(node: &Endpoint, pack: &BundlePack) -> bool {
    let destination = &pack.bundle.primary_block.destination_endpoint;
    if destination.matches_node(node) {
        return true;
    }
    if let Ok(endpoints) = crate::clientagent::agent::Daemon::from_registry()
        .send(crate::clientagent::messages::ListRegisteredEndpoints {})
        .await
    {
        if endpoints
            .iter()
            .any(|e| e == destination || destination.matches_node(e))
        {
            return true;
        }
    }
    if let Ok(endpoints) = crate::convergenceagent::agent::Daemon::from_registry()
        .send(ListClaReceivers {})
        .await
    {
        if endpoints.iter().any(|e| destination.matches_node(e)) {
            return true;
        }
    }
    false
}

async fn forward(node: Endpoint, mut pack: BundlePack) {
    pack.add_constraint(Constraint::ForwardPending);
    pack.remove_constraint(Constraint::DispatchPending);
    if sync(&pack).await.is_err() {
        return;
    }

    if pack.bundle.increment_hop_count() {
        info!("Bundle {} exceeded its hop limit", pack.id());
        delete(&node, pack, BundleStatusReason::HopLimitExceeded).await;
        return;
    }
    if pack.bundle.is_lifetime_exceeded() {
        info!("Bundle {} exceeded its lifetime", pack.id());
        delete(&node, pack, BundleStatusReason::LifetimeExpired).await;
        return;
    }
    let now = DtnTime::now();
    let elapsed_us = now.seconds_since(pack.timestamp) * 1_000_000;
    if let Some(age) = pack.bundle.update_bundle_age(elapsed_us) {
        // the age now covers the time up to `now`; moving the pack
        // timestamp along keeps retries from counting it twice
        pack.timestamp = now;
        if age >= pack.bundle.primary_block.lifetime {
            info!("Bundle {} aged out", pack.id());
            delete(&node, pack, BundleStatusReason::LifetimeExpired).await;
            return;
        }
    }
    pack.bundle.set_previous_node(&node.node_endpoint());
    if sync(&pack).await.is_err() {
        return;
    }

    let response = match routing()
        .send(SenderForBundle { pack: pack.clone() })
        .await
    {
        Ok(Ok(response)) => response,
        _ => {
            warn!("Routing agent unreachable, contraindicating {}", pack.id());
            contraindicate(pack).await;
            return;
        }
    };
    if response.senders.is_empty() {
        debug!("No forwarding opportunity for {}", pack.id());
        contraindicate(pack).await;
        return;
    }

    // fan out to all chosen senders and collect every outcome
    let mut pending = Vec::new();
    for peer in &response.senders {
        let (responder, result) = oneshot::channel();
        peer.sender.do_send(AgentForwardBundle {
            pack: pack.clone(),
            responder,
        });
        let endpoint = peer.endpoint.clone();
        pending.push(async move { (endpoint, result.await.unwrap_or(false)) });
    }
    let results = join_all(pending).await;

    let mut successes = 0;
    for (endpoint, ok) in results {
        if ok {
            debug!("Forwarded {} to {endpoint}", pack.id());
            successes += 1;
        } else {
            routing().do_send(ReportFailure {
                id: pack.id(),
                endpoint,
            });
        }
    }

    if successes == 0 {
        contraindicate(pack).await;
        return;
    }

    // one report per bundle, however many senders succeeded
    send_status_report(
        &node,
        &pack,
        StatusInformation::ForwardedBundle,
        BundleStatusReason::NoAdditionalInformation,
        BundleFlags::BUNDLE_FORWARDING_STATUS_REQUESTED,
    );
    if response.delete_afterwards {
        delete(&node, pack, BundleStatusReason::NoAdditionalInformation).await;
    } else {
        pack.remove_constraint(Constraint::ForwardPending);
        let _ = sync(&pack).await;
    }
}

async fn local_delivery(node: Endpoint, mut pack: BundlePack) {
    pack.add_constraint(Constraint::LocalEndpoint);
    if sync(&pack).await.is_err() {
        return;
    }

    if pack.bundle.is_administrative_record() {
        handle_administrative_record(&pack);
        pack.remove_constraint(Constraint::LocalEndpoint);
        pack.remove_constraint(Constraint::DispatchPending);
        let _ = sync(&pack).await;
        return;
    }

    match crate::clientagent::agent::Daemon::from_registry()
        .send(AgentDeliverBundle { pack: pack.clone() })
        .await
    {
        Ok(Ok(())) => {
            info!("Delivered bundle {} locally", pack.id());
            pack.remove_constraint(Constraint::LocalEndpoint);
            pack.remove_constraint(Constraint::DispatchPending);
            if sync(&pack).await.is_err() {
                return;
            }
            send_status_report(
                &node,
                &pack,
                StatusInformation::DeliveredBundle,
                BundleStatusReason::NoAdditionalInformation,
                BundleFlags::BUNDLE_DELIVERY_STATUS_REQUESTED,
            );
        }
        _ => {
            debug!(
                "No agent takes bundle {} yet, keeping it around",
                pack.id()
            );
            contraindicate(pack).await;
        }
    }
}

/// No way ahead right now; the scheduler will try again.
async fn contraindicate(mut pack: BundlePack) {
    pack.add_constraint(Constraint::Contraindicated);
    pack.remove_constraint(Constraint::DispatchPending);
    pack.remove_constraint(Constraint::ForwardPending);
    let _ = sync(&pack).await;
}

async fn delete(node: &Endpoint, mut pack: BundlePack, reason: BundleStatusReason) {
    pack.purge_constraints();
    if sync(&pack).await.is_err() {
        return;
    }
    if !pack.has_constraints() {
        storage().do_send(DeleteBundle { id: pack.id() });
    }
    send_status_report(
        node,
        &pack,
        StatusInformation::DeletedBundle,
        reason,
        BundleFlags::BUNDLE_DELETION_STATUS_REQUESTED,
    );
}

/// Emits one status report about `pack` if its flags ask for it and the
/// target is sensible. `required_flag` empty means "always send".
fn send_status_report(
    node: &Endpoint,
    pack: &BundlePack,
    status: StatusInformation,
    reason: BundleStatusReason,
    required_flag: BundleFlags,
) {
    let pb = &pack.bundle.primary_block;
    if pack.bundle.is_administrative_record() {
        // reports about reports would loop forever
        return;
    }
    if !required_flag.is_empty() && !pb.bundle_processing_flags.contains(required_flag) {
        return;
    }
    if pb.report_to.is_null_endpoint() || pb.report_to.matches_node(node) {
        return;
    }

    let timestamp = if pb
        .bundle_processing_flags
        .contains(BundleFlags::STATUS_TIME_REQUESTED)
    {
        Some(DtnTime::now())
    } else {
        None
    };
    let report = BundleStatusReport::new(
        status,
        reason,
        pb.source_node.clone(),
        pb.creation_timestamp.clone(),
        pb.fragment_offset,
        pb.total_data_length,
        timestamp,
    );
    let record = AdministrativeRecord::BundleStatusReport(report);
    let payload: Vec<u8> = match (&record).try_into() {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Could not serialize a status report: {e:?}");
            return;
        }
    };

    let bundle = Bundle {
        primary_block: PrimaryBlock {
            version: 7,
            bundle_processing_flags: BundleFlags::ADMINISTRATIVE_RECORD
                | BundleFlags::MUST_NOT_FRAGMENT,
            crc: CRCType::NoCRC,
            destination_endpoint: pb.report_to.clone(),
            source_node: node.clone(),
            report_to: node.clone(),
            creation_timestamp: CreationTimestamp {
                creation_time: DtnTime::now(),
                sequence_number: 0, // uniqueness guaranteed by the store
            },
            lifetime: pb.lifetime,
            fragment_offset: None,
            total_data_length: None,
        },
        blocks: vec![CanonicalBlock {
            block: Block::Payload(PayloadBlock { data: payload }),
            block_flags: BlockFlags::empty(),
            block_number: 1,
            crc: CRCType::NoCRC,
        }],
    };
    debug!("Emitting a {status:?} report towards {}", pb.report_to);
    crate::bundleprotocolagent::agent::Daemon::from_registry()
        .do_send(TransmitBundle { bundle });
}

/// Inbound administrative records addressed to this node.
fn handle_administrative_record(pack: &BundlePack) {
    let record =
        match AdministrativeRecord::try_from(pack.bundle.payload_block().data.as_slice()) {
            Ok(record) => record,
            Err(e) => {
                warn!("Undecodable administrative record in {}: {e:?}", pack.id());
                return;
            }
        };
    let AdministrativeRecord::BundleStatusReport(report) = record;
    let referenced = report.referenced_bundle();
    info!(
        "Status report from {} about {referenced}: received={} forwarded={} delivered={} deleted={} reason={:?}",
        pack.bundle.primary_block.source_node,
        report.status_information.received_bundle.is_asserted,
        report.status_information.forwarded_bundle.is_asserted,
        report.status_information.delivered_bundle.is_asserted,
        report.status_information.deleted_bundle.is_asserted,
        report.reason,
    );
    if report.status_information.delivered_bundle.is_asserted {
        // the bundle arrived downstream, no reason to retain our copy
        storage().do_send(DeleteBundle { id: referenced });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use actix::prelude::*;
    use bp7::{
        block::{Block, CanonicalBlock, payload_block::PayloadBlock},
        blockflags::BlockFlags,
        bundle::Bundle,
        bundleflags::BundleFlags,
        crc::CRCType,
        endpoint::Endpoint,
        primaryblock::PrimaryBlock,
        time::{CreationTimestamp, DtnTime},
    };

    use crate::clientagent::messages::{ClientDeliverBundle, EventClientConnected};

    use super::super::messages::ReceiveBundle;

    struct CollectingAgent {
        delivered: tokio::sync::mpsc::UnboundedSender<Bundle>,
    }

    impl Actor for CollectingAgent {
        type Context = Context<Self>;
    }

    impl Handler<ClientDeliverBundle> for CollectingAgent {
        type Result = ();

        fn handle(&mut self, msg: ClientDeliverBundle, _ctx: &mut Context<Self>) {
            let _ = self.delivered.send(msg.bundle);
        }
    }

    // Drives the real actor ensemble: storage, routing, client agent and
    // the pipeline all run from the registry against a scratch store.
    #[actix_rt::test]
    async fn received_bundle_reaches_a_registered_agent() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("NODE_ID", "dtn://local");
        std::env::set_var("STORE_PATH", dir.path().join("store").to_string_lossy().to_string());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let agent = CollectingAgent { delivered: tx }.start();
        crate::clientagent::agent::Daemon::from_registry()
            .send(EventClientConnected {
                endpoint: Endpoint::new("dtn://local/app").unwrap(),
                sender: agent.recipient(),
            })
            .await
            .unwrap()
            .unwrap();

        let bundle = Bundle {
            primary_block: PrimaryBlock {
                version: 7,
                bundle_processing_flags: BundleFlags::MUST_NOT_FRAGMENT,
                crc: CRCType::NoCRC,
                destination_endpoint: Endpoint::new("dtn://local/app").unwrap(),
                source_node: Endpoint::new("dtn://remote/sender").unwrap(),
                report_to: Endpoint::none(),
                creation_timestamp: CreationTimestamp {
                    creation_time: DtnTime::now(),
                    sequence_number: 0,
                },
                lifetime: 3_600_000_000,
                fragment_offset: None,
                total_data_length: None,
            },
            blocks: vec![CanonicalBlock {
                block: Block::Payload(PayloadBlock {
                    data: b"hello".to_vec(),
                }),
                block_number: 1,
                block_flags: BlockFlags::empty(),
                crc: CRCType::NoCRC,
            }],
        };

        crate::bundleprotocolagent::agent::Daemon::from_registry().do_send(ReceiveBundle {
            bundle: bundle.clone(),
            receiver: Endpoint::new("dtn://local").unwrap(),
        });

        let delivered = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("delivery must happen within the timeout")
            .expect("the agent channel must stay open");
        assert_eq!(delivered, bundle);

        // the same bundle again is a duplicate and must not be delivered twice
        crate::bundleprotocolagent::agent::Daemon::from_registry().do_send(ReceiveBundle {
            bundle: bundle.clone(),
            receiver: Endpoint::new("dtn://local").unwrap(),
        });
        let second = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(second.is_err(), "a duplicate bundle was delivered");

        // an unprocessable block flagged for removal is stripped before
        // delivery
        let mut with_unknown = bundle.clone();
        with_unknown.primary_block.creation_timestamp.sequence_number = 1;
        with_unknown.blocks.insert(
            0,
            CanonicalBlock {
                block: Block::Unknown(bp7::block::unknown_block::UnknownBlock {
                    block_type: 200,
                    data: vec![0x00],
                }),
                block_number: 2,
                block_flags: BlockFlags::DELETE_BLOCK_WHEN_NOT_PROCESSABLE,
                crc: CRCType::NoCRC,
            },
        );
        crate::bundleprotocolagent::agent::Daemon::from_registry().do_send(ReceiveBundle {
            bundle: with_unknown,
            receiver: Endpoint::new("dtn://local").unwrap(),
        });
        let delivered = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("delivery must happen within the timeout")
            .expect("the agent channel must stay open");
        assert_eq!(delivered.blocks.len(), 1, "the unknown block must be gone");

        // an unprocessable block flagged as fatal drops the whole bundle
        let mut fatal = bundle;
        fatal.primary_block.creation_timestamp.sequence_number = 2;
        fatal.blocks.insert(
            0,
            CanonicalBlock {
                block: Block::Unknown(bp7::block::unknown_block::UnknownBlock {
                    block_type: 201,
                    data: vec![0x00],
                }),
                block_number: 2,
                block_flags: BlockFlags::DELETE_BUNDLE_WHEN_NOT_PROCESSABLE,
                crc: CRCType::NoCRC,
            },
        );
        crate::bundleprotocolagent::agent::Daemon::from_registry().do_send(ReceiveBundle {
            bundle: fatal,
            receiver: Endpoint::new("dtn://local").unwrap(),
        });
        let dropped = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(dropped.is_err(), "a deleted bundle was delivered");
    }
}
