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

use std::collections::HashSet;

use bp7::{
    bundle::{Bundle, BundleId},
    endpoint::Endpoint,
    time::DtnTime,
};
use log::{debug, info, warn};

use crate::{common::settings::Settings, routingagent::messages::NotifyCleanup};

use super::{BundleItem, BundlePack, Constraint, messages::*};
use actix::prelude::*;

/// Metadata keys starting with this prefix are internal bookkeeping, not
/// bundle items.
const INTERNAL_KEY_PREFIX: &str = "__";
const IDKEEPER_KEY: &str = "__idkeeper";

/// The persistent bundle store plus the creation-timestamp keeper.
///
/// Bundle bytes and metadata live in two sled trees, both keyed by the
/// stringified bundle id. Fragments awaiting reassembly share one metadata
/// record under their scrubbed id, with each part's bytes stored under its
/// full id.
#[derive(Default)]
pub struct Daemon {
    db: Option<sled::Db>,
    bundles: Option<sled::Tree>,
    metadata: Option<sled::Tree>,
    endpoint: Option<Endpoint>,
    last_created_dtn_time: Option<DtnTime>,
    last_sequence_number: u64,
}

impl Actor for Daemon {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        let settings = Settings::from_env();
        let endpoint = Endpoint::new(&settings.my_node_id).unwrap();
        self.open(&settings.store_path, endpoint);
    }

    fn stopped(&mut self, _ctx: &mut Context<Self>) {
        if let Some(db) = &self.db {
            if let Err(e) = db.flush() {
                warn!("Flushing the bundle store on shutdown failed: {e}");
            }
        }
    }
}

impl actix::Supervised for Daemon {}

impl SystemService for Daemon {}

impl Handler<StoreBundle> for Daemon {
    type Result = Result<StoreBundleOutcome, StoreError>;

    fn handle(&mut self, msg: StoreBundle, _ctx: &mut Context<Self>) -> Self::Result {
        let StoreBundle { bundle, receiver } = msg;

        // A bundle we originated can come back over the network; the
        // duplicate check below swallows it. Only sequence-number
        // assignment is reserved to StoreNewBundle.
        if bundle
            .primary_block
            .source_node
            .matches_node(self.endpoint.as_ref().unwrap())
        {
            debug!("Storing a bundle sourced at this node that came in from outside");
        }

        self.store_bundle(bundle, receiver)
    }
}

impl Handler<StoreNewBundle> for Daemon {
    type Result = Result<BundlePack, StoreError>;

    fn handle(&mut self, msg: StoreNewBundle, _ctx: &mut Self::Context) -> Self::Result {
        let StoreNewBundle { mut bundle } = msg;

        let source = &bundle.primary_block.source_node;
        if !source.is_null_endpoint()
            && !source.matches_node(self.endpoint.as_ref().unwrap())
        {
            panic!(
                "Received a StoreNewBundle message with some other node as source node. Use StoreBundle instead!"
            );
        }
        if bundle.primary_block.fragment_offset.is_some() {
            panic!("Do not send fragments to StoreNewBundle");
        }

        let sequence_number = self.next_sequence_number(
            bundle.primary_block.creation_timestamp.creation_time,
        )?;
        debug!("Decided sequence number {sequence_number} for new bundle");
        bundle.primary_block.creation_timestamp.sequence_number = sequence_number;

        let pack = BundlePack::new(bundle, Endpoint::none());
        self.persist_pack(&pack)?;
        Ok(pack)
    }
}

impl Handler<SyncBundlePack> for Daemon {
    type Result = Result<(), StoreError>;

    fn handle(&mut self, msg: SyncBundlePack, _ctx: &mut Self::Context) -> Self::Result {
        self.persist_pack(&msg.pack)
    }
}

impl Handler<QueryBundle> for Daemon {
    type Result = Result<BundlePack, StoreError>;

    fn handle(&mut self, msg: QueryBundle, _ctx: &mut Self::Context) -> Self::Result {
        let item = self
            .read_item(&Self::item_key(&msg.id))?
            .ok_or(StoreError::NotFound)?;
        self.load_pack(&item)
    }
}

impl Handler<QueryPending> for Daemon {
    type Result = Vec<BundlePack>;

    fn handle(&mut self, _msg: QueryPending, _ctx: &mut Self::Context) -> Self::Result {
        let mut pending = Vec::new();
        for item in self.all_items() {
            if !item.pending {
                continue;
            }
            match self.load_pack(&item) {
                Ok(pack) => pending.push(pack),
                Err(e) => warn!("Could not load pending bundle {}: {e:?}", item.id),
            }
        }
        debug!("Returning {} pending bundles", pending.len());
        pending
    }
}

impl Handler<QueryAllIds> for Daemon {
    type Result = Vec<BundleId>;

    fn handle(&mut self, _msg: QueryAllIds, _ctx: &mut Self::Context) -> Self::Result {
        self.all_items().into_iter().map(|i| i.id).collect()
    }
}

impl Handler<KnowsBundle> for Daemon {
    type Result = Result<bool, StoreError>;

    fn handle(&mut self, msg: KnowsBundle, _ctx: &mut Self::Context) -> Self::Result {
        Ok(self.metadata().contains_key(Self::item_key(&msg.id))?)
    }
}

impl Handler<DeleteBundle> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: DeleteBundle, _ctx: &mut Context<Self>) {
        if let Err(e) = self.delete_item(&msg.id) {
            warn!("Could not delete bundle {}: {e:?}", msg.id);
        }
    }
}

impl Handler<DeleteExpired> for Daemon {
    type Result = usize;

    fn handle(&mut self, _msg: DeleteExpired, _ctx: &mut Self::Context) -> Self::Result {
        let now = DtnTime::now();
        let expired: Vec<BundleId> = self
            .all_items()
            .into_iter()
            .filter(|i| i.expires_at < now)
            .map(|i| i.id)
            .collect();
        for id in &expired {
            info!("Bundle {id} expired, removing it from the store");
            if let Err(e) = self.delete_item(id) {
                warn!("Could not delete expired bundle {id}: {e:?}");
            }
        }
        if !expired.is_empty() {
            crate::routingagent::agent::Daemon::from_registry()
                .do_send(NotifyCleanup {
                    ids: expired.clone(),
                });
        }
        expired.len()
    }
}

impl Handler<UpdateBundleProperties> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: UpdateBundleProperties, _ctx: &mut Self::Context) {
        let UpdateBundleProperties { id, key, values } = msg;
        let item_key = Self::item_key(&id);
        match self.read_item(&item_key) {
            Ok(Some(mut item)) => {
                item.properties.insert(key, values);
                if let Err(e) = self.write_item(&item) {
                    warn!("Could not update properties of {id}: {e:?}");
                }
            }
            Ok(None) => debug!("Ignoring property update for unknown bundle {id}"),
            Err(e) => warn!("Could not read bundle {id} for a property update: {e:?}"),
        }
    }
}

impl Daemon {
    /// Opens the backing database. Failing here is fatal on purpose, a
    /// node without its store must not come up.
    fn open(&mut self, path: &str, endpoint: Endpoint) {
        let db = sled::open(path).expect("opening the bundle store must succeed");
        self.bundles = Some(
            db.open_tree("bundles")
                .expect("opening the bundle tree must succeed"),
        );
        let metadata = db
            .open_tree("metadata")
            .expect("opening the metadata tree must succeed");
        if let Ok(Some(raw)) = metadata.get(IDKEEPER_KEY) {
            if let Ok((secs, seq)) = serde_cbor::from_slice::<(u64, u64)>(&raw) {
                self.last_created_dtn_time = Some(DtnTime { timestamp: secs });
                self.last_sequence_number = seq;
            }
        }
        self.metadata = Some(metadata);
        self.db = Some(db);
        self.endpoint = Some(endpoint);
        info!("Bundle store at {path} is ready");
    }

    fn bundles(&self) -> &sled::Tree {
        self.bundles.as_ref().expect("store must be open")
    }

    fn metadata(&self) -> &sled::Tree {
        self.metadata.as_ref().expect("store must be open")
    }

    fn item_key(id: &BundleId) -> Vec<u8> {
        id.to_string().into_bytes()
    }

    fn next_sequence_number(&mut self, timestamp: DtnTime) -> Result<u64, StoreError> {
        let sequence_number = if Some(timestamp) == self.last_created_dtn_time {
            self.last_sequence_number += 1;
            self.last_sequence_number
        } else {
            self.last_created_dtn_time = Some(timestamp);
            self.last_sequence_number = 0;
            0
        };
        self.metadata().insert(
            IDKEEPER_KEY,
            serde_cbor::to_vec(&(timestamp.timestamp, sequence_number))?,
        )?;
        Ok(sequence_number)
    }

    fn store_bundle(
        &mut self,
        bundle: Bundle,
        receiver: Endpoint,
    ) -> Result<StoreBundleOutcome, StoreError> {
        let id = bundle.id();
        let local_destination = bundle
            .primary_block
            .destination_endpoint
            .matches_node(self.endpoint.as_ref().unwrap());

        if id.is_fragment() && local_destination {
            return self.store_fragment(bundle, receiver);
        }

        if self.metadata().contains_key(Self::item_key(&id))? {
            debug!("Bundle {id} is already known, not storing it again");
            return Ok(StoreBundleOutcome::Duplicate);
        }

        let pack = BundlePack::new(bundle, receiver);
        self.persist_pack(&pack)?;
        debug!("Stored bundle {id}");
        Ok(StoreBundleOutcome::Stored(pack))
    }

    /// Collects fragments addressed to this node under their scrubbed id
    /// until the payload is complete.
    fn store_fragment(
        &mut self,
        bundle: Bundle,
        receiver: Endpoint,
    ) -> Result<StoreBundleOutcome, StoreError> {
        let id = bundle.id();
        let scrubbed = id.scrubbed();
        let group_key = Self::item_key(&scrubbed);

        let mut group = match self.read_item(&group_key)? {
            Some(item) => item,
            None => BundleItem {
                id: scrubbed.clone(),
                pending: false,
                expires_at: BundlePack::new(bundle.clone(), receiver.clone()).expires_at(),
                receiver: receiver.clone(),
                timestamp: DtnTime::now(),
                constraints: HashSet::from([Constraint::ReassemblyPending]),
                properties: std::collections::HashMap::new(),
                parts: Vec::new(),
            },
        };
        if group.parts.contains(&id) {
            debug!("Fragment {id} is already known, not storing it again");
            return Ok(StoreBundleOutcome::Duplicate);
        }

        let bytes: Vec<u8> = (&bundle).try_into()?;
        self.bundles().insert(Self::item_key(&id), bytes)?;
        group.parts.push(id);

        let mut fragments = Vec::with_capacity(group.parts.len());
        for part in &group.parts {
            fragments.push(self.load_bundle(part)?);
        }
        match Bundle::reassemble(fragments) {
            Ok(whole) => {
                for part in &group.parts {
                    self.bundles().remove(Self::item_key(part))?;
                }
                self.metadata().remove(&group_key)?;
                let pack = BundlePack::new(whole, receiver);
                self.persist_pack(&pack)?;
                debug!("Reassembled bundle {} from fragments", pack.id());
                Ok(StoreBundleOutcome::Stored(pack))
            }
            Err(_) => {
                self.write_item(&group)?;
                Ok(StoreBundleOutcome::AwaitingFragments)
            }
        }
    }

    fn persist_pack(&self, pack: &BundlePack) -> Result<(), StoreError> {
        let id = pack.id();
        let key = Self::item_key(&id);
        let bytes: Vec<u8> = (&pack.bundle).try_into()?;
        self.bundles().insert(key.clone(), bytes)?;
        let item = BundleItem {
            id: id.clone(),
            pending: pack.is_pending(),
            expires_at: pack.expires_at(),
            receiver: pack.receiver.clone(),
            timestamp: pack.timestamp,
            constraints: pack.constraints.clone(),
            properties: pack.properties.clone(),
            parts: vec![id],
        };
        self.metadata().insert(key, serde_cbor::to_vec(&item)?)?;
        Ok(())
    }

    fn read_item(&self, key: &[u8]) -> Result<Option<BundleItem>, StoreError> {
        match self.metadata().get(key)? {
            Some(raw) => Ok(Some(serde_cbor::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn write_item(&self, item: &BundleItem) -> Result<(), StoreError> {
        self.metadata()
            .insert(Self::item_key(&item.id), serde_cbor::to_vec(item)?)?;
        Ok(())
    }

    fn load_bundle(&self, id: &BundleId) -> Result<Bundle, StoreError> {
        let raw = self
            .bundles()
            .get(Self::item_key(id))?
            .ok_or(StoreError::NotFound)?;
        Ok(Bundle::try_from(raw.as_ref())?)
    }

    fn load_pack(&self, item: &BundleItem) -> Result<BundlePack, StoreError> {
        if item.parts.len() != 1 {
            return Err(StoreError::NotFound);
        }
        let bundle = self.load_bundle(&item.parts[0])?;
        Ok(BundlePack {
            bundle,
            receiver: item.receiver.clone(),
            timestamp: item.timestamp,
            constraints: item.constraints.clone(),
            properties: item.properties.clone(),
        })
    }

    fn all_items(&self) -> Vec<BundleItem> {
        let mut items = Vec::new();
        for entry in self.metadata().iter() {
            let (key, raw) = match entry {
                Ok(kv) => kv,
                Err(e) => {
                    warn!("Error iterating the metadata tree: {e}");
                    continue;
                }
            };
            if key.starts_with(INTERNAL_KEY_PREFIX.as_bytes()) {
                continue;
            }
            match serde_cbor::from_slice::<BundleItem>(&raw) {
                Ok(item) => items.push(item),
                Err(e) => warn!("Undecodable metadata record in the store: {e}"),
            }
        }
        items
    }

    fn delete_item(&self, id: &BundleId) -> Result<(), StoreError> {
        let key = Self::item_key(id);
        if let Some(item) = self.read_item(&key)? {
            for part in &item.parts {
                self.bundles().remove(Self::item_key(part))?;
            }
        }
        self.bundles().remove(key.clone())?;
        self.metadata().remove(key)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
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

    use crate::bundlestorageagent::{Constraint, messages::StoreBundleOutcome};

    use super::Daemon;

    fn open_daemon() -> (Daemon, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut daemon = Daemon::default();
        daemon.open(
            dir.path().to_str().unwrap(),
            Endpoint::new("dtn://local").unwrap(),
        );
        (daemon, dir)
    }

    fn test_bundle(source: &str, destination: &str, seq: u64) -> Bundle {
        Bundle {
            primary_block: PrimaryBlock {
                version: 7,
                bundle_processing_flags: BundleFlags::MUST_NOT_FRAGMENT,
                crc: CRCType::NoCRC,
                destination_endpoint: Endpoint::new(destination).unwrap(),
                source_node: Endpoint::new(source).unwrap(),
                report_to: Endpoint::new(source).unwrap(),
                creation_timestamp: CreationTimestamp {
                    creation_time: DtnTime { timestamp: 800_000_000 },
                    sequence_number: seq,
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
        }
    }

    #[test]
    fn store_is_idempotent() {
        let (mut daemon, _dir) = open_daemon();
        let bundle = test_bundle("dtn://remote/a", "dtn://local/app", 0);

        let first = daemon
            .store_bundle(bundle.clone(), Endpoint::new("dtn://local").unwrap())
            .unwrap();
        assert!(matches!(first, StoreBundleOutcome::Stored(_)));

        let second = daemon
            .store_bundle(bundle, Endpoint::new("dtn://local").unwrap())
            .unwrap();
        assert!(matches!(second, StoreBundleOutcome::Duplicate));
    }

    #[test]
    fn pending_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::new("dtn://local").unwrap();

        {
            let mut daemon = Daemon::default();
            daemon.open(dir.path().to_str().unwrap(), endpoint.clone());
            let outcome = daemon
                .store_bundle(
                    test_bundle("dtn://remote/a", "dtn://far/app", 0),
                    endpoint.clone(),
                )
                .unwrap();
            let StoreBundleOutcome::Stored(mut pack) = outcome else {
                panic!("expected a stored bundle");
            };
            pack.add_constraint(Constraint::Contraindicated);
            daemon.persist_pack(&pack).unwrap();
        }

        // reopen, like after a crash or restart
        let mut daemon = Daemon::default();
        daemon.open(dir.path().to_str().unwrap(), endpoint);
        let pending: Vec<_> = daemon
            .all_items()
            .into_iter()
            .filter(|i| i.pending)
            .collect();
        assert_eq!(pending.len(), 1);
        let pack = daemon.load_pack(&pending[0]).unwrap();
        assert!(pack.has_constraint(Constraint::Contraindicated));
        assert_eq!(pack.bundle.payload_block().data, b"hello");
    }

    #[test]
    fn sequence_numbers_stay_unique_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::new("dtn://local").unwrap();
        let now = DtnTime { timestamp: 800_000_000 };

        let mut first;
        {
            let mut daemon = Daemon::default();
            daemon.open(dir.path().to_str().unwrap(), endpoint.clone());
            first = daemon.next_sequence_number(now).unwrap();
            let second = daemon.next_sequence_number(now).unwrap();
            assert!(second > first);
            first = second;
        }

        let mut daemon = Daemon::default();
        daemon.open(dir.path().to_str().unwrap(), endpoint);
        let third = daemon.next_sequence_number(now).unwrap();
        assert!(third > first);
    }

    #[test]
    fn fragments_reassemble_for_local_destinations() {
        let (mut daemon, _dir) = open_daemon();
        let receiver = Endpoint::new("dtn://local").unwrap();
        let mut original = test_bundle("dtn://remote/a", "dtn://local/app", 1);
        original.primary_block.bundle_processing_flags = BundleFlags::empty();
        if let Block::Payload(p) = &mut original.blocks[0].block {
            p.data = (0..512).map(|i| i as u8).collect();
        }

        let fragments = original.clone().fragment(256).unwrap();
        assert!(fragments.len() >= 2);
        let last = fragments.len() - 1;
        for (i, fragment) in fragments.into_iter().enumerate() {
            let outcome = daemon.store_bundle(fragment, receiver.clone()).unwrap();
            if i == last {
                let StoreBundleOutcome::Stored(pack) = outcome else {
                    panic!("expected reassembly to complete");
                };
                assert_eq!(pack.bundle.payload_block().data.len(), 512);
                assert!(pack.id().fragment_offset.is_none());
            } else {
                assert!(matches!(outcome, StoreBundleOutcome::AwaitingFragments));
            }
        }
    }

    #[test]
    fn delete_expired_removes_only_expired_items() {
        let (mut daemon, _dir) = open_daemon();
        let receiver = Endpoint::new("dtn://local").unwrap();

        let mut old = test_bundle("dtn://remote/a", "dtn://far/app", 0);
        old.primary_block.creation_timestamp.creation_time = DtnTime { timestamp: 1 };
        old.primary_block.lifetime = 1_000_000;
        daemon.store_bundle(old, receiver.clone()).unwrap();

        let mut fresh = test_bundle("dtn://remote/a", "dtn://far/app", 1);
        fresh.primary_block.creation_timestamp.creation_time = DtnTime::now();
        let fresh_id = fresh.id();
        daemon.store_bundle(fresh, receiver).unwrap();

        let expired: Vec<_> = daemon
            .all_items()
            .into_iter()
            .filter(|i| i.expires_at < DtnTime::now())
            .map(|i| i.id)
            .collect();
        assert_eq!(expired.len(), 1);
        for id in &expired {
            daemon.delete_item(id).unwrap();
        }
        let remaining = daemon.all_items();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, fresh_id);
    }
}
