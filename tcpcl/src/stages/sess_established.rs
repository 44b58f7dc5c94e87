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

use std::collections::VecDeque;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use crate::messages::{
    Messages,
    keepalive::Keepalive,
    sess_init::MAX_TRANSFER_MRU,
    sess_term::{ReasonCode, SessTerm},
    xfer_ack::XferAck,
    xfer_refuse::{RefusalReason, XferRefuse},
    xfer_segment::{XferSegment, XferSegmentFlags},
};
use crate::transfer::Transfer;

use super::{SessionState, Stage, StageError, StageUpdate};

struct IncomingTransfer {
    id: u64,
    data: Vec<u8>,
}

struct OutgoingTransfer {
    id: u64,
    total_length: u64,
}

/// The steady state of a session: transfers move in both directions and
/// keepalive duties run against the negotiated interval.
pub struct SessEstablishedStage {
    last_received: Instant,
    last_sent: Instant,
    next_transfer_id: u64,
    incoming: Option<IncomingTransfer>,
    outgoing: VecDeque<OutgoingTransfer>,
}

impl Default for SessEstablishedStage {
    fn default() -> Self {
        SessEstablishedStage::new()
    }
}

impl SessEstablishedStage {
    pub fn new() -> Self {
        let now = Instant::now();
        SessEstablishedStage {
            last_received: now,
            last_sent: now,
            next_transfer_id: 0,
            incoming: None,
            outgoing: VecDeque::new(),
        }
    }

    fn keepalive(state: &SessionState) -> Option<Duration> {
        match state.negotiated_keepalive {
            Some(0) | None => None,
            Some(secs) => Some(Duration::from_secs(u64::from(secs))),
        }
    }

    fn handle_segment(
        &mut self,
        seg: XferSegment,
    ) -> Result<StageUpdate, StageError> {
        let mut update = StageUpdate::default();

        if seg.flags.contains(XferSegmentFlags::START) {
            if self.incoming.is_some() {
                return Err(StageError::UnexpectedMessage(
                    "new transfer started while another one is active",
                ));
            }
            self.incoming = Some(IncomingTransfer {
                id: seg.transfer_id,
                data: Vec::new(),
            });
        }
        let Some(incoming) = self.incoming.as_mut() else {
            return Err(StageError::UnexpectedMessage(
                "transfer segment without a started transfer",
            ));
        };
        if incoming.id != seg.transfer_id {
            return Err(StageError::UnexpectedMessage(
                "transfer segment for a different transfer id",
            ));
        }

        if (incoming.data.len() + seg.data.len()) as u64 > MAX_TRANSFER_MRU {
            warn!(
                "Peer exceeded our transfer MRU on transfer {}, refusing it",
                seg.transfer_id
            );
            self.incoming = None;
            update.send.push(Messages::XferRefuse(XferRefuse::new(
                RefusalReason::NoResources,
                seg.transfer_id,
            )));
            return Ok(update);
        }

        incoming.data.extend_from_slice(&seg.data);
        update.send.push(Messages::XferAck(XferAck::new(
            seg.flags,
            seg.transfer_id,
            incoming.data.len() as u64,
        )));

        if seg.flags.contains(XferSegmentFlags::END) {
            let done = self.incoming.take().unwrap();
            debug!(
                "Completed inbound transfer {} ({} bytes)",
                done.id,
                done.data.len()
            );
            update.delivered.push(Transfer {
                id: done.id,
                data: done.data,
            });
        }
        Ok(update)
    }

    fn handle_ack(&mut self, ack: XferAck) -> StageUpdate {
        let mut update = StageUpdate::default();
        if let Some(front) = self.outgoing.front() {
            if front.id == ack.transfer_id
                && ack.flags.contains(XferSegmentFlags::END)
                && ack.acknowledged_length == front.total_length
            {
                update.acked.push(front.id);
                self.outgoing.pop_front();
            }
        }
        update
    }
}

impl Stage for SessEstablishedStage {
    fn name(&self) -> &'static str {
        "established"
    }

    fn start(&mut self, _state: &mut SessionState) -> Vec<Messages> {
        let now = Instant::now();
        self.last_received = now;
        self.last_sent = now;
        Vec::new()
    }

    fn accepts_transfers(&self) -> bool {
        true
    }

    fn handle_message(
        &mut self,
        state: &mut SessionState,
        msg: Messages,
    ) -> Result<StageUpdate, StageError> {
        self.last_received = Instant::now();
        match msg {
            Messages::Keepalive(_) => Ok(StageUpdate::default()),
            Messages::XferSegment(seg) => self.handle_segment(seg),
            Messages::XferAck(ack) => Ok(self.handle_ack(ack)),
            Messages::XferRefuse(refuse) => {
                let mut update = StageUpdate::default();
                if let Some(pos) = self
                    .outgoing
                    .iter()
                    .position(|o| o.id == refuse.transfer_id)
                {
                    self.outgoing.remove(pos);
                    update.refused.push(refuse.transfer_id);
                }
                Ok(update)
            }
            Messages::SessTerm(st) => {
                let mut update = StageUpdate::default();
                if !st
                    .flags
                    .contains(crate::messages::sess_term::SessTermFlags::REPLY)
                    && !state.terminating
                {
                    update.send.push(Messages::SessTerm(SessTerm::new(
                        ReasonCode::Unknown,
                        true,
                    )));
                }
                update.finished = true;
                Ok(update)
            }
            Messages::MsgReject(reject) => {
                warn!("Peer rejected one of our messages: {reject:?}");
                Ok(StageUpdate::default())
            }
            Messages::ContactHeader(_) | Messages::SessInit(_) => Err(
                StageError::UnexpectedMessage("handshake message inside an established session"),
            ),
        }
    }

    fn on_tick(
        &mut self,
        state: &mut SessionState,
        now: Instant,
    ) -> Result<StageUpdate, StageError> {
        let Some(keepalive) = Self::keepalive(state) else {
            return Ok(StageUpdate::default());
        };
        if now.duration_since(self.last_received) > keepalive * 2 {
            return Err(StageError::PeerTimeout);
        }
        let mut update = StageUpdate::default();
        if now.duration_since(self.last_sent) >= keepalive {
            update.send.push(Messages::Keepalive(Keepalive::new()));
        }
        Ok(update)
    }

    fn start_transfer(
        &mut self,
        state: &mut SessionState,
        data: Vec<u8>,
    ) -> Result<(u64, StageUpdate), StageError> {
        let id = self.next_transfer_id;
        self.next_transfer_id += 1;

        let segment_size = state.segment_mtu.unwrap_or(u64::MAX).max(1) as usize;
        let total_length = data.len() as u64;
        let mut update = StageUpdate::default();

        let mut chunks: Vec<&[u8]> = data.chunks(segment_size).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.iter().enumerate() {
            let mut flags = XferSegmentFlags::empty();
            if i == 0 {
                flags |= XferSegmentFlags::START;
            }
            if i == last {
                flags |= XferSegmentFlags::END;
            }
            update
                .send
                .push(Messages::XferSegment(XferSegment::new(
                    flags,
                    id,
                    chunk.to_vec(),
                )));
        }

        self.outgoing.push_back(OutgoingTransfer { id, total_length });
        Ok((id, update))
    }

    fn note_sent(&mut self, now: Instant) {
        self.last_sent = now;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::SessEstablishedStage;
    use crate::{
        messages::{
            Messages,
            xfer_ack::XferAck,
            xfer_segment::{XferSegment, XferSegmentFlags},
        },
        stages::{SessionState, Stage, StageError},
    };

    fn state() -> SessionState {
        let mut state = SessionState::new(false, String::from("dtn://local"), 2);
        state.negotiated_keepalive = Some(2);
        state.segment_mtu = Some(4);
        state.transfer_mtu = Some(1024);
        state
    }

    #[test]
    fn inbound_transfer_is_acked_and_delivered() {
        let mut stage = SessEstablishedStage::new();
        let mut state = state();

        let seg = XferSegment::new(
            XferSegmentFlags::START | XferSegmentFlags::END,
            0,
            b"bundle".to_vec(),
        );
        let update = stage
            .handle_message(&mut state, Messages::XferSegment(seg))
            .unwrap();
        assert_eq!(update.delivered.len(), 1);
        assert_eq!(update.delivered[0].data, b"bundle");
        assert!(matches!(update.send[..], [Messages::XferAck(_)]));
    }

    #[test]
    fn outbound_transfer_is_segmented_by_mtu() {
        let mut stage = SessEstablishedStage::new();
        let mut state = state();

        let (id, update) = stage
            .start_transfer(&mut state, b"123456789".to_vec())
            .unwrap();
        // 9 bytes over a segment mtu of 4 makes 3 segments
        assert_eq!(update.send.len(), 3);
        let Messages::XferSegment(first) = &update.send[0] else {
            panic!("expected a transfer segment");
        };
        assert!(first.flags.contains(XferSegmentFlags::START));

        // the final cumulative ack completes the transfer
        let update = stage
            .handle_message(
                &mut state,
                Messages::XferAck(XferAck::new(XferSegmentFlags::END, id, 9)),
            )
            .unwrap();
        assert_eq!(update.acked, vec![id]);
    }

    #[test]
    fn silence_past_twice_the_keepalive_times_out() {
        let mut stage = SessEstablishedStage::new();
        let mut state = state();
        stage.start(&mut state);

        let now = Instant::now();
        assert!(stage.on_tick(&mut state, now).is_ok());
        let res = stage.on_tick(&mut state, now + Duration::from_secs(5));
        assert!(matches!(res, Err(StageError::PeerTimeout)));
    }

    #[test]
    fn keepalive_sent_when_idle() {
        let mut stage = SessEstablishedStage::new();
        let mut state = state();
        stage.start(&mut state);

        let now = Instant::now();
        let update = stage.on_tick(&mut state, now + Duration::from_secs(3));
        // 3s is past the 2s keepalive but below the 4s timeout
        match update {
            Ok(update) => assert!(matches!(update.send[..], [Messages::Keepalive(_)])),
            Err(e) => panic!("unexpected error {e:?}"),
        }
    }
}
