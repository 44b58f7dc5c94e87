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

//! The session lifecycle as an ordered list of stages over shared state.
//!
//! Stages are pure state machines: they receive decoded messages and timer
//! ticks and answer with messages to send. All socket handling stays in
//! [`crate::session`], which makes every stage testable without I/O.

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::messages::{Errors, Messages, sess_term::{ReasonCode, SessTerm}};
use crate::transfer::Transfer;

pub mod contact;
pub mod sess_established;
pub mod sess_init;

#[derive(Debug)]
pub enum StageError {
    /// The stage was closed from the outside before it finished.
    StageClose,
    /// A message arrived that has no business in the current stage.
    UnexpectedMessage(&'static str),
    Protocol(Errors),
    /// Nothing was heard from the peer for more than twice the keepalive.
    PeerTimeout,
}

/// State shared by all stages of one session, filled in as the handshake
/// progresses.
#[derive(Debug)]
pub struct SessionState {
    /// The passive peer of the connection waits for the active one in
    /// every stage.
    pub is_server: bool,
    pub node_id: String,
    /// Keepalive interval this node announces in its SESS_INIT.
    pub keepalive_interval: u16,
    pub peer_node_id: Option<String>,
    /// min of both announced keepalive intervals, 0 disables keepalives.
    pub negotiated_keepalive: Option<u16>,
    /// Largest segment the peer accepts from us.
    pub segment_mtu: Option<u64>,
    /// Largest transfer the peer accepts from us.
    pub transfer_mtu: Option<u64>,
    pub peer_can_tls: bool,
    /// This node asked for termination and waits for the reply.
    pub terminating: bool,
    /// The session is over, no stage is active anymore.
    pub terminated: bool,
}

impl SessionState {
    pub fn new(is_server: bool, node_id: String, keepalive_interval: u16) -> Self {
        SessionState {
            is_server,
            node_id,
            keepalive_interval,
            peer_node_id: None,
            negotiated_keepalive: None,
            segment_mtu: None,
            transfer_mtu: None,
            peer_can_tls: false,
            terminating: false,
            terminated: false,
        }
    }
}

/// What a stage wants to happen after processing one event.
#[derive(Debug, Default)]
pub struct StageUpdate {
    pub send: Vec<Messages>,
    /// Completed inbound transfers to hand to the consumer.
    pub delivered: Vec<Transfer>,
    /// Outbound transfer ids the peer fully acknowledged.
    pub acked: Vec<u64>,
    /// Outbound transfer ids the peer refused.
    pub refused: Vec<u64>,
    /// The current stage is done, the handler advances to the next one.
    pub finished: bool,
}

pub trait Stage: Send {
    fn name(&self) -> &'static str;

    /// Called once when the stage becomes active; returns messages to send.
    fn start(&mut self, state: &mut SessionState) -> Vec<Messages>;

    fn handle_message(
        &mut self,
        state: &mut SessionState,
        msg: Messages,
    ) -> Result<StageUpdate, StageError>;

    fn on_tick(
        &mut self,
        _state: &mut SessionState,
        _now: Instant,
    ) -> Result<StageUpdate, StageError> {
        Ok(StageUpdate::default())
    }

    /// Only the established stage moves application data.
    fn accepts_transfers(&self) -> bool {
        false
    }

    fn start_transfer(
        &mut self,
        _state: &mut SessionState,
        _data: Vec<u8>,
    ) -> Result<(u64, StageUpdate), StageError> {
        Err(StageError::UnexpectedMessage(
            "transfers are only possible in the established stage",
        ))
    }

    /// Lets the stage track outbound traffic for its keepalive bookkeeping.
    fn note_sent(&mut self, _now: Instant) {}
}

/// Drives an ordered list of stages over one shared [`SessionState`].
pub struct StageHandler {
    stages: VecDeque<Box<dyn Stage>>,
    pub state: SessionState,
}

impl StageHandler {
    pub fn new(state: SessionState, stages: Vec<Box<dyn Stage>>) -> Self {
        StageHandler {
            stages: stages.into(),
            state,
        }
    }

    /// Activates the first stage.
    pub fn start(&mut self) -> Vec<Messages> {
        match self.stages.front_mut() {
            Some(stage) => stage.start(&mut self.state),
            None => Vec::new(),
        }
    }

    pub fn handle_message(&mut self, msg: Messages) -> Result<StageUpdate, StageError> {
        let stage = self
            .stages
            .front_mut()
            .ok_or(StageError::UnexpectedMessage("the session is already over"))?;
        let mut update = stage.handle_message(&mut self.state, msg)?;
        if update.finished {
            self.advance(&mut update);
        }
        Ok(update)
    }

    pub fn on_tick(&mut self, now: Instant) -> Result<StageUpdate, StageError> {
        let stage = match self.stages.front_mut() {
            Some(stage) => stage,
            None => return Ok(StageUpdate::default()),
        };
        let mut update = stage.on_tick(&mut self.state, now)?;
        if update.finished {
            self.advance(&mut update);
        }
        Ok(update)
    }

    pub fn start_transfer(&mut self, data: Vec<u8>) -> Result<(u64, StageUpdate), StageError> {
        let stage = self.stages.front_mut().ok_or(StageError::StageClose)?;
        stage.start_transfer(&mut self.state, data)
    }

    pub fn note_sent(&mut self, now: Instant) {
        if let Some(stage) = self.stages.front_mut() {
            stage.note_sent(now);
        }
    }

    /// Starts an orderly teardown. Inside the established stage this sends
    /// SESS_TERM and waits for the reply; earlier stages are torn down
    /// immediately.
    pub fn close(&mut self) -> Vec<Messages> {
        if self.is_established() && !self.state.terminating {
            self.state.terminating = true;
            vec![Messages::SessTerm(SessTerm::new(ReasonCode::Unknown, false))]
        } else if !self.is_established() {
            self.stages.clear();
            self.state.terminated = true;
            Vec::new()
        } else {
            Vec::new()
        }
    }

    pub fn is_established(&self) -> bool {
        self.stages.front().is_some_and(|s| s.accepts_transfers())
    }

    pub fn is_finished(&self) -> bool {
        self.stages.is_empty()
    }

    fn advance(&mut self, update: &mut StageUpdate) {
        self.stages.pop_front();
        match self.stages.front_mut() {
            Some(next) => {
                let mut msgs = next.start(&mut self.state);
                update.send.append(&mut msgs);
            }
            None => {
                self.state.terminated = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        SessionState, StageHandler,
        contact::ContactStage, sess_established::SessEstablishedStage,
        sess_init::SessInitStage,
    };
    use crate::messages::{
        Messages, contact_header::ContactHeader, sess_init::SessInit,
    };

    fn handler(is_server: bool) -> StageHandler {
        StageHandler::new(
            SessionState::new(is_server, String::from("dtn://local"), 30),
            vec![
                Box::new(ContactStage::new()),
                Box::new(SessInitStage::new()),
                Box::new(SessEstablishedStage::new()),
            ],
        )
    }

    #[test]
    fn active_peer_walks_all_stages() {
        let mut handler = handler(false);
        // the active peer opens with its contact header
        let initial = handler.start();
        assert!(matches!(initial[..], [Messages::ContactHeader(_)]));

        // peer's contact header finishes the contact stage and triggers
        // our SESS_INIT
        let update = handler
            .handle_message(Messages::ContactHeader(ContactHeader::new()))
            .unwrap();
        assert!(matches!(update.send[..], [Messages::SessInit(_)]));
        assert!(!handler.is_established());

        // peer's SESS_INIT establishes the session
        let mut peer_init = SessInit::new(String::from("dtn://peer"));
        peer_init.keepalive_interval = 20;
        let update = handler.handle_message(Messages::SessInit(peer_init)).unwrap();
        assert!(update.send.is_empty());
        assert!(handler.is_established());
        assert_eq!(handler.state.peer_node_id.as_deref(), Some("dtn://peer"));
        // keepalive settles on the minimum of both announcements
        assert_eq!(handler.state.negotiated_keepalive, Some(20));
    }

    #[test]
    fn passive_peer_answers_in_each_stage() {
        let mut handler = handler(true);
        assert!(handler.start().is_empty());

        let update = handler
            .handle_message(Messages::ContactHeader(ContactHeader::new()))
            .unwrap();
        assert!(matches!(update.send[..], [Messages::ContactHeader(_)]));

        let update = handler
            .handle_message(Messages::SessInit(SessInit::new(String::from(
                "dtn://peer",
            ))))
            .unwrap();
        assert!(matches!(update.send[..], [Messages::SessInit(_)]));
        assert!(handler.is_established());
        assert_eq!(handler.state.negotiated_keepalive, Some(30));
    }

    #[test]
    fn unexpected_message_is_an_error() {
        let mut handler = handler(false);
        handler.start();
        assert!(
            handler
                .handle_message(Messages::SessInit(SessInit::new(String::from(
                    "dtn://peer"
                ))))
                .is_err()
        );
    }
}
