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

use crate::messages::{Messages, sess_init::SessInit};

use super::{SessionState, Stage, StageError, StageUpdate};

/// Exchange of SESS_INIT. The negotiated keepalive is the minimum of both
/// announcements; segment and transfer limits are whatever the peer
/// announced, since they bound what we may send.
#[derive(Debug, Default)]
pub struct SessInitStage {
    sent: bool,
}

impl SessInitStage {
    pub fn new() -> Self {
        SessInitStage::default()
    }

    fn own_init(state: &SessionState) -> SessInit {
        let mut si = SessInit::new(state.node_id.clone());
        si.keepalive_interval = state.keepalive_interval;
        si
    }
}

impl Stage for SessInitStage {
    fn name(&self) -> &'static str {
        "sess_init"
    }

    fn start(&mut self, state: &mut SessionState) -> Vec<Messages> {
        if state.is_server {
            Vec::new()
        } else {
            self.sent = true;
            vec![Messages::SessInit(Self::own_init(state))]
        }
    }

    fn handle_message(
        &mut self,
        state: &mut SessionState,
        msg: Messages,
    ) -> Result<StageUpdate, StageError> {
        let Messages::SessInit(si) = msg else {
            return Err(StageError::UnexpectedMessage(
                "only SESS_INIT may follow the contact exchange",
            ));
        };

        state.negotiated_keepalive =
            Some(state.keepalive_interval.min(si.keepalive_interval));
        state.segment_mtu = Some(si.segment_mru);
        state.transfer_mtu = Some(si.transfer_mru);
        state.peer_node_id = Some(si.node_id);

        let mut update = StageUpdate::default();
        if !self.sent {
            self.sent = true;
            update.send.push(Messages::SessInit(Self::own_init(state)));
        }
        update.finished = true;
        Ok(update)
    }
}
