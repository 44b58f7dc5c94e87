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

use crate::messages::{Messages, contact_header::{ContactHeader, ContactHeaderFlags}};

use super::{SessionState, Stage, StageError, StageUpdate};

/// Exchange of the 6-byte contact headers and settlement of the session
/// flags. The active peer sends first, the passive one answers.
#[derive(Debug, Default)]
pub struct ContactStage {
    sent: bool,
    received: bool,
}

impl ContactStage {
    pub fn new() -> Self {
        ContactStage::default()
    }
}

impl Stage for ContactStage {
    fn name(&self) -> &'static str {
        "contact"
    }

    fn start(&mut self, state: &mut SessionState) -> Vec<Messages> {
        if state.is_server {
            Vec::new()
        } else {
            self.sent = true;
            vec![Messages::ContactHeader(ContactHeader::new())]
        }
    }

    fn handle_message(
        &mut self,
        state: &mut SessionState,
        msg: Messages,
    ) -> Result<StageUpdate, StageError> {
        let Messages::ContactHeader(ch) = msg else {
            return Err(StageError::UnexpectedMessage(
                "a session must start with a contact header",
            ));
        };
        if self.received {
            return Err(StageError::UnexpectedMessage("second contact header"));
        }
        self.received = true;
        state.peer_can_tls = ch.flags.contains(ContactHeaderFlags::CAN_TLS);

        let mut update = StageUpdate::default();
        if !self.sent {
            self.sent = true;
            update
                .send
                .push(Messages::ContactHeader(ContactHeader::new()));
        }
        update.finished = true;
        Ok(update)
    }
}
