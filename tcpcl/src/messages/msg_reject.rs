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

use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::Errors;

#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Clone, Copy)]
#[repr(u8)]
pub enum RejectionReason {
    Unknown = 0x00,
    TypeUnknown = 0x01,
    Unsupported = 0x02,
    Unexpected = 0x03,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgReject {
    pub reason: RejectionReason,
    pub rejected_message_header: u8,
}

impl MsgReject {
    pub fn new(reason: RejectionReason, rejected_message_header: u8) -> Self {
        MsgReject {
            reason,
            rejected_message_header,
        }
    }

    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, Errors> {
        if src.remaining() < 2 {
            return Ok(None);
        }
        let reason = src.get_u8().try_into().unwrap_or(RejectionReason::Unknown);
        let rejected_message_header = src.get_u8();
        Ok(Some(MsgReject {
            reason,
            rejected_message_header,
        }))
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(2);
        dst.put_u8(self.reason.into());
        dst.put_u8(self.rejected_message_header);
    }
}
