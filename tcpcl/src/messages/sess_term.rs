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

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::Errors;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct SessTermFlags: u8 {
        /// This termination answers the peer's termination.
        const REPLY = 0x01;
    }
}

#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Clone, Copy)]
#[repr(u8)]
pub enum ReasonCode {
    Unknown = 0x00,
    IdleTimeout = 0x01,
    VersionMissmatch = 0x02,
    Busy = 0x03,
    ContactFailure = 0x04,
    ResourceExhaustion = 0x05,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessTerm {
    pub flags: SessTermFlags,
    pub reason: ReasonCode,
}

impl SessTerm {
    pub fn new(reason: ReasonCode, reply: bool) -> Self {
        SessTerm {
            flags: if reply {
                SessTermFlags::REPLY
            } else {
                SessTermFlags::empty()
            },
            reason,
        }
    }

    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, Errors> {
        if src.remaining() < 2 {
            return Ok(None);
        }
        let flags = SessTermFlags::from_bits_truncate(src.get_u8());
        let reason = src
            .get_u8()
            .try_into()
            .unwrap_or(ReasonCode::Unknown);
        Ok(Some(SessTerm { flags, reason }))
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(2);
        dst.put_u8(self.flags.bits());
        dst.put_u8(self.reason.into());
    }
}
