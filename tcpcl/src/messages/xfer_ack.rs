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

use super::Errors;
use super::xfer_segment::XferSegmentFlags;

/// Acknowledges all segments of a transfer up to `acknowledged_length`
/// bytes, echoing the flags of the segment that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XferAck {
    pub flags: XferSegmentFlags,
    pub transfer_id: u64,
    pub acknowledged_length: u64,
}

impl XferAck {
    pub fn new(flags: XferSegmentFlags, transfer_id: u64, acknowledged_length: u64) -> Self {
        XferAck {
            flags,
            transfer_id,
            acknowledged_length,
        }
    }

    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, Errors> {
        if src.remaining() < 17 {
            return Ok(None);
        }
        let flags = XferSegmentFlags::from_bits_truncate(src.get_u8());
        let transfer_id = src.get_u64();
        let acknowledged_length = src.get_u64();
        Ok(Some(XferAck {
            flags,
            transfer_id,
            acknowledged_length,
        }))
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(17);
        dst.put_u8(self.flags.bits());
        dst.put_u64(self.transfer_id);
        dst.put_u64(self.acknowledged_length);
    }
}
