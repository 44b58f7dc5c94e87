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

use super::Errors;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct XferSegmentFlags: u8 {
        const END = 0x01;
        const START = 0x02;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XferSegment {
    pub flags: XferSegmentFlags,
    pub transfer_id: u64,
    pub data: Vec<u8>,
}

impl XferSegment {
    pub fn new(flags: XferSegmentFlags, transfer_id: u64, data: Vec<u8>) -> Self {
        XferSegment {
            flags,
            transfer_id,
            data,
        }
    }

    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, Errors> {
        if src.remaining() < 9 {
            return Ok(None);
        }

        let flags = XferSegmentFlags::from_bits_truncate(src[0]);
        let mut header_len: usize = 1 + 8;
        let mut extensions_length: usize = 0;
        if flags.contains(XferSegmentFlags::START) {
            // a START segment carries a transfer extension list
            if src.remaining() < header_len + 4 {
                return Ok(None);
            }
            extensions_length =
                u32::from_be_bytes(src[header_len..header_len + 4].try_into().unwrap()) as usize;
            header_len += 4;
        }
        if src.remaining() < header_len + extensions_length + 8 {
            return Ok(None);
        }
        let data_start = header_len + extensions_length + 8;
        let data_length = u64::from_be_bytes(
            src[header_len + extensions_length..data_start]
                .try_into()
                .unwrap(),
        );
        if data_length > usize::MAX as u64 {
            return Err(Errors::SegmentTooLong);
        }
        let frame_len = data_start
            .checked_add(data_length as usize)
            .ok_or(Errors::SegmentTooLong)?;
        if src.remaining() < frame_len {
            return Ok(None);
        }

        // the whole frame is buffered, the cursor may move now
        src.advance(1); // flags
        let transfer_id = src.get_u64();
        if flags.contains(XferSegmentFlags::START) {
            src.advance(4);
            // transfer extensions carry no meaning here yet, their critical
            // flag still has to be honored
            let mut remaining = extensions_length;
            while remaining > 0 {
                let ext_flags = src.get_u8();
                let ext_type = src.get_u16();
                let value_length = src.get_u16() as usize;
                src.advance(value_length);
                remaining = remaining.saturating_sub(5 + value_length);
                if ext_flags & 0x01 != 0 {
                    return Err(Errors::UnknownCriticalTransferExtension(ext_type));
                }
            }
        }
        src.advance(8); // data length, peeked above
        let data = src[0..data_length as usize].to_vec();
        src.advance(data_length as usize);

        Ok(Some(XferSegment {
            flags,
            transfer_id,
            data,
        }))
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let extra = if self.flags.contains(XferSegmentFlags::START) {
            4
        } else {
            0
        };
        dst.reserve(17 + extra + self.data.len());
        dst.put_u8(self.flags.bits());
        dst.put_u64(self.transfer_id);
        if self.flags.contains(XferSegmentFlags::START) {
            dst.put_u32(0); // no transfer extensions
        }
        dst.put_u64(self.data.len() as u64);
        dst.put_slice(&self.data);
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::{XferSegment, XferSegmentFlags};

    #[test]
    fn roundtrip_start_end_segment() {
        let seg = XferSegment::new(
            XferSegmentFlags::START | XferSegmentFlags::END,
            7,
            b"payload".to_vec(),
        );
        let mut buf = BytesMut::new();
        seg.encode(&mut buf);
        let back = XferSegment::decode(&mut buf).unwrap().unwrap();
        assert_eq!(seg, back);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_segment_yields_none() {
        let seg = XferSegment::new(XferSegmentFlags::END, 3, vec![0xAA; 32]);
        let mut buf = BytesMut::new();
        seg.encode(&mut buf);
        for cut in [0, 5, 16, buf.len() - 1] {
            let mut partial = BytesMut::from(&buf[..cut]);
            assert!(XferSegment::decode(&mut partial).unwrap().is_none());
        }
    }
}
