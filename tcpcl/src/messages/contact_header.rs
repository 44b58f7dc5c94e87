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

const MAGIC: &[u8; 4] = b"dtn!";
const VERSION: u8 = 4;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ContactHeaderFlags: u8 {
        const CAN_TLS = 0x01;
    }
}

/// The 6-byte preamble both peers exchange before any typed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactHeader {
    pub flags: ContactHeaderFlags,
}

impl Default for ContactHeader {
    fn default() -> Self {
        ContactHeader::new()
    }
}

impl ContactHeader {
    pub fn new() -> Self {
        // TLS stays unannounced, this implementation never negotiates it.
        ContactHeader {
            flags: ContactHeaderFlags::empty(),
        }
    }

    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, Errors> {
        if src.remaining() < 6 {
            return Ok(None);
        }
        if &src[0..4] != MAGIC || src[4] != VERSION {
            return Err(Errors::InvalidHeader);
        }
        src.advance(5);
        let flags = ContactHeaderFlags::from_bits_truncate(src.get_u8());
        Ok(Some(ContactHeader { flags }))
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(6);
        dst.put_slice(MAGIC);
        dst.put_u8(VERSION);
        dst.put_u8(self.flags.bits());
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::ContactHeader;
    use crate::messages::Errors;

    #[test]
    fn roundtrip() {
        let ch = ContactHeader::new();
        let mut buf = BytesMut::new();
        ch.encode(&mut buf);
        assert_eq!(&buf[..], b"dtn!\x04\x00");
        let back = ContactHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(ch, back);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut buf = BytesMut::from(&b"dtn?\x04\x00"[..]);
        assert!(matches!(
            ContactHeader::decode(&mut buf),
            Err(Errors::InvalidHeader)
        ));
    }

    #[test]
    fn waits_for_all_six_bytes() {
        let mut buf = BytesMut::from(&b"dtn!"[..]);
        assert!(ContactHeader::decode(&mut buf).unwrap().is_none());
    }
}
