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

pub const KEEPALIVE_DEFAULT_INTERVAL: u16 = 60;
pub const MAX_SEGMENT_MRU: u64 = 100 * 1024;
pub const MAX_TRANSFER_MRU: u64 = 1024 * 1024;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    struct SessionExtensionFlags: u8 {
        const CRITICAL = 0x01;
    }
}

#[derive(Debug, Clone)]
pub struct SessionExtension {
    flags: SessionExtensionFlags,
    pub extension_type: u16,
    pub value: Vec<u8>,
}

impl SessionExtension {
    fn decode(src: &mut BytesMut) -> Self {
        let flags = src.get_u8();
        let extension_type = src.get_u16();
        let value_length = src.get_u16();
        let value = src[0..value_length as usize].to_vec();
        src.advance(value_length as usize);

        SessionExtension {
            flags: SessionExtensionFlags::from_bits_truncate(flags),
            extension_type,
            value,
        }
    }

    fn write(&self, target: &mut BytesMut) {
        target.reserve(5 + self.value.len());
        target.put_u8(self.flags.bits());
        target.put_u16(self.extension_type);
        target.put_u16(self.value.len() as u16);
        target.put_slice(&self.value);
    }

    fn encoded_len(&self) -> usize {
        5 + self.value.len()
    }
}

/// Session parameters. Both peers send one after the contact exchange.
#[derive(Debug, Clone)]
pub struct SessInit {
    pub keepalive_interval: u16,
    pub segment_mru: u64,
    pub transfer_mru: u64,
    pub node_id: String,
    pub session_extensions: Vec<SessionExtension>,
}

impl SessInit {
    pub fn new(node_id: String) -> Self {
        SessInit {
            keepalive_interval: KEEPALIVE_DEFAULT_INTERVAL,
            segment_mru: MAX_SEGMENT_MRU,
            transfer_mru: MAX_TRANSFER_MRU,
            node_id,
            session_extensions: Vec::new(),
        }
    }

    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, Errors> {
        // fixed part: keepalive + 2 MRUs + node id length + extension length
        const FIXED: usize = 2 + 8 + 8 + 2 + 4;
        if src.remaining() < FIXED {
            return Ok(None);
        }

        // The cursor must not move until the whole frame is buffered, so
        // the variable lengths are peeked by index first.
        let node_id_length = u16::from_be_bytes(src[18..20].try_into().unwrap()) as usize;
        if src.remaining() < FIXED + node_id_length {
            return Ok(None);
        }
        let extensions_length = u32::from_be_bytes(
            src[20 + node_id_length..24 + node_id_length]
                .try_into()
                .unwrap(),
        ) as usize;
        if src.remaining() < FIXED + node_id_length + extensions_length {
            return Ok(None);
        }

        let keepalive_interval = src.get_u16();
        let segment_mru = src.get_u64();
        let transfer_mru = src.get_u64();

        src.advance(2); // node id length, peeked above
        let node_id = String::from_utf8(src[0..node_id_length].to_vec())
            .map_err(|_| Errors::NodeIdInvalid)?;
        src.advance(node_id_length);

        src.advance(4); // extension length, peeked above
        let mut session_extensions = Vec::new();
        let mut remaining = extensions_length;
        while remaining > 0 {
            let se = SessionExtension::decode(src);
            remaining = remaining.saturating_sub(se.encoded_len());
            if se.flags.contains(SessionExtensionFlags::CRITICAL) {
                return Err(Errors::UnknownCriticalSessionExtension(se.extension_type));
            }
            session_extensions.push(se);
        }

        Ok(Some(SessInit {
            keepalive_interval,
            segment_mru,
            transfer_mru,
            node_id,
            session_extensions,
        }))
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(24 + self.node_id.len());
        dst.put_u16(self.keepalive_interval);
        dst.put_u64(self.segment_mru);
        dst.put_u64(self.transfer_mru);
        dst.put_u16(self.node_id.len() as u16);
        dst.put_slice(self.node_id.as_bytes());

        let mut extension_bytes = BytesMut::new();
        for extension in &self.session_extensions {
            extension.write(&mut extension_bytes);
        }
        dst.put_u32(extension_bytes.len() as u32);
        dst.put_slice(&extension_bytes);
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::SessInit;

    #[test]
    fn roundtrip() {
        let si = SessInit::new(String::from("dtn://node1"));
        let mut buf = BytesMut::new();
        si.encode(&mut buf);
        let back = SessInit::decode(&mut buf).unwrap().unwrap();
        assert_eq!(back.node_id, si.node_id);
        assert_eq!(back.keepalive_interval, si.keepalive_interval);
        assert_eq!(back.segment_mru, si.segment_mru);
        assert_eq!(back.transfer_mru, si.transfer_mru);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_input_yields_none() {
        let si = SessInit::new(String::from("dtn://node1"));
        let mut buf = BytesMut::new();
        si.encode(&mut buf);
        let full = buf.len();
        for cut in [0, 1, 19, full - 1] {
            let mut partial = BytesMut::from(&buf[..cut]);
            assert!(SessInit::decode(&mut partial).unwrap().is_none());
        }
    }
}
