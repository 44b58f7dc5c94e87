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

// leading colons keep the crc crate apart from this very module
use ::crc::Crc;
use serde::{
    Deserialize, Serialize,
    de::{Error, Unexpected, Visitor},
};
use serde_bytes::ByteBuf;

/// CRC-16/X.25, the CCITT variant RFC 9171 prescribes for CRC type 1.
const X25: Crc<u16> = Crc::<u16>::new(&::crc::CRC_16_IBM_SDLC);
/// CRC-32C (Castagnoli) for CRC type 2.
const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&::crc::CRC_32_ISCSI);

/// CRC type and, when present, the checksum bytes in network byte order.
///
/// The type code and the checksum live in different positions of a block's
/// CBOR array, so the variants carry their bytes and the value is filled in
/// by [`CRCType::deserialize_value`] once the rest of the block was read.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u64)]
pub enum CRCType {
    NoCRC,
    CRC16([u8; 2]),
    CRC32([u8; 4]),
}

impl Serialize for CRCType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(match self {
            CRCType::NoCRC => 0,
            CRCType::CRC16(_) => 1,
            CRCType::CRC32(_) => 2,
        })
    }
}

impl<'de> Deserialize<'de> for CRCType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct CRCVisitor;
        impl Visitor<'_> for CRCVisitor {
            type Value = CRCType;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("crc type")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match v {
                    0 => Ok(CRCType::NoCRC),
                    1 => Ok(CRCType::CRC16([0; 2])),
                    2 => Ok(CRCType::CRC32([0; 4])),
                    _ => Err(serde::de::Error::invalid_value(
                        Unexpected::Unsigned(v),
                        &"crc type must be between 0 and 2",
                    )),
                }
            }
        }
        deserializer.deserialize_u64(CRCVisitor)
    }
}

impl CRCType {
    /// Reads the trailing checksum byte string of a block into the variant
    /// decoded from the block's crc-type field.
    pub fn deserialize_value<'de, A>(&self, seq: &mut A) -> Result<CRCType, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        match self {
            CRCType::NoCRC => {
                panic!("Attempting to deserialize a checksum when we dont have a CRC")
            }
            CRCType::CRC16(_) => {
                let val: ByteBuf = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for crc content"))?;
                let len = val.len();
                let arr: [u8; 2] = val
                    .into_vec()
                    .try_into()
                    .map_err(|_| Error::invalid_length(len, &"Expected 2 bytes for crc16"))?;
                Ok(CRCType::CRC16(arr))
            }
            CRCType::CRC32(_) => {
                let val: ByteBuf = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for crc content"))?;
                let len = val.len();
                let arr: [u8; 4] = val
                    .into_vec()
                    .try_into()
                    .map_err(|_| Error::invalid_length(len, &"Expected 4 bytes for crc32"))?;
                Ok(CRCType::CRC32(arr))
            }
        }
    }

    /// Same type with the checksum bytes set to zero. Serializing a block
    /// with a zeroed crc yields the exact byte layout the digest runs over.
    pub fn zeroed(&self) -> CRCType {
        match self {
            CRCType::NoCRC => CRCType::NoCRC,
            CRCType::CRC16(_) => CRCType::CRC16([0; 2]),
            CRCType::CRC32(_) => CRCType::CRC32([0; 4]),
        }
    }

    /// Computes the checksum of `data` (a block serialized with a zeroed
    /// crc field) and returns the variant carrying it in network byte order.
    pub fn compute(&self, data: &[u8]) -> CRCType {
        match self {
            CRCType::NoCRC => CRCType::NoCRC,
            CRCType::CRC16(_) => CRCType::CRC16(X25.checksum(data).to_be_bytes()),
            CRCType::CRC32(_) => CRCType::CRC32(CASTAGNOLI.checksum(data).to_be_bytes()),
        }
    }

    pub fn has_crc(&self) -> bool {
        !matches!(self, CRCType::NoCRC)
    }
}

#[cfg(test)]
mod tests {
    use crate::crc::CRCType;

    #[test]
    fn serialize_type_codes() -> Result<(), serde_cbor::Error> {
        assert_eq!(serde_cbor::to_vec(&CRCType::NoCRC)?, [0]);
        assert_eq!(serde_cbor::to_vec(&CRCType::CRC16([0x55, 0xAA]))?, [1]);
        assert_eq!(
            serde_cbor::to_vec(&CRCType::CRC32([0x55, 0xAA, 0x55, 0xAA]))?,
            [2]
        );
        Ok(())
    }

    #[test]
    fn deserialize_type_codes() -> Result<(), serde_cbor::Error> {
        let val: CRCType = serde_cbor::from_slice(&[0])?;
        assert_eq!(val, CRCType::NoCRC);
        let val: CRCType = serde_cbor::from_slice(&[1])?;
        assert_eq!(val, CRCType::CRC16([0; 2]));
        let val: CRCType = serde_cbor::from_slice(&[2])?;
        assert_eq!(val, CRCType::CRC32([0; 4]));
        Ok(())
    }

    #[test]
    fn x25_check_value() {
        // CRC-16/X.25 of "123456789" is 0x906E
        let crc = CRCType::CRC16([0; 2]).compute(b"123456789");
        assert_eq!(crc, CRCType::CRC16([0x90, 0x6E]));
    }

    #[test]
    fn castagnoli_check_value() {
        // CRC-32C of "123456789" is 0xE3069283
        let crc = CRCType::CRC32([0; 4]).compute(b"123456789");
        assert_eq!(crc, CRCType::CRC32([0xE3, 0x06, 0x92, 0x83]));
    }
}
