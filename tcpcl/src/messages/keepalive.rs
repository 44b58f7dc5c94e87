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

use bytes::BytesMut;

use super::Errors;

/// A KEEPALIVE carries nothing beyond its message type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Keepalive {}

impl Keepalive {
    pub fn new() -> Self {
        Keepalive {}
    }

    #[allow(clippy::unnecessary_wraps)]
    pub fn decode(_src: &mut BytesMut) -> Result<Option<Self>, Errors> {
        Ok(Some(Keepalive {}))
    }

    pub fn encode(&self, _dst: &mut BytesMut) {}
}
