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

use actix::prelude::*;

/// Dial a peer at `tcpcl://host:port`.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ConnectRemote {
    pub address: String,
}

/// Kill a session without the orderly SESS_TERM exchange.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ForceShutdown {}
