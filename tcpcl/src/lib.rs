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

//! A TCP convergence-layer session library in the shape of RFC 9174.
//!
//! The protocol work happens in [`stages`]: a session walks an ordered list
//! of stages (contact handshake, session initialization, established) that
//! share one mutable [`stages::SessionState`]. [`session::TCPCLSession`]
//! owns the socket and pumps bytes between the framed codec and the stage
//! handler; bundle transfers surface on plain tokio channels.

pub mod connection_info;
pub mod errors;
pub mod messages;
pub mod session;
pub mod stages;
pub mod ticker;
pub mod transfer;
