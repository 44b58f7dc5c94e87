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

use crate::messages::Errors as MessageErrors;
use crate::stages::StageError;

/// Anything that can end a session from the transport side.
#[derive(Debug)]
pub enum ErrorType {
    IoError(std::io::Error),
    MessageError(MessageErrors),
    StageError(StageError),
    ConnectionClosed,
}

impl From<std::io::Error> for ErrorType {
    fn from(e: std::io::Error) -> Self {
        ErrorType::IoError(e)
    }
}

impl From<MessageErrors> for ErrorType {
    fn from(e: MessageErrors) -> Self {
        ErrorType::MessageError(e)
    }
}

impl From<StageError> for ErrorType {
    fn from(e: StageError) -> Self {
        ErrorType::StageError(e)
    }
}

/// Why an individual transfer could not be sent.
#[derive(Debug)]
pub enum TransferSendErrors {
    BundleTooLarge { max_size: u64 },
    SessionNotEstablished,
    SessionTerminated,
    PeerRefused { transfer_id: u64 },
}
