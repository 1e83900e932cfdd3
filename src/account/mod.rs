//-
// Copyright (c) 2026, the Popsync authors
//
// This file is part of Popsync.
//
// Popsync is free software: you can redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Popsync is distributed in the hope  that it will be useful,  but WITHOUT
// ANY WARRANTY;  without even  the implied  warranty of  MERCHANTABILITY or
// FITNESS FOR  A PARTICULAR PURPOSE.  See the  GNU General  Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Popsync. If not, see <http://www.gnu.org/licenses/>.

//! Account lifecycle: configuration, connection establishment,
//! credential prompting, and the public enqueue-based API.

pub mod account;
pub mod config;
pub mod prompt;

pub use account::{
    Account, Connectable, Connector, Credentials, ObserverHandle,
    SyncableFolder,
};
pub use config::{AccountConfig, Security};
pub use prompt::{request_password, PromptRequest};
