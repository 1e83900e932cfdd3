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

//! The sync engine: reconciling the remote maildrop against local state
//! and retrieving message bodies.

pub mod classify;
pub mod engine;
pub mod fetch;
pub mod uid;

pub use classify::{AttachmentClassifier, HeuristicClassifier};
pub use engine::{SyncEngine, SyncPolicy, SyncStats};
pub use fetch::{ensure_message, fetch_message, Completeness};
