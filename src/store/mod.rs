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

//! Local persistent state: the summary, the seen log, and the blob cache.
//!
//! Three stores with sharply different durability stories live here. The
//! summary is an explicitly checkpointed snapshot; the seen log is
//! append-eager so a crash never forgets a UID it promised to remember;
//! the blob cache is journal-free, relying on a leading sentinel byte to
//! distinguish committed entries from torn ones.

pub mod blob_cache;
pub mod codec;
pub mod model;
pub mod seen_log;
pub mod summary;
