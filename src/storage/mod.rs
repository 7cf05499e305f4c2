// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage adapters: traits the engine consumes plus in-memory implementations.

pub mod memory;
pub mod traits;

pub use memory::{InMemoryLocalStore, InMemoryRemoteStore};
pub use traits::{LocalStore, RecordPredicate, RemoteError, RemoteStore, StorageError};
