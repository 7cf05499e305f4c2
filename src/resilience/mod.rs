// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Degradation control, backoff and the offline queue.

pub mod circuit_breaker;
pub mod journal;
pub mod offline_queue;
pub mod retry;
