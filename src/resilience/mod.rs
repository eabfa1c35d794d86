// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Failure handling shared by the pool, the cache and the orchestrator.
//!
//! - [`retry`]: bounded retry with linear or exponential backoff
//! - [`circuit_breaker`]: fail-fast wrapper around the secondary cache tier

pub mod circuit_breaker;
pub mod retry;
