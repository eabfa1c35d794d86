// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Eviction policy for the local cache tier.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Eviction Module                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  priority.rs   - Core scoring algorithm                      │
//! │  └─ SensitivityTag: low / medium / high base rank            │
//! │  └─ PriorityPolicy: base + access + recency → score          │
//! │  └─ EntryMeta: entry metadata snapshot for scoring           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Scoring is pure: the cache snapshots [`EntryMeta`] for every entry under
//! its table lock, asks [`PriorityPolicy::select_victims`] for the lowest
//! scorers, and removes them before inserting.

pub mod priority;

pub use priority::{EntryMeta, PriorityPolicy, SensitivityTag};
