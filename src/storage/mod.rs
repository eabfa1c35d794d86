// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Secondary cache tiers and backing-store connectors.
//!
//! - [`traits`]: the [`SecondaryTier`] contract and its wire record
//! - [`memory`]: DashMap-backed tier (single host, tests)
//! - [`redis`]: Redis-backed tier
//! - `sql` (feature `sql`): sqlx-backed [`crate::pool::Connector`]

pub mod traits;
pub mod memory;
pub mod redis;
#[cfg(feature = "sql")]
pub mod sql;

pub use traits::{SecondaryRecord, SecondaryTier, TierError};
pub use memory::InMemoryTier;
pub use self::redis::RedisTier;

use regex::Regex;

/// Compile a `*`-wildcard glob into an anchored regex.
pub(crate) fn glob_matcher(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{}$", escaped))
}
