// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Symmetric, globally unique link metrics from throughput measurements.
//!
//! The state machine needs every edge weight to satisfy two properties it
//! cannot check itself: both endpoints observe the identical value, and no
//! two edges in the graph share one. Packing the ordered id pair into the
//! low bits buys uniqueness; deriving the high bits from an agreed
//! throughput figure buys symmetry.

use ghs_core::{AgentId, Metric};
use std::time::Duration;

/// Combines a link's agreed throughput and its two endpoint ids into an
/// edge metric both ends compute identically.
///
/// Faster links cost less. A dead link (zero throughput) gets the worst
/// finite cost rather than a reserved value, so it still loses every
/// comparison without poisoning the search. The result is never
/// [`Metric::NOT_SET`] (cost is clamped to at least 1) and never
/// [`Metric::WORST`] (that would need both ids to be the sentinel).
#[must_use]
pub fn sym_metric(a: AgentId, b: AgentId, kbps: u64) -> Metric {
    let bigger = u64::from(a.0.max(b.0));
    let smaller = u64::from(a.0.min(b.0));
    let ceiling = u64::from(u32::MAX);
    let cost = if kbps == 0 {
        ceiling
    } else {
        (ceiling / kbps).max(1)
    };
    Metric((cost << 32) | (bigger << 16) | smaller)
}

/// Throughput in kbit/s given a byte count and the wall time it took.
#[must_use]
pub fn kbps_from(bytes: usize, elapsed: Duration) -> u64 {
    let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX).max(1);
    u64::try_from(bytes).unwrap_or(u64::MAX).saturating_mul(8) / ms
}
