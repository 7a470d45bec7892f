// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Monotonic time source for write versions.
//!
//! Every version in the system comes from a per-engine [`MonotonicClock`]:
//! write timestamps, operation identities, and transaction ids. The clock is
//! strictly increasing and unique under concurrent access, so writes have a
//! deterministic total order even when wall time stalls or steps backwards.

mod clock;

pub use clock::MonotonicClock;
