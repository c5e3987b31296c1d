// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Test harness for abuse simulation against the admission gate.
//!
//! Simulations run on a manual clock, so a pattern's request rate is
//! simulated time rather than wall time and results are deterministic.

pub mod attacks;
pub mod generators;
pub mod metrics;
