// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Politeness: origin policy documents and per-origin request spacing.

pub mod gate;
pub mod limiter;
pub mod robots;

pub use gate::{Authorization, PolicyGate, PolicyRecord};
pub use limiter::RateLimiter;
pub use robots::{parse_robots, RobotsRules};
