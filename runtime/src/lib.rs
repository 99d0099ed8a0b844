// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! grasp runtime library: adaptive content acquisition.
//!
//! Requests go through a per-origin policy gate and rate limiter, then the
//! response cache, then the adaptive router, which tries a lightweight fetch
//! first and escalates to a headless browser only when the fetched page
//! cannot stand on its own. [`engine::Engine`] is the entry point.

#![allow(clippy::new_without_default)]

pub mod acquisition;
pub mod batch;
pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod extract;
pub mod maintenance;
pub mod policy;
pub mod renderer;
pub mod rest;
pub mod router;
pub mod types;

pub use engine::Engine;
pub use error::AcquireError;
pub use types::{Acquired, AcquisitionRequest, AcquisitionResult, Interaction, RenderHint};
