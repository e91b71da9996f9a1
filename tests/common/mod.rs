//! Shared test utilities for integration and property tests.
//!
//! This module provides:
//! - Scripted mock transport for recording attempts
//! - Recording batch processor with delivery instants

// Not every test binary exercises every helper.
#![allow(dead_code)]

pub mod mock_transport;

pub use mock_transport::*;
