//! Unit tests for the chat relay
//!
//! This module contains tests for the components of the relay core.

pub mod config_tests;
pub mod decoder_tests;
pub mod resilience_tests;
pub mod sse_tests;
