//! Unit tests for the relay SDK
//!
//! This module contains tests for the pipelines and their shared pieces.

pub mod http_store_tests;
pub mod stream_client_tests;
pub mod support;
