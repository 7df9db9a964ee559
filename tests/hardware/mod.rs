//! Hardware-specific tests requiring real serial devices.
//!
//! These tests are ignored by default and require actual hardware to run.
//! They should be run manually with the `--ignored` flag and the
//! `SERIAL_LINK_TEST_*` environment variables set.

pub mod port_discovery_tests;
pub mod real_port_tests;
pub mod utils;
