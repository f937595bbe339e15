//! Tests for the SoftLayer CPI that run against in-memory ports or the built
//! binary; nothing here reaches a real cloud or host.

mod architecture;
mod binary;
mod lifecycle_flow;
mod mocks;
mod property_tests;
