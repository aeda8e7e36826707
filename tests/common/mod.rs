//! Shared helpers for snmp-query integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]
#![allow(unused_imports)]

mod agent;
mod fixtures;
mod stream;

pub use agent::{ENGINE_BOOTS, ENGINE_ID, FakeAgent, FakeAgentBuilder};
pub use fixtures::*;
pub use stream::collect_stream;
