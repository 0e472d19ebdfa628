//! Process plumbing shared by the binary and tests.

pub mod bootstrap;
pub mod retry;
