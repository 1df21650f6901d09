//! Utilities for testing tunnel endpoints without raw socket privileges. They are part of the
//!  crate's regular (non-#[cfg(test)]) code so that integration tests and applications embedding
//!  the tunnel can use them as well.

pub mod icmp;
