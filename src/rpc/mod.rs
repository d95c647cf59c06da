//! RPC modules.

mod safe;

pub use safe::*;
