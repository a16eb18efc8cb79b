//! CLI command implementations.

pub mod blocks;
pub mod dump_log;
pub mod inspect;
pub mod serve;
pub mod verify;
