#![warn(clippy::unwrap_used)]

pub mod client;
pub mod local;

pub use client::RedisBanditStore;
pub use local::TtlCache;
