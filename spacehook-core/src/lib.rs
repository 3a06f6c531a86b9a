#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod entities;
pub mod events;
pub mod processors;
pub mod remote;
pub mod scheduler;
pub mod store;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
