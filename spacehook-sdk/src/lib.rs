//! Wire objects and an HTTP client for the code-hosting service that
//! spacehook keeps webhook subscriptions synchronized with.
//!
//! The [`objects`] module is always available. The typed HTTP client lives
//! behind the `client` cargo feature so crates that only need the shared
//! types do not pull in `reqwest`.

pub mod objects;

#[cfg(feature = "client")]
pub mod client;
