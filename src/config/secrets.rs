//! Secret handling.
//!
//! Re-exports the secrecy types used for the delivery API token, so callers
//! building a `Config` by hand don't need their own `secrecy` dependency.

pub use secrecy::{ExposeSecret, SecretString};
