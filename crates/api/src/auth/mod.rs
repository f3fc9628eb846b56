//! Authentication against the hosted identity provider.
//!
//! This service never mints or validates tokens itself; bearer tokens are
//! verified by calling the identity provider, and the result is cached
//! briefly to keep parallel page loads from hammering it.

mod verifier;

pub use verifier::{extract_bearer_token, IdentityVerifier};
