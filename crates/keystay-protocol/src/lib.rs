//! Shared types and the token codec for Keystay.
//!
//! This crate defines what the rest of the workspace talks about:
//!
//! - **Types** ([`TokenPair`], [`Profile`], [`SessionSummary`], [`Session`],
//!   [`Role`]) and the refresh call's request/response bodies.
//! - **Codec** ([`compute_expiry`], [`is_near_expiry`], [`decode_claims`]):
//!   reads the expiry hint out of an access token.
//! - **Errors** ([`TokenError`]).
//!
//! It has no I/O. Storage lives in `keystay-store`, network calls and the
//! session state machine in `keystay-session`.

mod codec;
mod error;
mod types;

pub use codec::{
    Claims, DEFAULT_TOKEN_LIFETIME_SECS, EXPIRY_BUFFER_SECS, compute_expiry,
    compute_expiry_with, decode_claims, is_near_expiry, is_near_expiry_at,
};
pub use error::TokenError;
pub use types::{
    Profile, ProfileUpdate, RefreshRequest, RefreshResponse, Role, Session,
    SessionSummary, TokenPair,
};
