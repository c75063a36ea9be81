//! Predefined interaction patterns.
//!
//! An interaction pattern can be as simple as a rpc call or something more
//! complex. Only the rpc pattern is needed here: one request, one response.
pub mod rpc;
