//! fcbridge-verify: check a flight controller's settings against an
//! expectation file.
//!
//! The verifier only needs a [`CommandSession`](fcbridge_core::CommandSession),
//! so it runs the same against the live command channel and an in-memory
//! fake. Entries are checked one at a time, in file order, each with a
//! single `get <name>`.

pub mod expectation;
pub mod verifier;

pub use expectation::{
    Action, Expectation, Expected, SettingValue, load_expectations, parse_expectations,
};
pub use verifier::{
    INVALID_RESPONSE, Status, VerificationReport, VerificationResult, evaluate, extract_value,
    verify, verify_with,
};
