//! Domain layer for the feedback platform.
//!
//! Hosts the types and pure decision logic shared between the HTTP
//! application and the background follow-up worker: submission validation,
//! the follow-up eligibility rule, price overview arithmetic, and the
//! textual ledger row format.

pub mod followup;
pub mod ledger;
pub mod pricing;
pub mod submission;
pub mod types;
