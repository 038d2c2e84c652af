//! # scpdrop – core
//!
//! Shared building blocks used by the transfer crate and the CLI:
//!   • Diagnostic step / report types
//!   • Host resolution and TCP / banner probes

pub mod diagnostics;

pub use diagnostics::{DiagnosticReport, DiagnosticStep, StepStatus};
