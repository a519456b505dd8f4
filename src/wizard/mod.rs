//! Five-step guard registration wizard.
//!
//! The form is validated step by step against declarative rule tables,
//! persisted as a resumable draft and finally submitted as one multipart
//! request.

mod draft;
mod form;
mod rules;
mod state;

pub use draft::*;
pub use form::*;
pub use rules::{
    check_step, evaluate, license_required, requires_license, step_rules, BlockingAlert, Check,
    Condition, FieldErrors, Rule, RuleContext, Step, StepRejection, LICENSE_REQUIRED_TYPES,
    MANDATORY_DOCUMENTS,
};
pub use state::*;
