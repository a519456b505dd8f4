//! Step navigation, address mirroring, drafts and submission.

use super::draft::{DraftEnvelope, DraftError, DraftStore};
use super::form::{Address, GuardFormData};
use super::rules::{self, BlockingAlert, FieldErrors, Step, StepRejection};
use crate::api::{ApiError, Guard, GuardType};
use crate::service::GuardService;

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Result of trying to leave the current step forwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "camelCase")]
pub enum StepOutcome {
    Advanced(Step),
    Invalid(FieldErrors),
    Blocked(BlockingAlert),
}

impl From<StepRejection> for StepOutcome {
    fn from(rejection: StepRejection) -> Self {
        match rejection {
            StepRejection::Invalid(errors) => StepOutcome::Invalid(errors),
            StepRejection::Blocked(alert) => StepOutcome::Blocked(alert),
        }
    }
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("step {step} is incomplete")]
    Incomplete { step: Step, rejection: StepRejection },
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// One registration in progress.
pub struct RegistrationWizard {
    form: GuardFormData,
    current: Step,
    highest_reached: Step,
    guard_types: Vec<GuardType>,
    drafts: Arc<DraftStore>,
    last_errors: FieldErrors,
    submit_error: Option<String>,
}

impl RegistrationWizard {
    pub fn new(drafts: Arc<DraftStore>, guard_types: Vec<GuardType>) -> Self {
        Self {
            form: GuardFormData::default(),
            current: Step::Personal,
            highest_reached: Step::Personal,
            guard_types,
            drafts,
            last_errors: FieldErrors::default(),
            submit_error: None,
        }
    }

    pub fn form(&self) -> &GuardFormData {
        &self.form
    }

    pub fn current_step(&self) -> Step {
        self.current
    }

    pub fn highest_reached(&self) -> Step {
        self.highest_reached
    }

    /// Field errors of the last rejected `advance`.
    pub fn errors(&self) -> &FieldErrors {
        &self.last_errors
    }

    /// Whether the selected guard type needs licence details.
    pub fn license_required(&self) -> bool {
        rules::license_required(&self.form.employment_details.guard_type_id, &self.guard_types)
    }

    // --- Editing ---

    /// Apply an arbitrary edit. The local address is re-mirrored afterwards
    /// if mirroring is on.
    pub fn edit(&mut self, f: impl FnOnce(&mut GuardFormData)) {
        f(&mut self.form);
        if self.form.address.same_as_permanent {
            self.form.mirror_permanent_address();
        }
    }

    pub fn update_permanent_address(&mut self, f: impl FnOnce(&mut Address)) {
        self.edit(|form| f(&mut form.address.permanent_address));
    }

    /// Returns false, changing nothing, while the local address mirrors the
    /// permanent one.
    pub fn update_local_address(&mut self, f: impl FnOnce(&mut Address)) -> bool {
        if self.form.address.same_as_permanent {
            return false;
        }
        f(&mut self.form.address.local_address);
        true
    }

    pub fn set_same_as_permanent(&mut self, same: bool) {
        self.form.address.same_as_permanent = same;
        if same {
            self.form.mirror_permanent_address();
        }
    }

    // --- Navigation ---

    pub fn advance(&mut self) -> StepOutcome {
        if let Err(rejection) = rules::check_step(self.current, &self.form, &self.guard_types) {
            if let StepRejection::Invalid(errors) = &rejection {
                self.last_errors = errors.clone();
            }
            return rejection.into();
        }

        self.last_errors = FieldErrors::default();
        self.current = self.current.next();
        self.highest_reached = self.highest_reached.max(self.current);
        StepOutcome::Advanced(self.current)
    }

    pub fn back(&mut self) -> Step {
        self.current = self.current.prev();
        self.current
    }

    /// Jump to an already reached step.
    pub fn go_to(&mut self, step: Step) -> bool {
        if step > self.highest_reached {
            return false;
        }
        self.current = step;
        true
    }

    // --- Drafts ---

    pub fn save_draft(&self) -> Result<(), DraftError> {
        self.drafts
            .save_draft(&DraftEnvelope::new(self.form.clone(), self.current))
    }

    /// A saved draft the user may resume, if any.
    pub fn pending_draft(&self) -> Result<Option<DraftEnvelope>, DraftError> {
        self.drafts.load_draft()
    }

    /// Restore a draft and land on the furthest step it has data for.
    pub fn resume_draft(&mut self, envelope: DraftEnvelope) -> Step {
        self.form = envelope.data;
        let value = serde_json::to_value(&self.form).unwrap_or_default();
        let furthest = Step::ALL
            .iter()
            .rev()
            .find(|step| !rules::is_blank(value.pointer(step.characteristic_field())))
            .copied()
            .unwrap_or(Step::Personal);

        info!(
            saved_at = %envelope.saved_at,
            saved_step = %envelope.current_step,
            "Resuming registration draft at {}",
            furthest
        );
        self.current = furthest;
        self.highest_reached = furthest;
        furthest
    }

    pub fn discard_draft(&self) -> Result<(), DraftError> {
        self.drafts.clear_draft()
    }

    // --- Submission ---

    pub fn submit_error(&self) -> Option<&str> {
        self.submit_error.as_deref()
    }

    pub fn dismiss_submit_error(&mut self) {
        self.submit_error = None;
    }

    /// Validate every step and register the guard.
    ///
    /// On an incomplete step the wizard moves to it. On a backend failure it
    /// stays on the last step with the form intact and records a
    /// dismissible error.
    pub async fn submit(&mut self, service: &GuardService) -> Result<Guard, SubmitError> {
        for step in Step::ALL {
            if let Err(rejection) = rules::check_step(step, &self.form, &self.guard_types) {
                if let StepRejection::Invalid(errors) = &rejection {
                    self.last_errors = errors.clone();
                }
                self.current = step;
                return Err(SubmitError::Incomplete { step, rejection });
            }
        }

        match service.create_guard(&self.form).await {
            Ok(guard) => {
                if let Err(e) = self.drafts.clear_draft() {
                    warn!("Could not clear registration draft: {}", e);
                }
                self.form = GuardFormData::default();
                self.current = Step::Personal;
                self.highest_reached = Step::Personal;
                self.last_errors = FieldErrors::default();
                self.submit_error = None;
                Ok(guard)
            }
            Err(e) => {
                warn!("Guard registration failed: {}", e);
                self.submit_error = Some(e.to_string());
                self.current = Step::Documents;
                Err(e.into())
            }
        }
    }
}
