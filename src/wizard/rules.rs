//! Declarative validation rules for the registration steps.
//!
//! Each step owns a table of `Rule`s addressed by JSON pointer into the
//! serialized form. A single engine evaluates any table, so the step rules
//! are plain data.

use super::form::GuardFormData;
use crate::api::GuardType;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Guard type names that require licence details.
pub const LICENSE_REQUIRED_TYPES: [&str; 5] = [
    "Armed Security Guard",
    "Personal Security Officer",
    "Bouncer",
    "Gun Man",
    "Gunman",
];

/// At least one of these must be among the selected documents.
pub const MANDATORY_DOCUMENTS: [&str; 2] = ["aadhaar", "pan"];

/// Registration steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Step {
    Personal = 1,
    Contact = 2,
    Address = 3,
    Employment = 4,
    Documents = 5,
}

impl Step {
    pub const ALL: [Step; 5] = [
        Step::Personal,
        Step::Contact,
        Step::Address,
        Step::Employment,
        Step::Documents,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<Step> {
        Step::ALL.get(usize::from(n).checked_sub(1)?).copied()
    }

    /// Next step, saturating at `Documents`.
    pub fn next(self) -> Step {
        Step::from_number(self.number() + 1).unwrap_or(Step::Documents)
    }

    /// Previous step, saturating at `Personal`.
    pub fn prev(self) -> Step {
        Step::from_number(self.number().saturating_sub(1)).unwrap_or(Step::Personal)
    }

    /// Field whose presence shows the step was worked on.
    pub fn characteristic_field(self) -> &'static str {
        match self {
            Step::Personal => "/personalDetails/firstName",
            Step::Contact => "/contactDetails/mobileNumber",
            Step::Address => "/address/permanentAddress/line1",
            Step::Employment => "/employmentDetails/companyId",
            Step::Documents => "/documentVerification/selectedDocuments",
        }
    }
}

impl From<Step> for u8 {
    fn from(step: Step) -> u8 {
        step.number()
    }
}

impl TryFrom<u8> for Step {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Step::from_number(n).ok_or_else(|| format!("invalid step {}", n))
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Personal => "Personal Details",
            Step::Contact => "Contact Details",
            Step::Address => "Address",
            Step::Employment => "Employment Details",
            Step::Documents => "Document Verification",
        };
        f.write_str(name)
    }
}

/// What a rule asserts about its field.
#[derive(Debug, Clone, Copy)]
pub enum Check {
    Required,
    /// Applies only when the field is non-empty.
    Pattern(&'static str),
}

/// When a rule is in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Always,
    Married,
    SeparateLocalAddress,
    LicenseRequired,
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    /// JSON pointer into the camelCase form.
    pub field: &'static str,
    pub check: Check,
    pub message: &'static str,
    pub when: Condition,
}

const fn required(field: &'static str, message: &'static str) -> Rule {
    Rule {
        field,
        check: Check::Required,
        message,
        when: Condition::Always,
    }
}

const fn pattern(field: &'static str, regex: &'static str, message: &'static str) -> Rule {
    Rule {
        field,
        check: Check::Pattern(regex),
        message,
        when: Condition::Always,
    }
}

const fn when(rule: Rule, when: Condition) -> Rule {
    Rule { when, ..rule }
}

const DATE: &str = r"^\d{4}-\d{2}-\d{2}$";
const PHONE: &str = r"^\d{10}$";
const PINCODE: &str = r"^\d{6}$";
const EMAIL: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

const PERSONAL_RULES: &[Rule] = &[
    required("/personalDetails/firstName", "First name is required"),
    required("/personalDetails/lastName", "Last name is required"),
    required("/personalDetails/sex", "Sex is required"),
    required("/personalDetails/dateOfBirth", "Date of birth is required"),
    pattern("/personalDetails/dateOfBirth", DATE, "Date of birth must be YYYY-MM-DD"),
    required("/personalDetails/bloodGroup", "Blood group is required"),
    required("/personalDetails/nationality", "Nationality is required"),
    required("/personalDetails/height", "Height is required"),
    required("/personalDetails/weight", "Weight is required"),
    required("/personalDetails/identificationMark", "Identification mark is required"),
    required("/personalDetails/fatherName", "Father's name is required"),
    required("/personalDetails/motherName", "Mother's name is required"),
    required("/personalDetails/maritalStatus", "Marital status is required"),
    when(
        required("/personalDetails/spouseName", "Spouse name is required"),
        Condition::Married,
    ),
    when(
        required("/personalDetails/spouseDob", "Spouse date of birth is required"),
        Condition::Married,
    ),
    pattern("/personalDetails/spouseDob", DATE, "Spouse date of birth must be YYYY-MM-DD"),
];

const CONTACT_RULES: &[Rule] = &[
    required("/contactDetails/mobileNumber", "Mobile number is required"),
    pattern("/contactDetails/mobileNumber", PHONE, "Mobile number must be 10 digits"),
    pattern("/contactDetails/alternateNumber", PHONE, "Alternate number must be 10 digits"),
    pattern("/contactDetails/email", EMAIL, "Enter a valid email address"),
    required("/contactDetails/emergencyContact/name", "Emergency contact name is required"),
    required(
        "/contactDetails/emergencyContact/relationship",
        "Emergency contact relationship is required",
    ),
    required(
        "/contactDetails/emergencyContact/contactNumber",
        "Emergency contact number is required",
    ),
    pattern(
        "/contactDetails/emergencyContact/contactNumber",
        PHONE,
        "Emergency contact number must be 10 digits",
    ),
];

const ADDRESS_RULES: &[Rule] = &[
    required("/address/permanentAddress/line1", "Address line 1 is required"),
    required("/address/permanentAddress/city", "City is required"),
    required("/address/permanentAddress/district", "District is required"),
    required("/address/permanentAddress/state", "State is required"),
    required("/address/permanentAddress/pincode", "Pincode is required"),
    pattern("/address/permanentAddress/pincode", PINCODE, "Pincode must be 6 digits"),
    when(
        required("/address/localAddress/line1", "Address line 1 is required"),
        Condition::SeparateLocalAddress,
    ),
    when(
        required("/address/localAddress/city", "City is required"),
        Condition::SeparateLocalAddress,
    ),
    when(
        required("/address/localAddress/district", "District is required"),
        Condition::SeparateLocalAddress,
    ),
    when(
        required("/address/localAddress/state", "State is required"),
        Condition::SeparateLocalAddress,
    ),
    when(
        required("/address/localAddress/pincode", "Pincode is required"),
        Condition::SeparateLocalAddress,
    ),
    when(
        pattern("/address/localAddress/pincode", PINCODE, "Pincode must be 6 digits"),
        Condition::SeparateLocalAddress,
    ),
];

const EMPLOYMENT_RULES: &[Rule] = &[
    required("/employmentDetails/companyId", "Company ID is required"),
    required("/employmentDetails/dateOfJoining", "Date of joining is required"),
    pattern("/employmentDetails/dateOfJoining", DATE, "Date of joining must be YYYY-MM-DD"),
    required("/employmentDetails/guardTypeId", "Guard type is required"),
    required("/employmentDetails/psaraStatus", "PSARA status is required"),
    when(
        required("/employmentDetails/licenseNumber", "License number is required"),
        Condition::LicenseRequired,
    ),
    when(
        required("/employmentDetails/licenseIssueDate", "License date of issue is required"),
        Condition::LicenseRequired,
    ),
    when(
        required("/employmentDetails/licenseValidUntil", "License validity date is required"),
        Condition::LicenseRequired,
    ),
    when(
        required("/employmentDetails/licenseValidIn", "License valid-in region is required"),
        Condition::LicenseRequired,
    ),
];

/// Field rules of `step`. Documents has only blocking checks.
pub fn step_rules(step: Step) -> &'static [Rule] {
    match step {
        Step::Personal => PERSONAL_RULES,
        Step::Contact => CONTACT_RULES,
        Step::Address => ADDRESS_RULES,
        Step::Employment => EMPLOYMENT_RULES,
        Step::Documents => &[],
    }
}

/// Facts about the form that rule conditions depend on.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleContext {
    pub married: bool,
    pub separate_local_address: bool,
    pub license_required: bool,
}

impl RuleContext {
    pub fn for_form(form: &GuardFormData, guard_types: &[GuardType]) -> Self {
        Self {
            married: form.is_married(),
            separate_local_address: !form.address.same_as_permanent,
            license_required: license_required(&form.employment_details.guard_type_id, guard_types),
        }
    }

    fn holds(&self, condition: Condition) -> bool {
        match condition {
            Condition::Always => true,
            Condition::Married => self.married,
            Condition::SeparateLocalAddress => self.separate_local_address,
            Condition::LicenseRequired => self.license_required,
        }
    }
}

/// Whether the guard type with `guard_type_id` needs licence details.
pub fn license_required(guard_type_id: &str, guard_types: &[GuardType]) -> bool {
    guard_types
        .iter()
        .find(|t| t.id == guard_type_id)
        .is_some_and(|t| requires_license(&t.name))
}

pub fn requires_license(type_name: &str) -> bool {
    let name = type_name.trim();
    LICENSE_REQUIRED_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(name))
}

/// Field errors keyed by dotted path (`personalDetails.firstName`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Preconditions reported as interrupting alerts instead of field errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockingAlert {
    MissingPhoto,
    NoDocumentSelected,
    MissingMandatoryDocument,
}

impl fmt::Display for BlockingAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockingAlert::MissingPhoto => f.write_str("Please upload a profile photo"),
            BlockingAlert::NoDocumentSelected => f.write_str("Please select at least one document"),
            BlockingAlert::MissingMandatoryDocument => write!(
                f,
                "Please select at least one of the mandatory documents: {}",
                MANDATORY_DOCUMENTS.join(", ")
            ),
        }
    }
}

/// Why a step cannot be left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum StepRejection {
    Invalid(FieldErrors),
    Blocked(BlockingAlert),
}

/// Evaluate `rules` against `form`. The first failing rule per field wins.
pub fn evaluate(rules: &[Rule], form: &Value, ctx: &RuleContext) -> FieldErrors {
    let mut errors = BTreeMap::new();
    for rule in rules.iter().filter(|r| ctx.holds(r.when)) {
        let path = dotted(rule.field);
        if errors.contains_key(&path) {
            continue;
        }
        let value = form.pointer(rule.field);
        let ok = match rule.check {
            Check::Required => !is_blank(value),
            Check::Pattern(p) => match value.and_then(Value::as_str).map(str::trim) {
                Some(s) if !s.is_empty() => compiled(p).is_match(s),
                _ => true,
            },
        };
        if !ok {
            errors.insert(path, rule.message.to_string());
        }
    }
    FieldErrors(errors)
}

/// Run the field rules and then the blocking checks of `step`.
pub fn check_step(step: Step, form: &GuardFormData, guard_types: &[GuardType]) -> Result<(), StepRejection> {
    let value = serde_json::to_value(form).unwrap_or(Value::Null);
    let ctx = RuleContext::for_form(form, guard_types);
    let errors = evaluate(step_rules(step), &value, &ctx);
    if !errors.is_empty() {
        return Err(StepRejection::Invalid(errors));
    }

    match step {
        Step::Personal if form.personal_details.profile_photo.is_none() => {
            Err(StepRejection::Blocked(BlockingAlert::MissingPhoto))
        }
        Step::Documents => check_documents(&form.document_verification.selected_documents)
            .map_err(StepRejection::Blocked),
        _ => Ok(()),
    }
}

fn check_documents(selected: &[String]) -> Result<(), BlockingAlert> {
    if selected.is_empty() {
        return Err(BlockingAlert::NoDocumentSelected);
    }
    let has_mandatory = selected
        .iter()
        .any(|d| MANDATORY_DOCUMENTS.iter().any(|m| m.eq_ignore_ascii_case(d.trim())));
    if !has_mandatory {
        return Err(BlockingAlert::MissingMandatoryDocument);
    }
    Ok(())
}

/// Empty strings, empty arrays, `null` and missing fields count as blank.
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(Value::Bool(_)) | Some(Value::Number(_)) => false,
    }
}

fn dotted(pointer: &str) -> String {
    pointer.trim_start_matches('/').replace('/', ".")
}

fn compiled(pattern: &'static str) -> &'static Regex {
    static PATTERNS: OnceLock<[(&str, Regex); 4]> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [DATE, PHONE, PINCODE, EMAIL].map(|p| (p, Regex::new(p).expect("valid pattern")))
    });
    patterns
        .iter()
        .find(|(p, _)| *p == pattern)
        .map(|(_, re)| re)
        .unwrap_or(&patterns[0].1)
}
