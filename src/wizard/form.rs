//! Registration form data and its flattened submission payload.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuardFormData {
    pub personal_details: PersonalDetails,
    pub contact_details: ContactDetails,
    pub address: AddressDetails,
    pub employment_details: EmploymentDetails,
    pub document_verification: DocumentVerification,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonalDetails {
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub sex: String,
    /// `YYYY-MM-DD`
    pub date_of_birth: String,
    pub blood_group: String,
    pub nationality: String,
    pub height: String,
    pub weight: String,
    pub identification_mark: String,
    pub father_name: String,
    pub mother_name: String,
    pub marital_status: String,
    pub spouse_name: String,
    pub spouse_dob: String,
    pub profile_photo: Option<PhotoAttachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoAttachment {
    pub file_name: String,
    pub content_type: String,
    #[serde(default)]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactDetails {
    pub mobile_number: String,
    pub alternate_number: String,
    pub email: String,
    pub emergency_contact: EmergencyContact,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmergencyContact {
    pub name: String,
    pub relationship: String,
    pub contact_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddressDetails {
    pub permanent_address: Address,
    pub local_address: Address,
    /// While set, `local_address` mirrors `permanent_address`.
    pub same_as_permanent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
    pub line1: String,
    pub line2: String,
    pub city: String,
    pub district: String,
    pub state: String,
    pub pincode: String,
    pub landmark: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmploymentDetails {
    pub company_id: String,
    pub date_of_joining: String,
    pub guard_type_id: String,
    pub psara_status: String,
    pub license_number: String,
    pub license_issue_date: String,
    pub license_valid_until: String,
    pub license_valid_in: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentVerification {
    /// Document keys such as `aadhaar` or `pan`.
    pub selected_documents: Vec<String>,
}

impl GuardFormData {
    /// Copy the permanent address over the local one.
    pub fn mirror_permanent_address(&mut self) {
        self.address.local_address = self.address.permanent_address.clone();
    }

    pub fn is_married(&self) -> bool {
        self.personal_details.marital_status.trim().eq_ignore_ascii_case("married")
    }

    /// Flatten into the shape the create endpoint accepts.
    pub fn to_create_payload(&self) -> GuardCreatePayload {
        let p = &self.personal_details;
        let c = &self.contact_details;
        let e = &self.employment_details;

        let mut contacts = vec![ContactEntry {
            contact_type: "PRIMARY",
            number: c.mobile_number.clone(),
        }];
        if !c.alternate_number.trim().is_empty() {
            contacts.push(ContactEntry {
                contact_type: "ALTERNATE",
                number: c.alternate_number.clone(),
            });
        }

        let mut family_members = vec![
            FamilyMember::named("FATHER", &p.father_name),
            FamilyMember::named("MOTHER", &p.mother_name),
        ];
        if self.is_married() {
            family_members.push(FamilyMember {
                date_of_birth: non_blank(&p.spouse_dob),
                ..FamilyMember::named("SPOUSE", &p.spouse_name)
            });
        }

        let local = if self.address.same_as_permanent {
            &self.address.permanent_address
        } else {
            &self.address.local_address
        };

        let has_license = !e.license_number.trim().is_empty();

        GuardCreatePayload {
            first_name: p.first_name.clone(),
            middle_name: non_blank(&p.middle_name),
            last_name: p.last_name.clone(),
            sex: p.sex.clone(),
            date_of_birth: p.date_of_birth.clone(),
            blood_group: p.blood_group.clone(),
            nationality: p.nationality.clone(),
            height: p.height.clone(),
            weight: p.weight.clone(),
            identification_mark: p.identification_mark.clone(),
            marital_status: p.marital_status.clone(),
            email: non_blank(&c.email),
            addresses: vec![
                AddressEntry::from_address("PERMANENT", &self.address.permanent_address),
                AddressEntry::from_address("LOCAL", local),
            ],
            contacts,
            emergency_contacts: vec![c.emergency_contact.clone()],
            family_members: family_members
                .into_iter()
                .filter(|m| !m.name.trim().is_empty())
                .collect(),
            documents: self
                .document_verification
                .selected_documents
                .iter()
                .map(|d| DocumentEntry {
                    document_type: d.clone(),
                    is_verified: false,
                })
                .collect(),
            employment: EmploymentEntry {
                company_id: e.company_id.clone(),
                date_of_joining: e.date_of_joining.clone(),
                guard_type_id: e.guard_type_id.clone(),
                psara_status: e.psara_status.clone(),
                license: has_license.then(|| LicenseEntry {
                    number: e.license_number.clone(),
                    date_of_issue: e.license_issue_date.clone(),
                    valid_until: e.license_valid_until.clone(),
                    valid_in: e.license_valid_in.clone(),
                }),
            },
        }
    }
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardCreatePayload {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub sex: String,
    pub date_of_birth: String,
    pub blood_group: String,
    pub nationality: String,
    pub height: String,
    pub weight: String,
    pub identification_mark: String,
    pub marital_status: String,
    pub email: Option<String>,
    pub addresses: Vec<AddressEntry>,
    pub contacts: Vec<ContactEntry>,
    pub emergency_contacts: Vec<EmergencyContact>,
    pub family_members: Vec<FamilyMember>,
    /// Metadata only; files are uploaded separately.
    pub documents: Vec<DocumentEntry>,
    pub employment: EmploymentEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressEntry {
    pub address_type: &'static str,
    #[serde(flatten)]
    pub address: Address,
}

impl AddressEntry {
    fn from_address(address_type: &'static str, address: &Address) -> Self {
        Self {
            address_type,
            address: address.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactEntry {
    pub contact_type: &'static str,
    pub number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyMember {
    pub relationship: &'static str,
    pub name: String,
    pub date_of_birth: Option<String>,
}

impl FamilyMember {
    fn named(relationship: &'static str, name: &str) -> Self {
        Self {
            relationship,
            name: name.trim().to_string(),
            date_of_birth: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEntry {
    pub document_type: String,
    pub is_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmploymentEntry {
    pub company_id: String,
    pub date_of_joining: String,
    pub guard_type_id: String,
    pub psara_status: String,
    pub license: Option<LicenseEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseEntry {
    pub number: String,
    pub date_of_issue: String,
    pub valid_until: String,
    pub valid_in: String,
}
