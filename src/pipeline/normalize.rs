//! Field normalisation: provider prediction → [`CanonicalIdentityFields`].
//!
//! Providers name the same attribute differently across model generations
//! (`given_names` vs `first_name`, `passport_number` vs `id_number`). Each
//! canonical field owns an ordered alias list and takes the value of the
//! first alias that carries something usable. The order is fixed here, so the
//! result never depends on the order keys appear in the provider's JSON.

use crate::pipeline::extract::ProviderPrediction;
use crate::record::CanonicalIdentityFields;
use serde_json::Value;

/// Canonical identity attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    FirstName,
    LastName,
    Nationality,
    DocumentNumber,
    DateOfBirth,
    Sex,
    ExpiryDate,
    IssuingCountry,
    MachineReadableLine1,
    MachineReadableLine2,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 10] = [
        CanonicalField::FirstName,
        CanonicalField::LastName,
        CanonicalField::Nationality,
        CanonicalField::DocumentNumber,
        CanonicalField::DateOfBirth,
        CanonicalField::Sex,
        CanonicalField::ExpiryDate,
        CanonicalField::IssuingCountry,
        CanonicalField::MachineReadableLine1,
        CanonicalField::MachineReadableLine2,
    ];

    /// Provider field names for this attribute, highest precedence first.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            CanonicalField::FirstName => &["given_names", "first_name", "firstname"],
            CanonicalField::LastName => &["surnames", "surname", "last_name", "lastname"],
            CanonicalField::Nationality => &["nationality", "country"],
            CanonicalField::DocumentNumber => &["passport_number", "id_number", "document_number"],
            CanonicalField::DateOfBirth => &["date_of_birth", "dob", "birth_date"],
            CanonicalField::Sex => &["sex", "gender"],
            CanonicalField::ExpiryDate => &["date_of_expiry", "expiry_date", "expiration_date"],
            CanonicalField::IssuingCountry => {
                &["issuing_country", "issuance_country", "country_code"]
            }
            CanonicalField::MachineReadableLine1 => &["mrz_line_1", "mrz1", "MRZ_L1"],
            CanonicalField::MachineReadableLine2 => &["mrz_line_2", "mrz2", "MRZ_L2"],
        }
    }

    fn slot<'a>(&self, fields: &'a mut CanonicalIdentityFields) -> &'a mut Option<String> {
        match self {
            CanonicalField::FirstName => &mut fields.first_name,
            CanonicalField::LastName => &mut fields.last_name,
            CanonicalField::Nationality => &mut fields.nationality,
            CanonicalField::DocumentNumber => &mut fields.document_number,
            CanonicalField::DateOfBirth => &mut fields.date_of_birth,
            CanonicalField::Sex => &mut fields.sex,
            CanonicalField::ExpiryDate => &mut fields.expiry_date,
            CanonicalField::IssuingCountry => &mut fields.issuing_country,
            CanonicalField::MachineReadableLine1 => &mut fields.machine_readable_line_1,
            CanonicalField::MachineReadableLine2 => &mut fields.machine_readable_line_2,
        }
    }
}

/// Map a provider prediction onto canonical identity fields.
///
/// Pure and deterministic: no I/O, and the same prediction always yields the
/// same record. Fields with no usable alias stay `None`.
pub fn normalize(prediction: &ProviderPrediction) -> CanonicalIdentityFields {
    let mut fields = CanonicalIdentityFields::default();
    for field in CanonicalField::ALL {
        *field.slot(&mut fields) = resolve(prediction, field.aliases());
    }
    fields
}

/// First usable value among `aliases`, in order.
pub fn resolve(prediction: &ProviderPrediction, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .find_map(|name| prediction.get(name).and_then(usable_value))
}

/// Extract a usable string from one provider field.
///
/// Usable means one of:
/// * a string or number, stringified;
/// * an object whose `value` is non-null, stringified;
/// * a non-empty list of objects carrying `value`, joined with single spaces
///   (multi-token names such as `given_names`).
fn usable_value(field: &Value) -> Option<String> {
    match field {
        Value::Array(items) => {
            if items.first()?.get("value").is_none() {
                return None;
            }
            let tokens: Vec<String> = items
                .iter()
                .filter_map(|item| item.get("value").and_then(scalar))
                .collect();
            non_blank(tokens.join(" "))
        }
        Value::Object(map) => map.get("value").and_then(scalar),
        other => scalar(other),
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_blank(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_blank(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
