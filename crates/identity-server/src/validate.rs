//! Request body parsing and field validation for `POST /identify`.

use std::sync::LazyLock;

use identity_core::Observation;
use regex::Regex;
use serde::Deserialize;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
static PHONE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").unwrap());

pub const MISSING_BOTH: &str = "Either email or phoneNumber must be provided";
pub const INVALID_EMAIL: &str = "Invalid email";
pub const INVALID_PHONE: &str = "Invalid phoneNumber";
pub const INVALID_INPUT: &str = "Invalid input";

/// Raw `POST /identify` body. `null`, missing and empty fields are all absent.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "phone")]
    pub phone_number: Option<String>,
}

impl IdentifyRequest {
    /// Trim, drop empties, and check both fields. The first failing rule wins.
    pub fn into_observation(self) -> Result<Observation, &'static str> {
        let email = present(self.email);
        let phone = present(self.phone_number);

        if email.is_none() && phone.is_none() {
            return Err(MISSING_BOTH);
        }
        if email.as_deref().is_some_and(|e| !EMAIL_PATTERN.is_match(e)) {
            return Err(INVALID_EMAIL);
        }
        if phone.as_deref().is_some_and(|p| !PHONE_PATTERN.is_match(p)) {
            return Err(INVALID_PHONE);
        }
        Ok(Observation {
            email,
            phone_number: phone,
        })
    }
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
