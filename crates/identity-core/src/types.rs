use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::ResolveError;

/// Store-assigned contact identifier.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ContactId(i64);

impl ContactId {
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ContactId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LinkPrecedence {
    Primary,
    Secondary,
}

impl fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

impl FromStr for LinkPrecedence {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(format!("unknown link precedence: {other}")),
        }
    }
}

/// One observed (email, phone) record.
///
/// Primaries carry no `linked_id`; secondaries link to exactly one primary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// The id of the primary this record belongs to: its own id for a
    /// primary, its `linked_id` for a secondary.
    pub fn primary_id(&self) -> Option<ContactId> {
        match self.link_precedence {
            LinkPrecedence::Primary => Some(self.id),
            LinkPrecedence::Secondary => self.linked_id,
        }
    }
}

/// An inbound (email?, phone?) pair to resolve.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Observation {
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

impl Observation {
    pub fn new(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_owned),
            phone_number: phone_number.map(str::to_owned),
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }

    pub fn validate(&self) -> Result<(), ResolveError> {
        if self.email.is_none() && self.phone_number.is_none() {
            return Err(ResolveError::InvalidObservation(
                "either email or phoneNumber must be provided".into(),
            ));
        }
        Ok(())
    }

    /// Normalized keys used to serialize concurrent resolutions touching the
    /// same identifying values. Sorted and deduplicated.
    pub fn lock_keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(2);
        if let Some(email) = self.email() {
            keys.push(format!("email:{}", email.trim().to_lowercase()));
        }
        if let Some(phone) = self.phone_number() {
            let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
            keys.push(format!("phone:{digits}"));
        }
        keys.sort();
        keys.dedup();
        keys
    }

    /// Whether `contact` carries exactly this (email, phone) pair.
    pub fn same_pair_as(&self, contact: &Contact) -> bool {
        self.email() == contact.email.as_deref()
            && self.phone_number() == contact.phone_number.as_deref()
    }
}

/// The externally visible consolidated view of one cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedIdentity {
    pub primary_id: ContactId,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub secondary_ids: Vec<ContactId>,
}

/// What a resolution did to the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    CreatedPrimary,
    CreatedSecondary,
    Unchanged,
    Merged { demoted: Vec<ContactId> },
}

impl Outcome {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::CreatedPrimary => "created_primary",
            Self::CreatedSecondary => "created_secondary",
            Self::Unchanged => "unchanged",
            Self::Merged { .. } => "merged",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub identity: ConsolidatedIdentity,
    pub outcome: Outcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: i64, precedence: LinkPrecedence, linked: Option<i64>) -> Contact {
        let now = Utc::now();
        Contact {
            id: ContactId::new(id),
            email: Some("a@b.co".into()),
            phone_number: None,
            linked_id: linked.map(ContactId::new),
            link_precedence: precedence,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn precedence_display_and_parse() {
        assert_eq!(LinkPrecedence::Primary.to_string(), "primary");
        assert_eq!("secondary".parse::<LinkPrecedence>(), Ok(LinkPrecedence::Secondary));
        assert!("tertiary".parse::<LinkPrecedence>().is_err());
    }

    #[test]
    fn primary_id_for_primary_is_own_id() {
        let c = contact(7, LinkPrecedence::Primary, None);
        assert!(c.is_primary());
        assert_eq!(c.primary_id(), Some(ContactId::new(7)));
    }

    #[test]
    fn primary_id_for_secondary_is_link() {
        let c = contact(9, LinkPrecedence::Secondary, Some(3));
        assert!(!c.is_primary());
        assert_eq!(c.primary_id(), Some(ContactId::new(3)));
    }

    #[test]
    fn validate_rejects_empty_observation() {
        let err = Observation::default().validate().unwrap_err();
        assert!(matches!(err, ResolveError::InvalidObservation(_)));
        assert!(Observation::new(None, Some("123")).validate().is_ok());
    }

    #[test]
    fn lock_keys_are_normalized_and_sorted() {
        let obs = Observation::new(Some("  Doc@Example.COM "), Some("+1 (555) 010"));
        assert_eq!(obs.lock_keys(), vec!["email:doc@example.com", "phone:1555010"]);
        assert_eq!(Observation::new(None, Some("42")).lock_keys(), vec!["phone:42"]);
    }

    #[test]
    fn same_pair_treats_absent_values_as_equal() {
        let c = contact(1, LinkPrecedence::Primary, None);
        assert!(Observation::new(Some("a@b.co"), None).same_pair_as(&c));
        assert!(!Observation::new(Some("a@b.co"), Some("1")).same_pair_as(&c));
    }

    #[test]
    fn identity_serializes_camel_case() {
        let identity = ConsolidatedIdentity {
            primary_id: ContactId::new(1),
            emails: vec!["a@b.co".into()],
            phones: vec![],
            secondary_ids: vec![ContactId::new(2)],
        };
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["primaryId"], 1);
        assert_eq!(json["secondaryIds"][0], 2);
        assert!(json["phones"].as_array().unwrap().is_empty());
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(Outcome::Merged { demoted: vec![] }.label(), "merged");
        assert_eq!(Outcome::Unchanged.label(), "unchanged");
    }
}
