//! Record model shared by the exporter and the importer.
//!
//! Every entity carries an `import_key` that only exists for the duration of
//! one migration run. Relationships between entities are expressed through
//! [`Link`] fields which hold either the target's import key (while parsing)
//! or the target's store id (after rewriting, or when fetched from a store).

mod entities;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub use entities::{
    Answer, Campus, Donation, DonationBatch, Form, FormSubmission, Fund, FundDonation, Group,
    GroupMember, GroupServiceTime, Household, Person, Question, Service, ServiceTime, Session,
    Visit, VisitSession,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    Campus,
    Service,
    ServiceTime,
    Household,
    Person,
    Group,
    GroupServiceTime,
    GroupMember,
    Session,
    Visit,
    VisitSession,
    Fund,
    DonationBatch,
    Donation,
    FundDonation,
    Form,
    Question,
    FormSubmission,
    Answer,
}

/// A reference field on an entity, declared once per entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefField {
    /// Serialized field name, e.g. `campusId`.
    pub field: &'static str,
    pub target: EntityType,
    pub required: bool,
}

const fn required(field: &'static str, target: EntityType) -> RefField {
    RefField {
        field,
        target,
        required: true,
    }
}

const fn optional(field: &'static str, target: EntityType) -> RefField {
    RefField {
        field,
        target,
        required: false,
    }
}

impl EntityType {
    /// All entity types in the order a sequential commit walks them.
    pub const ALL: [EntityType; 19] = [
        EntityType::Campus,
        EntityType::Service,
        EntityType::ServiceTime,
        EntityType::Household,
        EntityType::Person,
        EntityType::Group,
        EntityType::GroupServiceTime,
        EntityType::GroupMember,
        EntityType::Session,
        EntityType::Visit,
        EntityType::VisitSession,
        EntityType::Fund,
        EntityType::DonationBatch,
        EntityType::Donation,
        EntityType::FundDonation,
        EntityType::Form,
        EntityType::Question,
        EntityType::FormSubmission,
        EntityType::Answer,
    ];

    /// Progress step name, also used as the store collection name.
    pub fn step_name(self) -> &'static str {
        match self {
            EntityType::Campus => "campuses",
            EntityType::Service => "services",
            EntityType::ServiceTime => "serviceTimes",
            EntityType::Household => "households",
            EntityType::Person => "people",
            EntityType::Group => "groups",
            EntityType::GroupServiceTime => "groupServiceTimes",
            EntityType::GroupMember => "groupMembers",
            EntityType::Session => "sessions",
            EntityType::Visit => "visits",
            EntityType::VisitSession => "visitSessions",
            EntityType::Fund => "funds",
            EntityType::DonationBatch => "donationBatches",
            EntityType::Donation => "donations",
            EntityType::FundDonation => "fundDonations",
            EntityType::Form => "forms",
            EntityType::Question => "questions",
            EntityType::FormSubmission => "formSubmissions",
            EntityType::Answer => "answers",
        }
    }

    pub fn from_step_name(name: &str) -> Option<EntityType> {
        EntityType::ALL.into_iter().find(|t| t.step_name() == name)
    }

    pub fn references(self) -> &'static [RefField] {
        use EntityType as E;
        match self {
            E::Campus | E::Household | E::Group | E::Fund | E::DonationBatch | E::Form => &[],
            E::Service => const { &[required("campusId", E::Campus)] },
            E::ServiceTime => const { &[required("serviceId", E::Service)] },
            E::Person => const { &[required("householdId", E::Household)] },
            E::GroupServiceTime => const {
                &[
                    required("groupId", E::Group),
                    required("serviceTimeId", E::ServiceTime),
                ]
            },
            E::GroupMember => const {
                &[
                    required("groupId", E::Group),
                    required("personId", E::Person),
                ]
            },
            // Campus-less attendance has no service time.
            E::Session => const {
                &[
                    required("groupId", E::Group),
                    optional("serviceTimeId", E::ServiceTime),
                ]
            },
            E::Visit => const {
                &[
                    required("personId", E::Person),
                    optional("serviceId", E::Service),
                    optional("groupId", E::Group),
                ]
            },
            E::VisitSession => const {
                &[
                    required("visitId", E::Visit),
                    required("sessionId", E::Session),
                ]
            },
            E::Donation => const {
                &[
                    required("batchId", E::DonationBatch),
                    optional("personId", E::Person),
                ]
            },
            E::FundDonation => const {
                &[
                    required("donationId", E::Donation),
                    required("fundId", E::Fund),
                ]
            },
            E::Question => const { &[required("formId", E::Form)] },
            E::FormSubmission => const {
                &[
                    required("formId", E::Form),
                    optional("contentId", E::Person),
                ]
            },
            E::Answer => const {
                &[
                    required("questionId", E::Question),
                    required("formSubmissionId", E::FormSubmission),
                ]
            },
        }
    }

    pub fn reference(self, field: &str) -> Option<&'static RefField> {
        self.references().iter().find(|r| r.field == field)
    }

    /// Entity types that must be committed before this one, derived from the
    /// declared reference fields.
    pub fn dependencies(self) -> Vec<EntityType> {
        let mut deps: Vec<EntityType> = Vec::new();
        for r in self.references() {
            if !deps.contains(&r.target) {
                deps.push(r.target);
            }
        }
        deps
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.step_name())
    }
}

/// Value of a reference field.
///
/// Serializes as the held string (or null); deserializes a store document's
/// foreign id into [`Link::Id`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Link {
    #[default]
    Unset,
    Key(String),
    Id(String),
}

impl Link {
    pub fn key(key: impl Into<String>) -> Link {
        let key = key.into();
        if key.trim().is_empty() {
            Link::Unset
        } else {
            Link::Key(key.trim().to_string())
        }
    }

    pub fn as_key(&self) -> Option<&str> {
        match self {
            Link::Key(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<&str> {
        match self {
            Link::Id(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, Link::Unset)
    }
}

impl Serialize for Link {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Link::Unset => serializer.serialize_none(),
            Link::Key(v) | Link::Id(v) => serializer.serialize_str(v),
        }
    }
}

impl<'de> Deserialize<'de> for Link {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(match raw {
            Some(v) if !v.is_empty() => Link::Id(v),
            _ => Link::Unset,
        })
    }
}

/// Common capabilities of every entity struct.
pub trait Entity:
    Clone + fmt::Debug + Serialize + serde::de::DeserializeOwned + Send + Sync + 'static
{
    const KIND: EntityType;

    fn import_key(&self) -> &str;
    fn set_import_key(&mut self, key: String);
    fn id(&self) -> Option<&str>;
    fn set_id(&mut self, id: String);

    /// Reference fields paired with their serialized names.
    fn links(&self) -> Vec<(&'static str, &Link)>;
    fn links_mut(&mut self) -> Vec<(&'static str, &mut Link)>;
}
