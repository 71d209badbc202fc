use super::{Entity, EntityType, Link};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

macro_rules! entity {
    ($ty:ident, $kind:expr, [$($field:ident => $name:literal),* $(,)?]) => {
        impl Entity for $ty {
            const KIND: EntityType = $kind;

            fn import_key(&self) -> &str {
                &self.import_key
            }

            fn set_import_key(&mut self, key: String) {
                self.import_key = key;
            }

            fn id(&self) -> Option<&str> {
                self.id.as_deref()
            }

            fn set_id(&mut self, id: String) {
                self.id = Some(id);
            }

            fn links(&self) -> Vec<(&'static str, &Link)> {
                vec![$(($name, &self.$field)),*]
            }

            fn links_mut(&mut self) -> Vec<(&'static str, &mut Link)> {
                vec![$(($name, &mut self.$field)),*]
            }
        }
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Campus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub name: String,
}
entity!(Campus, EntityType::Campus, []);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Service {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub campus_id: Link,
    pub name: String,
}
entity!(Service, EntityType::Service, [campus_id => "campusId"]);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub service_id: Link,
    pub name: String,
}
entity!(ServiceTime, EntityType::ServiceTime, [service_id => "serviceId"]);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Household {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub name: String,
}
entity!(Household, EntityType::Household, []);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Person {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub household_id: Link,
    pub household_role: Option<String>,
    pub last_name: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub nick_name: Option<String>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<String>,
    pub marital_status: Option<String>,
    pub membership_status: Option<String>,
    pub home_phone: Option<String>,
    pub mobile_phone: Option<String>,
    pub work_phone: Option<String>,
    pub email: Option<String>,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    /// Archive file name of the photo, if one was exported.
    pub photo: Option<String>,
}
entity!(Person, EntityType::Person, [household_id => "householdId"]);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Group {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub category_name: Option<String>,
    pub name: String,
    pub track_attendance: bool,
    pub parent_pickup: bool,
}
entity!(Group, EntityType::Group, []);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupServiceTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub group_id: Link,
    pub service_time_id: Link,
}
entity!(
    GroupServiceTime,
    EntityType::GroupServiceTime,
    [group_id => "groupId", service_time_id => "serviceTimeId"]
);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupMember {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub group_id: Link,
    pub person_id: Link,
}
entity!(
    GroupMember,
    EntityType::GroupMember,
    [group_id => "groupId", person_id => "personId"]
);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Session {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub group_id: Link,
    pub service_time_id: Link,
    pub session_date: NaiveDate,
}
entity!(
    Session,
    EntityType::Session,
    [group_id => "groupId", service_time_id => "serviceTimeId"]
);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Visit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub person_id: Link,
    pub service_id: Link,
    pub group_id: Link,
    pub visit_date: NaiveDate,
}
entity!(
    Visit,
    EntityType::Visit,
    [person_id => "personId", service_id => "serviceId", group_id => "groupId"]
);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisitSession {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub visit_id: Link,
    pub session_id: Link,
}
entity!(
    VisitSession,
    EntityType::VisitSession,
    [visit_id => "visitId", session_id => "sessionId"]
);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Fund {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub name: String,
}
entity!(Fund, EntityType::Fund, []);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DonationBatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub name: String,
    pub batch_date: Option<NaiveDate>,
}
entity!(DonationBatch, EntityType::DonationBatch, []);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Donation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub batch_id: Link,
    pub person_id: Link,
    pub donation_date: NaiveDate,
    pub amount: f64,
    pub method: Option<String>,
    pub method_details: Option<String>,
    pub notes: Option<String>,
}
entity!(
    Donation,
    EntityType::Donation,
    [batch_id => "batchId", person_id => "personId"]
);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FundDonation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub donation_id: Link,
    pub fund_id: Link,
    pub amount: f64,
}
entity!(
    FundDonation,
    EntityType::FundDonation,
    [donation_id => "donationId", fund_id => "fundId"]
);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Form {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub name: String,
    pub content_type: Option<String>,
}
entity!(Form, EntityType::Form, []);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Question {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub form_id: Link,
    pub title: String,
    pub field_type: Option<String>,
    pub placeholder: Option<String>,
    pub description: Option<String>,
    pub choices: Option<String>,
    pub sort: Option<i64>,
}
entity!(Question, EntityType::Question, [form_id => "formId"]);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormSubmission {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub form_id: Link,
    pub content_type: Option<String>,
    pub content_id: Link,
    pub submission_date: Option<NaiveDate>,
}
entity!(
    FormSubmission,
    EntityType::FormSubmission,
    [form_id => "formId", content_id => "contentId"]
);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Answer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub import_key: String,
    pub question_id: Link,
    pub form_submission_id: Link,
    pub value: Option<String>,
}
entity!(
    Answer,
    EntityType::Answer,
    [question_id => "questionId", form_submission_id => "formSubmissionId"]
);
