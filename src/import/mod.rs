//! Archive import: parse tables into an [`ImportContext`], validate it, then
//! commit it to a store in dependency order.

pub mod commit;
pub mod parse;
pub mod validate;

use crate::model::{
    Answer, Campus, Donation, DonationBatch, EntityType, Form, FormSubmission, Fund,
    FundDonation, Group, GroupMember, GroupServiceTime, Household, Person, Question, Service,
    ServiceTime, Session, Visit, VisitSession,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub use commit::{commit, CancelToken, CommitReport};
pub use parse::parse_archive;
pub use validate::validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A problem found while reading, validating or exporting. Warnings never
/// stop a run; errors block the commit stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub severity: Severity,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub code: String,
    pub message: String,
}

impl Issue {
    pub fn warning(
        table: &str,
        line: Option<u64>,
        code: &str,
        message: impl Into<String>,
    ) -> Issue {
        Issue {
            severity: Severity::Warning,
            table: table.to_string(),
            line,
            field: None,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn error(table: &str, line: Option<u64>, code: &str, message: impl Into<String>) -> Issue {
        Issue {
            severity: Severity::Error,
            ..Issue::warning(table, line, code, message)
        }
    }

    pub fn with_field(mut self, field: &str) -> Issue {
        self.field = Some(field.to_string());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Everything one import run works on. Owned by the run; nothing here is
/// shared with other runs.
#[derive(Debug, Default)]
pub struct ImportContext {
    pub campuses: Vec<Campus>,
    pub services: Vec<Service>,
    pub service_times: Vec<ServiceTime>,
    pub households: Vec<Household>,
    pub people: Vec<Person>,
    pub groups: Vec<Group>,
    pub group_service_times: Vec<GroupServiceTime>,
    pub group_members: Vec<GroupMember>,
    pub sessions: Vec<Session>,
    pub visits: Vec<Visit>,
    pub visit_sessions: Vec<VisitSession>,
    pub funds: Vec<Fund>,
    pub donation_batches: Vec<DonationBatch>,
    pub donations: Vec<Donation>,
    pub fund_donations: Vec<FundDonation>,
    pub forms: Vec<Form>,
    pub questions: Vec<Question>,
    pub form_submissions: Vec<FormSubmission>,
    pub answers: Vec<Answer>,
    /// Photo bytes keyed by person import key.
    pub photos: HashMap<String, Vec<u8>>,
    pub issues: Vec<Issue>,
    /// SHA-256 of the archive's tables, used as the idempotency token.
    pub fingerprint: Option<String>,
}

impl ImportContext {
    pub fn len(&self, kind: EntityType) -> usize {
        match kind {
            EntityType::Campus => self.campuses.len(),
            EntityType::Service => self.services.len(),
            EntityType::ServiceTime => self.service_times.len(),
            EntityType::Household => self.households.len(),
            EntityType::Person => self.people.len(),
            EntityType::Group => self.groups.len(),
            EntityType::GroupServiceTime => self.group_service_times.len(),
            EntityType::GroupMember => self.group_members.len(),
            EntityType::Session => self.sessions.len(),
            EntityType::Visit => self.visits.len(),
            EntityType::VisitSession => self.visit_sessions.len(),
            EntityType::Fund => self.funds.len(),
            EntityType::DonationBatch => self.donation_batches.len(),
            EntityType::Donation => self.donations.len(),
            EntityType::FundDonation => self.fund_donations.len(),
            EntityType::Form => self.forms.len(),
            EntityType::Question => self.questions.len(),
            EntityType::FormSubmission => self.form_submissions.len(),
            EntityType::Answer => self.answers.len(),
        }
    }

    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        EntityType::ALL
            .into_iter()
            .map(|k| (k.step_name(), self.len(k)))
            .collect()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| !i.is_error())
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.is_error())
    }
}
