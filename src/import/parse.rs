//! Parser stage: archive tables to typed entities with fresh import keys.
//!
//! Shared reference data is reconciled by natural key (get-or-create) against
//! in-memory indexes, so repeated rows never produce duplicates. Rows that
//! cannot be used are skipped and reported; rows that point at records the
//! archive does not contain are reported as errors and block the commit.

use super::{ImportContext, Issue};
use crate::archive::Archive;
use crate::model::{
    Answer, Campus, Donation, DonationBatch, Form, FormSubmission, Fund, FundDonation, Group,
    GroupMember, GroupServiceTime, Household, Link, Person, Question, Service, ServiceTime,
    Session, Visit, VisitSession,
};
use crate::tables::{
    opt, parse_amount, parse_date, parse_flag, read_table, AnswerRow, AttendanceRow, DonationRow,
    FormRow, FormSubmissionRow, GroupMemberRow, GroupRow, PeopleRow, QuestionRow, ServiceRow,
    TableRow,
};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

pub const DEFAULT_BATCH: &str = "Imported Donations";
pub const DEFAULT_FUND: &str = "(General Fund)";
pub const DEFAULT_CAMPUS: &str = "(Unassigned Campus)";
pub const DEFAULT_SERVICE: &str = "(Unassigned Service)";

/// Parse every table present in the archive. Absent tables are treated as
/// empty.
pub fn parse_archive(archive: &Archive) -> ImportContext {
    let mut p = Parser::default();
    p.ctx.fingerprint = Some(archive.fingerprint());

    if let Some(text) = archive.table(ServiceRow::FILE) {
        p.load_services(text);
    }
    if let Some(text) = archive.table(PeopleRow::FILE) {
        p.load_people(text, archive);
    }
    if let Some(text) = archive.table(GroupRow::FILE) {
        p.load_groups(text);
    }
    if let Some(text) = archive.table(GroupMemberRow::FILE) {
        p.load_group_members(text);
    }
    if let Some(text) = archive.table(AttendanceRow::FILE) {
        p.load_attendance(text);
    }
    if let Some(text) = archive.table(DonationRow::FILE) {
        p.load_donations(text);
    }
    if let Some(text) = archive.table(FormRow::FILE) {
        p.load_forms(text);
    }
    if let Some(text) = archive.table(QuestionRow::FILE) {
        p.load_questions(text);
    }
    if let Some(text) = archive.table(FormSubmissionRow::FILE) {
        p.load_form_submissions(text);
    }
    if let Some(text) = archive.table(AnswerRow::FILE) {
        p.load_answers(text);
    }

    let ctx = p.ctx;
    log::info!(
        "parsed archive: {} people, {} groups, {} donations, {} warnings, {} errors",
        ctx.people.len(),
        ctx.groups.len(),
        ctx.donations.len(),
        ctx.warnings().count(),
        ctx.errors().count()
    );
    ctx
}

/// Record `file_key -> key` unless the file key is blank or already used.
fn record_alias(
    aliases: &mut HashMap<String, String>,
    issues: &mut Vec<Issue>,
    table: &str,
    line: u64,
    file_key: &str,
    key: &str,
) {
    if file_key.is_empty() {
        return;
    }
    if aliases.contains_key(file_key) {
        issues.push(
            Issue::warning(
                table,
                Some(line),
                "duplicate_key",
                format!("importKey {file_key} appears more than once; references use the first row"),
            )
            .with_field("importKey"),
        );
        return;
    }
    aliases.insert(file_key.to_string(), key.to_string());
}

fn next_key(len: usize) -> String {
    (len + 1).to_string()
}

/// Natural-key text comparison: trimmed, case-insensitive.
fn norm(s: &str) -> String {
    s.trim().to_lowercase()
}

#[derive(Default)]
struct Parser {
    ctx: ImportContext,
    campus_by_name: HashMap<String, String>,
    service_by_name: HashMap<(String, String), String>,
    service_time_index: HashMap<String, usize>,
    household_alias: HashMap<String, String>,
    person_alias: HashMap<String, String>,
    group_index: HashMap<String, usize>,
    group_service_times: HashSet<(String, String)>,
    memberships: HashSet<(String, String)>,
    session_by_natural: HashMap<(NaiveDate, String, String), String>,
    visit_by_natural: HashMap<(String, String, String, NaiveDate), String>,
    visit_sessions: HashSet<(String, String)>,
    fund_by_name: HashMap<String, String>,
    batch_by_name: HashMap<String, String>,
    donation_alias: HashMap<String, usize>,
    form_alias: HashMap<String, String>,
    question_alias: HashMap<String, String>,
    submission_alias: HashMap<String, String>,
}

impl Parser {
    fn warn(&mut self, table: &str, line: u64, field: &str, code: &str, message: String) {
        self.ctx
            .issues
            .push(Issue::warning(table, Some(line), code, message).with_field(field));
    }

    fn dangling(&mut self, table: &str, line: u64, field: &str, key: &str) {
        self.ctx.issues.push(
            Issue::error(
                table,
                Some(line),
                "unknown_reference",
                format!("{field} {key:?} does not match any row in the archive"),
            )
            .with_field(field),
        );
    }

    fn read<R: TableRow>(&mut self, text: &str) -> Vec<(u64, R)> {
        let (rows, issues) = read_table::<R>(text);
        self.ctx.issues.extend(issues);
        rows
    }

    /// Parse a date cell, reporting and returning `Err(())` when it is
    /// present but unreadable.
    fn date(
        &mut self,
        table: &str,
        line: u64,
        field: &str,
        raw: &str,
    ) -> Result<Option<NaiveDate>, ()> {
        match parse_date(raw) {
            None => Ok(None),
            Some(Ok(d)) => Ok(Some(d)),
            Some(Err(msg)) => {
                self.warn(table, line, field, "bad_date", msg);
                Err(())
            }
        }
    }

    fn get_or_create_campus(&mut self, name: &str) -> String {
        if let Some(key) = self.campus_by_name.get(&norm(name)) {
            return key.clone();
        }
        let key = next_key(self.ctx.campuses.len());
        self.ctx.campuses.push(Campus {
            import_key: key.clone(),
            name: name.trim().to_string(),
            ..Campus::default()
        });
        self.campus_by_name.insert(norm(name), key.clone());
        key
    }

    fn get_or_create_service(&mut self, campus_key: &str, name: &str) -> String {
        let natural = (campus_key.to_string(), norm(name));
        if let Some(key) = self.service_by_name.get(&natural) {
            return key.clone();
        }
        let key = next_key(self.ctx.services.len());
        self.ctx.services.push(Service {
            import_key: key.clone(),
            campus_id: Link::key(campus_key),
            name: name.trim().to_string(),
            ..Service::default()
        });
        self.service_by_name.insert(natural, key.clone());
        key
    }

    fn load_services(&mut self, text: &str) {
        let table = ServiceRow::FILE;
        for (line, row) in self.read::<ServiceRow>(text) {
            // A keyed service time is kept even when its campus or service is
            // blank, so rows elsewhere that name it still resolve.
            if row.import_key.is_empty() && (row.campus.is_empty() || row.service.is_empty()) {
                let field = if row.campus.is_empty() { "campus" } else { "service" };
                self.warn(table, line, field, "missing_field", format!("{field} is required"));
                continue;
            }
            let campus = if row.campus.is_empty() {
                self.warn(
                    table,
                    line,
                    "campus",
                    "missing_field",
                    format!("campus is blank; filed under {DEFAULT_CAMPUS}"),
                );
                DEFAULT_CAMPUS.to_string()
            } else {
                row.campus.clone()
            };
            let service = if row.service.is_empty() {
                self.warn(
                    table,
                    line,
                    "service",
                    "missing_field",
                    format!("service is blank; filed under {DEFAULT_SERVICE}"),
                );
                DEFAULT_SERVICE.to_string()
            } else {
                row.service.clone()
            };
            let campus_key = self.get_or_create_campus(&campus);
            let service_key = self.get_or_create_service(&campus_key, &service);

            // Rows without a service time key only carry the campus/service.
            if row.import_key.is_empty() {
                continue;
            }
            if let Some(&idx) = self.service_time_index.get(&row.import_key) {
                if self.ctx.service_times[idx].service_id.as_key() != Some(service_key.as_str()) {
                    self.warn(
                        table,
                        line,
                        "importKey",
                        "conflicting_key",
                        format!(
                            "service time {} already belongs to another service; row ignored",
                            row.import_key
                        ),
                    );
                }
                continue;
            }
            let name = if row.time.is_empty() {
                service
            } else {
                row.time.clone()
            };
            self.service_time_index
                .insert(row.import_key.clone(), self.ctx.service_times.len());
            self.ctx.service_times.push(ServiceTime {
                import_key: row.import_key,
                service_id: Link::key(service_key),
                name,
                ..ServiceTime::default()
            });
        }
    }

    fn new_household(&mut self, name: &str) -> String {
        let key = next_key(self.ctx.households.len());
        self.ctx.households.push(Household {
            import_key: key.clone(),
            name: name.to_string(),
            ..Household::default()
        });
        key
    }

    fn load_people(&mut self, text: &str, archive: &Archive) {
        let table = PeopleRow::FILE;
        for (line, row) in self.read::<PeopleRow>(text) {
            // A row without a last name is a separator row in legacy exports.
            if row.last_name.is_empty() {
                self.warn(
                    table,
                    line,
                    "lastName",
                    "blank_row",
                    "row has no lastName and was skipped".into(),
                );
                continue;
            }
            let Ok(birth_date) = self.date(table, line, "birthDate", &row.birth_date) else {
                continue;
            };

            let household_name = opt(&row.household_name).unwrap_or_else(|| row.last_name.clone());
            let household_key = if row.household_key.is_empty() {
                self.new_household(&household_name)
            } else if let Some(key) = self.household_alias.get(&row.household_key) {
                key.clone()
            } else {
                let key = self.new_household(&household_name);
                self.household_alias
                    .insert(row.household_key.clone(), key.clone());
                key
            };

            let key = next_key(self.ctx.people.len());
            record_alias(
                &mut self.person_alias,
                &mut self.ctx.issues,
                table,
                line,
                &row.import_key,
                &key,
            );

            let mut photo = None;
            if let Some(name) = opt(&row.photo) {
                match archive.attachment(&name) {
                    Some(bytes) => {
                        self.ctx.photos.insert(key.clone(), bytes.to_vec());
                        photo = Some(name);
                    }
                    None => self.warn(
                        table,
                        line,
                        "photo",
                        "missing_photo",
                        format!("photo {name} is not in the archive"),
                    ),
                }
            }

            self.ctx.people.push(Person {
                id: None,
                import_key: key,
                household_id: Link::key(household_key),
                household_role: opt(&row.household_role),
                last_name: row.last_name,
                first_name: row.first_name,
                middle_name: opt(&row.middle_name),
                nick_name: opt(&row.nick_name),
                prefix: opt(&row.prefix),
                suffix: opt(&row.suffix),
                birth_date,
                gender: opt(&row.gender),
                marital_status: opt(&row.marital_status),
                membership_status: opt(&row.membership_status),
                home_phone: opt(&row.home_phone),
                mobile_phone: opt(&row.mobile_phone),
                work_phone: opt(&row.work_phone),
                email: opt(&row.email),
                address1: opt(&row.address1),
                address2: opt(&row.address2),
                city: opt(&row.city),
                state: opt(&row.state),
                zip: opt(&row.zip),
                photo,
            });
        }
    }

    fn load_groups(&mut self, text: &str) {
        let table = GroupRow::FILE;
        for (line, row) in self.read::<GroupRow>(text) {
            if row.import_key.is_empty() {
                self.warn(
                    table,
                    line,
                    "importKey",
                    "missing_field",
                    "importKey is required".into(),
                );
                continue;
            }
            if !self.group_index.contains_key(&row.import_key) {
                if row.name.is_empty() {
                    self.warn(table, line, "name", "missing_field", "name is required".into());
                    continue;
                }
                self.group_index
                    .insert(row.import_key.clone(), self.ctx.groups.len());
                self.ctx.groups.push(Group {
                    id: None,
                    import_key: row.import_key.clone(),
                    category_name: opt(&row.category_name),
                    name: row.name.clone(),
                    track_attendance: parse_flag(&row.track_attendance),
                    parent_pickup: parse_flag(&row.parent_pickup),
                });
            }

            if row.service_time_key.is_empty() {
                continue;
            }
            if !self.service_time_index.contains_key(&row.service_time_key) {
                self.dangling(table, line, "serviceTimeKey", &row.service_time_key);
                continue;
            }
            let pair = (row.import_key.clone(), row.service_time_key.clone());
            if self.group_service_times.insert(pair) {
                let key = next_key(self.ctx.group_service_times.len());
                self.ctx.group_service_times.push(GroupServiceTime {
                    id: None,
                    import_key: key,
                    group_id: Link::key(row.import_key),
                    service_time_id: Link::key(row.service_time_key),
                });
            }
        }
    }

    fn load_group_members(&mut self, text: &str) {
        let table = GroupMemberRow::FILE;
        for (line, row) in self.read::<GroupMemberRow>(text) {
            if row.group_key.is_empty() || row.person_key.is_empty() {
                self.warn(
                    table,
                    line,
                    "groupKey",
                    "missing_field",
                    "groupKey and personKey are required".into(),
                );
                continue;
            }
            if !self.group_index.contains_key(&row.group_key) {
                self.dangling(table, line, "groupKey", &row.group_key);
                continue;
            }
            let Some(person_key) = self.person_alias.get(&row.person_key).cloned() else {
                self.dangling(table, line, "personKey", &row.person_key);
                continue;
            };
            if !self
                .memberships
                .insert((row.group_key.clone(), person_key.clone()))
            {
                continue;
            }
            let key = next_key(self.ctx.group_members.len());
            self.ctx.group_members.push(GroupMember {
                id: None,
                import_key: key,
                group_id: Link::key(row.group_key),
                person_id: Link::key(person_key),
            });
        }
    }

    fn load_attendance(&mut self, text: &str) {
        let table = AttendanceRow::FILE;
        for (line, row) in self.read::<AttendanceRow>(text) {
            let date = match self.date(table, line, "date", &row.date) {
                Ok(Some(d)) => d,
                Ok(None) => {
                    self.warn(table, line, "date", "missing_field", "date is required".into());
                    continue;
                }
                Err(()) => continue,
            };
            if row.person_key.is_empty() {
                self.warn(
                    table,
                    line,
                    "personKey",
                    "missing_field",
                    "personKey is required".into(),
                );
                continue;
            }
            let Some(person_key) = self.person_alias.get(&row.person_key).cloned() else {
                self.dangling(table, line, "personKey", &row.person_key);
                continue;
            };
            if !row.group_key.is_empty() && !self.group_index.contains_key(&row.group_key) {
                self.dangling(table, line, "groupKey", &row.group_key);
                continue;
            }
            // Campus-less attendance carries no service time.
            let service_key = if row.service_time_key.is_empty() {
                String::new()
            } else {
                match self.service_time_index.get(&row.service_time_key) {
                    Some(&idx) => self.ctx.service_times[idx]
                        .service_id
                        .as_key()
                        .unwrap_or_default()
                        .to_string(),
                    None => {
                        self.dangling(table, line, "serviceTimeKey", &row.service_time_key);
                        continue;
                    }
                }
            };

            let session_key = if row.group_key.is_empty() {
                None
            } else {
                let natural = (date, row.group_key.clone(), row.service_time_key.clone());
                let key = match self.session_by_natural.get(&natural) {
                    Some(k) => k.clone(),
                    None => {
                        let key = next_key(self.ctx.sessions.len());
                        self.ctx.sessions.push(Session {
                            id: None,
                            import_key: key.clone(),
                            group_id: Link::key(row.group_key.clone()),
                            service_time_id: Link::key(row.service_time_key.clone()),
                            session_date: date,
                        });
                        self.session_by_natural.insert(natural, key.clone());
                        key
                    }
                };
                Some(key)
            };

            let natural = (
                person_key.clone(),
                service_key.clone(),
                row.group_key.clone(),
                date,
            );
            let visit_key = match self.visit_by_natural.get(&natural) {
                Some(k) => k.clone(),
                None => {
                    let key = next_key(self.ctx.visits.len());
                    self.ctx.visits.push(Visit {
                        id: None,
                        import_key: key.clone(),
                        person_id: Link::key(person_key),
                        service_id: Link::key(service_key),
                        group_id: Link::key(row.group_key.clone()),
                        visit_date: date,
                    });
                    self.visit_by_natural.insert(natural, key.clone());
                    key
                }
            };

            if let Some(session_key) = session_key {
                if self
                    .visit_sessions
                    .insert((visit_key.clone(), session_key.clone()))
                {
                    let key = next_key(self.ctx.visit_sessions.len());
                    self.ctx.visit_sessions.push(VisitSession {
                        id: None,
                        import_key: key,
                        visit_id: Link::key(visit_key),
                        session_id: Link::key(session_key),
                    });
                }
            }
        }
    }

    fn get_or_create_fund(&mut self, name: &str) -> String {
        if let Some(key) = self.fund_by_name.get(&norm(name)) {
            return key.clone();
        }
        let key = next_key(self.ctx.funds.len());
        self.ctx.funds.push(Fund {
            id: None,
            import_key: key.clone(),
            name: name.trim().to_string(),
        });
        self.fund_by_name.insert(norm(name), key.clone());
        key
    }

    fn get_or_create_batch(&mut self, name: &str, date: NaiveDate) -> String {
        if let Some(key) = self.batch_by_name.get(&norm(name)) {
            return key.clone();
        }
        let key = next_key(self.ctx.donation_batches.len());
        self.ctx.donation_batches.push(DonationBatch {
            id: None,
            import_key: key.clone(),
            name: name.trim().to_string(),
            batch_date: Some(date),
        });
        self.batch_by_name.insert(norm(name), key.clone());
        key
    }

    fn load_donations(&mut self, text: &str) {
        let table = DonationRow::FILE;
        for (line, row) in self.read::<DonationRow>(text) {
            let date = match self.date(table, line, "date", &row.date) {
                Ok(Some(d)) => d,
                Ok(None) => {
                    self.warn(table, line, "date", "missing_field", "date is required".into());
                    continue;
                }
                Err(()) => continue,
            };
            let amount = match parse_amount(&row.amount) {
                Some(Ok(v)) => v,
                Some(Err(msg)) => {
                    self.warn(table, line, "amount", "bad_amount", msg);
                    continue;
                }
                None => {
                    self.warn(table, line, "amount", "missing_field", "amount is required".into());
                    continue;
                }
            };
            let person_key = if row.person_key.is_empty() {
                String::new()
            } else {
                match self.person_alias.get(&row.person_key) {
                    Some(k) => k.clone(),
                    None => {
                        self.dangling(table, line, "personKey", &row.person_key);
                        continue;
                    }
                }
            };

            let fund_name = opt(&row.fund).unwrap_or_else(|| DEFAULT_FUND.to_string());
            let fund_key = self.get_or_create_fund(&fund_name);

            let existing = if row.donation_key.is_empty() {
                None
            } else {
                self.donation_alias.get(&row.donation_key).copied()
            };
            let donation_key = match existing {
                Some(idx) => {
                    let donation = &mut self.ctx.donations[idx];
                    donation.amount += amount;
                    donation.import_key.clone()
                }
                None => {
                    let batch_name = opt(&row.batch).unwrap_or_else(|| DEFAULT_BATCH.to_string());
                    let batch_key = self.get_or_create_batch(&batch_name, date);
                    let key = next_key(self.ctx.donations.len());
                    if !row.donation_key.is_empty() {
                        self.donation_alias
                            .insert(row.donation_key.clone(), self.ctx.donations.len());
                    }
                    self.ctx.donations.push(Donation {
                        id: None,
                        import_key: key.clone(),
                        batch_id: Link::key(batch_key),
                        person_id: Link::key(person_key),
                        donation_date: date,
                        amount,
                        method: opt(&row.method),
                        method_details: opt(&row.method_details),
                        notes: opt(&row.notes),
                    });
                    key
                }
            };

            let key = next_key(self.ctx.fund_donations.len());
            self.ctx.fund_donations.push(FundDonation {
                id: None,
                import_key: key,
                donation_id: Link::key(donation_key),
                fund_id: Link::key(fund_key),
                amount,
            });
        }
    }

    fn load_forms(&mut self, text: &str) {
        let table = FormRow::FILE;
        for (line, row) in self.read::<FormRow>(text) {
            if row.name.is_empty() {
                self.warn(table, line, "name", "missing_field", "name is required".into());
                continue;
            }
            let key = next_key(self.ctx.forms.len());
            record_alias(
                &mut self.form_alias,
                &mut self.ctx.issues,
                table,
                line,
                &row.import_key,
                &key,
            );
            self.ctx.forms.push(Form {
                id: None,
                import_key: key,
                name: row.name,
                content_type: opt(&row.content_type),
            });
        }
    }

    fn load_questions(&mut self, text: &str) {
        let table = QuestionRow::FILE;
        for (line, row) in self.read::<QuestionRow>(text) {
            if row.form_key.is_empty() {
                self.warn(table, line, "formKey", "missing_field", "formKey is required".into());
                continue;
            }
            let Some(form_key) = self.form_alias.get(&row.form_key).cloned() else {
                self.dangling(table, line, "formKey", &row.form_key);
                continue;
            };
            let sort = match opt(&row.sort).map(|s| s.parse::<i64>()) {
                None => None,
                Some(Ok(v)) => Some(v),
                Some(Err(_)) => {
                    self.warn(
                        table,
                        line,
                        "sort",
                        "bad_number",
                        format!("sort {:?} is not an integer", row.sort),
                    );
                    continue;
                }
            };
            let key = next_key(self.ctx.questions.len());
            record_alias(
                &mut self.question_alias,
                &mut self.ctx.issues,
                table,
                line,
                &row.import_key,
                &key,
            );
            self.ctx.questions.push(Question {
                id: None,
                import_key: key,
                form_id: Link::key(form_key),
                title: row.title,
                field_type: opt(&row.field_type),
                placeholder: opt(&row.placeholder),
                description: opt(&row.description),
                choices: opt(&row.choices),
                sort,
            });
        }
    }

    fn load_form_submissions(&mut self, text: &str) {
        let table = FormSubmissionRow::FILE;
        for (line, row) in self.read::<FormSubmissionRow>(text) {
            if row.form_key.is_empty() {
                self.warn(table, line, "formKey", "missing_field", "formKey is required".into());
                continue;
            }
            let Some(form_key) = self.form_alias.get(&row.form_key).cloned() else {
                self.dangling(table, line, "formKey", &row.form_key);
                continue;
            };
            let content_key = if row.content_key.is_empty() {
                String::new()
            } else {
                match self.person_alias.get(&row.content_key) {
                    Some(k) => k.clone(),
                    None => {
                        self.dangling(table, line, "contentKey", &row.content_key);
                        continue;
                    }
                }
            };
            let Ok(submission_date) =
                self.date(table, line, "submissionDate", &row.submission_date)
            else {
                continue;
            };
            let key = next_key(self.ctx.form_submissions.len());
            record_alias(
                &mut self.submission_alias,
                &mut self.ctx.issues,
                table,
                line,
                &row.import_key,
                &key,
            );
            self.ctx.form_submissions.push(FormSubmission {
                id: None,
                import_key: key,
                form_id: Link::key(form_key),
                content_type: opt(&row.content_type),
                content_id: Link::key(content_key),
                submission_date,
            });
        }
    }

    fn load_answers(&mut self, text: &str) {
        let table = AnswerRow::FILE;
        for (line, row) in self.read::<AnswerRow>(text) {
            if row.question_key.is_empty() || row.form_submission_key.is_empty() {
                self.warn(
                    table,
                    line,
                    "questionKey",
                    "missing_field",
                    "questionKey and formSubmissionKey are required".into(),
                );
                continue;
            }
            let Some(question_key) = self.question_alias.get(&row.question_key).cloned() else {
                self.dangling(table, line, "questionKey", &row.question_key);
                continue;
            };
            let Some(submission_key) = self
                .submission_alias
                .get(&row.form_submission_key)
                .cloned()
            else {
                self.dangling(table, line, "formSubmissionKey", &row.form_submission_key);
                continue;
            };
            let key = next_key(self.ctx.answers.len());
            self.ctx.answers.push(Answer {
                id: None,
                import_key: key,
                question_id: Link::key(question_key),
                form_submission_id: Link::key(submission_key),
                value: opt(&row.value),
            });
        }
    }
}
