//! Exporter: live store to flat archive tables.
//!
//! Every entity type is fetched in commit order and numbered `1..=n` in fetch
//! order. Foreign ids are then replaced by the target's number. A foreign id
//! that matches nothing is reported and written as an empty cell; the export
//! itself always completes.

use crate::archive::Archive;
use crate::error::Result;
use crate::import::Issue;
use crate::model::{
    Answer, Campus, Donation, DonationBatch, Entity, EntityType, Form, FormSubmission, Fund,
    FundDonation, Group, GroupMember, GroupServiceTime, Household, Link, Person, Question, Service,
    ServiceTime, Session, Visit, VisitSession,
};
use crate::store::Store;
use crate::tables::{
    format_amount, format_date, write_table, AnswerRow, AttendanceRow, DonationRow, FormRow,
    FormSubmissionRow, GroupMemberRow, GroupRow, PeopleRow, QuestionRow, ServiceRow, TableRow,
};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Default)]
pub struct ExportReport {
    pub archive: Archive,
    /// Rows written per table file.
    pub rows: BTreeMap<&'static str, usize>,
    /// Records fetched per entity type.
    pub fetched: BTreeMap<&'static str, usize>,
    pub issues: Vec<Issue>,
}

#[derive(Default)]
struct Snapshot {
    campuses: Vec<Campus>,
    services: Vec<Service>,
    service_times: Vec<ServiceTime>,
    households: Vec<Household>,
    people: Vec<Person>,
    groups: Vec<Group>,
    group_service_times: Vec<GroupServiceTime>,
    group_members: Vec<GroupMember>,
    sessions: Vec<Session>,
    visits: Vec<Visit>,
    visit_sessions: Vec<VisitSession>,
    funds: Vec<Fund>,
    donation_batches: Vec<DonationBatch>,
    donations: Vec<Donation>,
    fund_donations: Vec<FundDonation>,
    forms: Vec<Form>,
    questions: Vec<Question>,
    form_submissions: Vec<FormSubmission>,
    answers: Vec<Answer>,
}

#[derive(Default)]
struct Exporter {
    /// Store id to export key, per entity type.
    keys: HashMap<EntityType, HashMap<String, String>>,
    issues: Vec<Issue>,
    fetched: BTreeMap<&'static str, usize>,
}

impl Exporter {
    /// Fetch one type and number its records in fetch order.
    fn fetch<T: Entity>(&mut self, store: &dyn Store) -> Result<Vec<T>> {
        let docs = store.fetch_all(T::KIND)?;
        let mut out: Vec<T> = Vec::with_capacity(docs.len());
        let ids = self.keys.entry(T::KIND).or_default();
        for doc in docs {
            let mut record: T = serde_json::from_value(doc)?;
            let Some(id) = record.id().map(str::to_string) else {
                log::warn!("{}: record without id skipped", T::KIND);
                self.issues.push(Issue::warning(
                    T::KIND.step_name(),
                    None,
                    "missing_id",
                    format!("a {} record has no id and was not exported", T::KIND),
                ));
                continue;
            };
            let key = (out.len() + 1).to_string();
            ids.insert(id, key.clone());
            record.set_import_key(key);
            out.push(record);
        }
        log::debug!("{}: fetched {}", T::KIND, out.len());
        self.fetched.insert(T::KIND.step_name(), out.len());
        Ok(out)
    }

    /// Export key of the record a link points at; empty when unset or
    /// dangling.
    fn key_of(&mut self, owner: EntityType, owner_key: &str, field: &str, link: &Link) -> String {
        let Some(decl) = owner.reference(field) else {
            return String::new();
        };
        match link {
            Link::Unset => String::new(),
            Link::Key(key) => key.clone(),
            Link::Id(id) => {
                if let Some(key) = self.keys.get(&decl.target).and_then(|m| m.get(id)) {
                    return key.clone();
                }
                log::warn!(
                    "{owner} {owner_key}: {field} points to missing {} {id}",
                    decl.target
                );
                self.issues.push(
                    Issue::warning(
                        owner.step_name(),
                        None,
                        "dangling_reference",
                        format!(
                            "{owner} {owner_key}: {field} points to missing {} {id}; exported empty",
                            decl.target
                        ),
                    )
                    .with_field(field),
                );
                String::new()
            }
        }
    }

    fn snapshot(&mut self, store: &dyn Store) -> Result<Snapshot> {
        Ok(Snapshot {
            campuses: self.fetch(store)?,
            services: self.fetch(store)?,
            service_times: self.fetch(store)?,
            households: self.fetch(store)?,
            people: self.fetch(store)?,
            groups: self.fetch(store)?,
            group_service_times: self.fetch(store)?,
            group_members: self.fetch(store)?,
            sessions: self.fetch(store)?,
            visits: self.fetch(store)?,
            visit_sessions: self.fetch(store)?,
            funds: self.fetch(store)?,
            donation_batches: self.fetch(store)?,
            donations: self.fetch(store)?,
            fund_donations: self.fetch(store)?,
            forms: self.fetch(store)?,
            questions: self.fetch(store)?,
            form_submissions: self.fetch(store)?,
            answers: self.fetch(store)?,
        })
    }
}

fn by_key<T: Entity>(items: &[T]) -> HashMap<String, &T> {
    items
        .iter()
        .map(|i| (i.import_key().to_string(), i))
        .collect()
}

fn text(v: &Option<String>) -> String {
    v.clone().unwrap_or_default()
}

fn flag(v: bool) -> String {
    let s = if v { "true" } else { "false" };
    s.to_string()
}

fn service_rows(ex: &mut Exporter, s: &Snapshot) -> Vec<ServiceRow> {
    let campuses = by_key(&s.campuses);
    let mut rows = Vec::new();
    let mut with_times: HashSet<String> = HashSet::new();
    let service_names = |ex: &mut Exporter, svc: &Service| -> (String, String) {
        let campus_key = ex.key_of(EntityType::Service, &svc.import_key, "campusId", &svc.campus_id);
        let campus = campuses
            .get(&campus_key)
            .map(|c| c.name.clone())
            .unwrap_or_default();
        (campus, svc.name.clone())
    };
    let services = by_key(&s.services);

    for st in &s.service_times {
        let service_key =
            ex.key_of(EntityType::ServiceTime, &st.import_key, "serviceId", &st.service_id);
        let (campus, service) = match services.get(&service_key) {
            Some(&svc) => {
                with_times.insert(service_key.clone());
                service_names(&mut *ex, svc)
            }
            None => (String::new(), String::new()),
        };
        rows.push(ServiceRow {
            import_key: st.import_key.clone(),
            campus,
            service,
            time: st.name.clone(),
        });
    }
    for svc in &s.services {
        if with_times.contains(&svc.import_key) {
            continue;
        }
        let (campus, service) = service_names(&mut *ex, svc);
        rows.push(ServiceRow {
            import_key: String::new(),
            campus,
            service,
            time: String::new(),
        });
    }
    rows
}

fn people_rows(
    ex: &mut Exporter,
    s: &Snapshot,
    store: &dyn Store,
    archive: &mut Archive,
) -> Vec<PeopleRow> {
    let households = by_key(&s.households);
    let mut rows = Vec::with_capacity(s.people.len());
    for p in &s.people {
        let household_key =
            ex.key_of(EntityType::Person, &p.import_key, "householdId", &p.household_id);
        let household_name = households
            .get(&household_key)
            .map(|h| h.name.clone())
            .unwrap_or_default();

        let mut photo = String::new();
        if let Some(id) = p.id.as_deref() {
            match store.fetch_photo(id) {
                Ok(Some(bytes)) => {
                    photo = format!("{id}.png");
                    archive.insert_attachment(&photo, bytes);
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("people {}: photo not exported: {e}", p.import_key);
                    ex.issues.push(
                        Issue::warning(
                            EntityType::Person.step_name(),
                            None,
                            "photo_unavailable",
                            format!("people {}: photo not exported: {e}", p.import_key),
                        )
                        .with_field("photo"),
                    );
                }
            }
        }

        rows.push(PeopleRow {
            import_key: p.import_key.clone(),
            household_key,
            household_name,
            household_role: text(&p.household_role),
            last_name: p.last_name.clone(),
            first_name: p.first_name.clone(),
            middle_name: text(&p.middle_name),
            nick_name: text(&p.nick_name),
            prefix: text(&p.prefix),
            suffix: text(&p.suffix),
            birth_date: p.birth_date.as_ref().map(format_date).unwrap_or_default(),
            gender: text(&p.gender),
            marital_status: text(&p.marital_status),
            membership_status: text(&p.membership_status),
            home_phone: text(&p.home_phone),
            mobile_phone: text(&p.mobile_phone),
            work_phone: text(&p.work_phone),
            email: text(&p.email),
            address1: text(&p.address1),
            address2: text(&p.address2),
            city: text(&p.city),
            state: text(&p.state),
            zip: text(&p.zip),
            photo,
        });
    }
    rows
}

fn group_rows(ex: &mut Exporter, s: &Snapshot) -> Vec<GroupRow> {
    let mut times: HashMap<String, Vec<String>> = HashMap::new();
    for gst in &s.group_service_times {
        let group_key =
            ex.key_of(EntityType::GroupServiceTime, &gst.import_key, "groupId", &gst.group_id);
        let st_key = ex.key_of(
            EntityType::GroupServiceTime,
            &gst.import_key,
            "serviceTimeId",
            &gst.service_time_id,
        );
        if group_key.is_empty() || st_key.is_empty() {
            continue;
        }
        times.entry(group_key).or_default().push(st_key);
    }

    let mut rows = Vec::new();
    for g in &s.groups {
        let row = |service_time_key: String| GroupRow {
            import_key: g.import_key.clone(),
            service_time_key,
            category_name: text(&g.category_name),
            name: g.name.clone(),
            track_attendance: flag(g.track_attendance),
            parent_pickup: flag(g.parent_pickup),
        };
        match times.remove(&g.import_key) {
            Some(keys) => rows.extend(keys.into_iter().map(row)),
            None => rows.push(row(String::new())),
        }
    }
    rows
}

fn group_member_rows(ex: &mut Exporter, s: &Snapshot) -> Vec<GroupMemberRow> {
    s.group_members
        .iter()
        .map(|m| GroupMemberRow {
            group_key: ex.key_of(EntityType::GroupMember, &m.import_key, "groupId", &m.group_id),
            person_key: ex.key_of(EntityType::GroupMember, &m.import_key, "personId", &m.person_id),
        })
        .collect()
}

fn attendance_rows(ex: &mut Exporter, s: &Snapshot) -> Vec<AttendanceRow> {
    let visits = by_key(&s.visits);
    let sessions = by_key(&s.sessions);
    let mut seen_visits: HashSet<String> = HashSet::new();
    let mut rows = Vec::new();

    for vs in &s.visit_sessions {
        let visit_key = ex.key_of(EntityType::VisitSession, &vs.import_key, "visitId", &vs.visit_id);
        let session_key =
            ex.key_of(EntityType::VisitSession, &vs.import_key, "sessionId", &vs.session_id);
        let (Some(visit), Some(session)) = (visits.get(&visit_key), sessions.get(&session_key))
        else {
            continue;
        };
        seen_visits.insert(visit_key.clone());
        rows.push(AttendanceRow {
            date: format_date(&session.session_date),
            service_time_key: ex.key_of(
                EntityType::Session,
                &session.import_key,
                "serviceTimeId",
                &session.service_time_id,
            ),
            group_key: ex.key_of(EntityType::Session, &session.import_key, "groupId", &session.group_id),
            person_key: ex.key_of(EntityType::Visit, &visit.import_key, "personId", &visit.person_id),
        });
    }

    // A visit outside any session is written with no group so that it does
    // not gain a session on import.
    for v in &s.visits {
        if seen_visits.contains(&v.import_key) {
            continue;
        }
        rows.push(AttendanceRow {
            date: format_date(&v.visit_date),
            service_time_key: String::new(),
            group_key: String::new(),
            person_key: ex.key_of(EntityType::Visit, &v.import_key, "personId", &v.person_id),
        });
    }
    rows
}

fn donation_rows(ex: &mut Exporter, s: &Snapshot) -> Vec<DonationRow> {
    let donations = by_key(&s.donations);
    let batches = by_key(&s.donation_batches);
    let funds = by_key(&s.funds);
    let mut with_funds: HashSet<String> = HashSet::new();
    let mut rows = Vec::new();

    let base = |ex: &mut Exporter, d: &Donation| -> DonationRow {
        let batch_key = ex.key_of(EntityType::Donation, &d.import_key, "batchId", &d.batch_id);
        DonationRow {
            donation_key: d.import_key.clone(),
            batch: batches
                .get(&batch_key)
                .map(|b| b.name.clone())
                .unwrap_or_default(),
            date: format_date(&d.donation_date),
            person_key: ex.key_of(EntityType::Donation, &d.import_key, "personId", &d.person_id),
            method: text(&d.method),
            method_details: text(&d.method_details),
            amount: format_amount(d.amount),
            fund: String::new(),
            notes: text(&d.notes),
        }
    };

    for fd in &s.fund_donations {
        let donation_key =
            ex.key_of(EntityType::FundDonation, &fd.import_key, "donationId", &fd.donation_id);
        let Some(&donation) = donations.get(&donation_key) else {
            continue;
        };
        with_funds.insert(donation_key.clone());
        let fund_key = ex.key_of(EntityType::FundDonation, &fd.import_key, "fundId", &fd.fund_id);
        let mut row = base(&mut *ex, donation);
        row.amount = format_amount(fd.amount);
        row.fund = funds
            .get(&fund_key)
            .map(|f| f.name.clone())
            .unwrap_or_default();
        rows.push(row);
    }
    for d in &s.donations {
        if !with_funds.contains(&d.import_key) {
            rows.push(base(&mut *ex, d));
        }
    }
    rows
}

fn form_rows(s: &Snapshot) -> Vec<FormRow> {
    s.forms
        .iter()
        .map(|f| FormRow {
            import_key: f.import_key.clone(),
            name: f.name.clone(),
            content_type: text(&f.content_type),
        })
        .collect()
}

fn question_rows(ex: &mut Exporter, s: &Snapshot) -> Vec<QuestionRow> {
    s.questions
        .iter()
        .map(|q| QuestionRow {
            import_key: q.import_key.clone(),
            form_key: ex.key_of(EntityType::Question, &q.import_key, "formId", &q.form_id),
            title: q.title.clone(),
            field_type: text(&q.field_type),
            placeholder: text(&q.placeholder),
            description: text(&q.description),
            choices: text(&q.choices),
            sort: q.sort.map(|v| v.to_string()).unwrap_or_default(),
        })
        .collect()
}

fn form_submission_rows(ex: &mut Exporter, s: &Snapshot) -> Vec<FormSubmissionRow> {
    s.form_submissions
        .iter()
        .map(|fs| FormSubmissionRow {
            import_key: fs.import_key.clone(),
            form_key: ex.key_of(EntityType::FormSubmission, &fs.import_key, "formId", &fs.form_id),
            content_type: text(&fs.content_type),
            content_key: ex.key_of(
                EntityType::FormSubmission,
                &fs.import_key,
                "contentId",
                &fs.content_id,
            ),
            submission_date: fs.submission_date.as_ref().map(format_date).unwrap_or_default(),
        })
        .collect()
}

fn answer_rows(ex: &mut Exporter, s: &Snapshot) -> Vec<AnswerRow> {
    s.answers
        .iter()
        .map(|a| AnswerRow {
            question_key: ex.key_of(EntityType::Answer, &a.import_key, "questionId", &a.question_id),
            form_submission_key: ex.key_of(
                EntityType::Answer,
                &a.import_key,
                "formSubmissionId",
                &a.form_submission_id,
            ),
            value: text(&a.value),
        })
        .collect()
}

fn put<R: TableRow>(report: &mut ExportReport, rows: Vec<R>) -> Result<()> {
    report.rows.insert(R::FILE, rows.len());
    report.archive.insert_table(R::FILE, write_table(&rows)?);
    Ok(())
}

/// Read every record from the store and lay it out as archive tables plus
/// photo attachments.
pub fn export_store(store: &dyn Store) -> Result<ExportReport> {
    let mut ex = Exporter::default();
    let snap = ex.snapshot(store)?;
    let mut report = ExportReport::default();

    let services = service_rows(&mut ex, &snap);
    let people = people_rows(&mut ex, &snap, store, &mut report.archive);
    let groups = group_rows(&mut ex, &snap);
    let members = group_member_rows(&mut ex, &snap);
    let attendance = attendance_rows(&mut ex, &snap);
    let donations = donation_rows(&mut ex, &snap);
    let forms = form_rows(&snap);
    let questions = question_rows(&mut ex, &snap);
    let submissions = form_submission_rows(&mut ex, &snap);
    let answers = answer_rows(&mut ex, &snap);

    put(&mut report, services)?;
    put(&mut report, people)?;
    put(&mut report, groups)?;
    put(&mut report, members)?;
    put(&mut report, attendance)?;
    put(&mut report, donations)?;
    put(&mut report, forms)?;
    put(&mut report, questions)?;
    put(&mut report, submissions)?;
    put(&mut report, answers)?;

    let unplaced = snap
        .campuses
        .iter()
        .filter(|c| {
            !snap
                .services
                .iter()
                .any(|s| s.campus_id.as_id() == c.id.as_deref())
        })
        .count();
    if unplaced > 0 {
        log::warn!("{unplaced} campus(es) without services have no table row");
    }

    report.fetched = ex.fetched;
    report.issues = ex.issues;
    log::info!(
        "export complete: {} tables, {} attachments, {} warnings",
        report.rows.len(),
        report.archive.attachment_names().len(),
        report.issues.len()
    );
    Ok(report)
}
