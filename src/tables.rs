//! Flat archive tables.
//!
//! Each table is a header-first CSV file. Every column is read as text; the
//! parser stage turns text into typed values and reports what it could not
//! use. Columns may appear in any order and optional columns may be absent.

use crate::error::Result;
use crate::import::Issue;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub trait TableRow: Serialize + DeserializeOwned + Default {
    const FILE: &'static str;
    /// Header written on export; matches the struct's field order.
    const COLUMNS: &'static [&'static str];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceRow {
    pub import_key: String,
    pub campus: String,
    pub service: String,
    pub time: String,
}

impl TableRow for ServiceRow {
    const FILE: &'static str = "services.csv";
    const COLUMNS: &'static [&'static str] = &["importKey", "campus", "service", "time"];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeopleRow {
    pub import_key: String,
    pub household_key: String,
    pub household_name: String,
    pub household_role: String,
    pub last_name: String,
    pub first_name: String,
    pub middle_name: String,
    pub nick_name: String,
    pub prefix: String,
    pub suffix: String,
    pub birth_date: String,
    pub gender: String,
    pub marital_status: String,
    pub membership_status: String,
    pub home_phone: String,
    pub mobile_phone: String,
    pub work_phone: String,
    pub email: String,
    pub address1: String,
    pub address2: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub photo: String,
}

impl TableRow for PeopleRow {
    const FILE: &'static str = "people.csv";
    const COLUMNS: &'static [&'static str] = &[
        "importKey",
        "householdKey",
        "householdName",
        "householdRole",
        "lastName",
        "firstName",
        "middleName",
        "nickName",
        "prefix",
        "suffix",
        "birthDate",
        "gender",
        "maritalStatus",
        "membershipStatus",
        "homePhone",
        "mobilePhone",
        "workPhone",
        "email",
        "address1",
        "address2",
        "city",
        "state",
        "zip",
        "photo",
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupRow {
    pub import_key: String,
    pub service_time_key: String,
    pub category_name: String,
    pub name: String,
    pub track_attendance: String,
    pub parent_pickup: String,
}

impl TableRow for GroupRow {
    const FILE: &'static str = "groups.csv";
    const COLUMNS: &'static [&'static str] = &[
        "importKey",
        "serviceTimeKey",
        "categoryName",
        "name",
        "trackAttendance",
        "parentPickup",
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupMemberRow {
    pub group_key: String,
    pub person_key: String,
}

impl TableRow for GroupMemberRow {
    const FILE: &'static str = "groupmembers.csv";
    const COLUMNS: &'static [&'static str] = &["groupKey", "personKey"];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttendanceRow {
    pub date: String,
    pub service_time_key: String,
    pub group_key: String,
    pub person_key: String,
}

impl TableRow for AttendanceRow {
    const FILE: &'static str = "attendance.csv";
    const COLUMNS: &'static [&'static str] = &["date", "serviceTimeKey", "groupKey", "personKey"];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DonationRow {
    pub donation_key: String,
    pub batch: String,
    pub date: String,
    pub person_key: String,
    pub method: String,
    pub method_details: String,
    pub amount: String,
    pub fund: String,
    pub notes: String,
}

impl TableRow for DonationRow {
    const FILE: &'static str = "donations.csv";
    const COLUMNS: &'static [&'static str] = &[
        "donationKey",
        "batch",
        "date",
        "personKey",
        "method",
        "methodDetails",
        "amount",
        "fund",
        "notes",
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormRow {
    pub import_key: String,
    pub name: String,
    pub content_type: String,
}

impl TableRow for FormRow {
    const FILE: &'static str = "forms.csv";
    const COLUMNS: &'static [&'static str] = &["importKey", "name", "contentType"];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuestionRow {
    pub import_key: String,
    pub form_key: String,
    pub title: String,
    pub field_type: String,
    pub placeholder: String,
    pub description: String,
    pub choices: String,
    pub sort: String,
}

impl TableRow for QuestionRow {
    const FILE: &'static str = "questions.csv";
    const COLUMNS: &'static [&'static str] = &[
        "importKey",
        "formKey",
        "title",
        "fieldType",
        "placeholder",
        "description",
        "choices",
        "sort",
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormSubmissionRow {
    pub import_key: String,
    pub form_key: String,
    pub content_type: String,
    pub content_key: String,
    pub submission_date: String,
}

impl TableRow for FormSubmissionRow {
    const FILE: &'static str = "formSubmissions.csv";
    const COLUMNS: &'static [&'static str] = &[
        "importKey",
        "formKey",
        "contentType",
        "contentKey",
        "submissionDate",
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnswerRow {
    pub question_key: String,
    pub form_submission_key: String,
    pub value: String,
}

impl TableRow for AnswerRow {
    const FILE: &'static str = "answers.csv";
    const COLUMNS: &'static [&'static str] = &["questionKey", "formSubmissionKey", "value"];
}

/// File names of every table an archive may carry.
pub const TABLE_FILES: [&str; 10] = [
    ServiceRow::FILE,
    PeopleRow::FILE,
    GroupRow::FILE,
    GroupMemberRow::FILE,
    AttendanceRow::FILE,
    DonationRow::FILE,
    FormRow::FILE,
    QuestionRow::FILE,
    FormSubmissionRow::FILE,
    AnswerRow::FILE,
];

pub fn write_table<R: TableRow>(rows: &[R]) -> Result<String> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    wtr.write_record(R::COLUMNS)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read a table, returning rows with their 1-based line numbers. Records that
/// cannot be read (wrong column count, bad quoting) are reported and skipped.
pub fn read_table<R: TableRow>(text: &str) -> (Vec<(u64, R)>, Vec<Issue>) {
    let mut rows = Vec::new();
    let mut issues = Vec::new();
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.trim_start_matches('\u{feff}').as_bytes());
    let headers = match rdr.headers() {
        Ok(h) => h.clone(),
        Err(e) => {
            issues.push(Issue::warning(R::FILE, Some(1), "bad_header", e.to_string()));
            return (rows, issues);
        }
    };

    let mut record = csv::StringRecord::new();
    loop {
        match rdr.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                let line = record.position().map(|p| p.line()).unwrap_or(0);
                if record.iter().all(|f| f.is_empty()) {
                    continue;
                }
                match record.deserialize::<R>(Some(&headers)) {
                    Ok(row) => rows.push((line, row)),
                    Err(e) => issues.push(Issue::warning(
                        R::FILE,
                        Some(line),
                        "bad_row",
                        e.to_string(),
                    )),
                }
            }
            Err(e) => {
                let line = e.position().map(|p| p.line());
                let code = match e.kind() {
                    csv::ErrorKind::UnequalLengths { .. } => "bad_columns",
                    csv::ErrorKind::Utf8 { .. } => "bad_encoding",
                    _ => "bad_row",
                };
                let fatal = matches!(e.kind(), csv::ErrorKind::Io(_));
                issues.push(Issue::warning(R::FILE, line, code, e.to_string()));
                if fatal {
                    break;
                }
            }
        }
    }
    (rows, issues)
}

pub fn opt(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// `None` for a blank cell; `Some(Err)` for text that is not a date.
pub fn parse_date(s: &str) -> Option<std::result::Result<NaiveDate, String>> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    // Date-times are accepted by their date part.
    let day = t.split(['T', ' ']).next().unwrap_or(t);
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(day, fmt) {
            return Some(Ok(d));
        }
    }
    Some(Err(format!("unrecognised date {t:?}")))
}

pub fn parse_amount(s: &str) -> Option<std::result::Result<f64, String>> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    let cleaned: String = t.chars().filter(|c| *c != '$' && *c != ',').collect();
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(Ok(v)),
        _ => Some(Err(format!("unrecognised amount {t:?}"))),
    }
}

pub fn parse_flag(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y"
    )
}

pub fn format_date(d: &NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub fn format_amount(v: f64) -> String {
    format!("{v:.2}")
}
