use flockport::archive::{read_archive, write_archive, Archive, ARCHIVE_FORMAT_V1};
use flockport::config::MigrateConfig;
use flockport::export::export_store;
use flockport::import::{commit, parse_archive, CancelToken, ImportContext};
use flockport::import::parse::DEFAULT_CAMPUS;
use flockport::model::EntityType;
use flockport::progress::ProgressTracker;
use flockport::store::{MemoryStore, SqliteStore, Store};
use serde_json::json;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn sample_archive() -> Archive {
    let mut a = Archive::default();
    a.insert_table(
        "services.csv",
        "importKey,campus,service,time\n\
         10,Main,Sunday,9:00 AM\n\
         11,Main,Sunday,11:00 AM\n\
         ,North,Saturday,\n"
            .into(),
    );
    a.insert_table(
        "people.csv",
        "importKey,householdKey,householdName,lastName,firstName,birthDate,email,photo\n\
         p1,h1,Smith Family,Smith,John,1980-05-01,john@example.com,john.png\n\
         p2,h1,Smith Family,Smith,Jane,,,\n\
         p3,,,Jones,Ann,,,\n"
            .into(),
    );
    a.insert_table(
        "groups.csv",
        "importKey,serviceTimeKey,categoryName,name,trackAttendance,parentPickup\n\
         g1,10,Kids,Nursery,true,true\n\
         g2,,Adults,Choir,false,false\n"
            .into(),
    );
    a.insert_table("groupmembers.csv", "groupKey,personKey\ng1,p3\ng2,p1\n".into());
    a.insert_table(
        "attendance.csv",
        "date,serviceTimeKey,groupKey,personKey\n\
         2024-01-07,10,g1,p3\n\
         2024-01-07,10,g1,p2\n\
         2024-01-14,,,p1\n"
            .into(),
    );
    a.insert_table(
        "donations.csv",
        "donationKey,batch,date,personKey,method,methodDetails,amount,fund,notes\n\
         d1,General Fund Drive,2024-01-07,p1,Check,1001,50.00,Missions,\n\
         d1,General Fund Drive,2024-01-07,p1,Check,1001,25.00,Building,\n\
         ,General Fund Drive,2024-01-14,,Cash,,75.00,Missions,\n"
            .into(),
    );
    a.insert_table("forms.csv", "importKey,name,contentType\nf1,Visitor Card,person\n".into());
    a.insert_table(
        "questions.csv",
        "importKey,formKey,title,fieldType,placeholder,description,choices,sort\n\
         q1,f1,How did you hear about us?,text,,,,1\n"
            .into(),
    );
    a.insert_table(
        "formSubmissions.csv",
        "importKey,formKey,contentType,contentKey,submissionDate\ns1,f1,person,p3,2024-01-07\n"
            .into(),
    );
    a.insert_table(
        "answers.csv",
        "questionKey,formSubmissionKey,value\nq1,s1,A friend\n".into(),
    );
    a.insert_attachment("john.png", vec![0x89, b'P', b'N', b'G']);
    a
}

fn import_into(store: &dyn Store, archive: &Archive) -> ImportContext {
    let ctx = parse_archive(archive);
    assert_eq!(ctx.errors().count(), 0, "parse errors: {:?}", ctx.issues);
    commit(
        &ctx,
        store,
        &MigrateConfig::default(),
        &ProgressTracker::for_import(),
        &CancelToken::new(),
    )
    .expect("commit");
    ctx
}

fn names(ctx: &ImportContext) -> (BTreeSet<String>, BTreeSet<String>, BTreeSet<String>) {
    let people = ctx
        .people
        .iter()
        .map(|p| format!("{}, {}", p.last_name, p.first_name))
        .collect();
    let groups = ctx.groups.iter().map(|g| g.name.clone()).collect();
    let funds = ctx.funds.iter().map(|f| f.name.clone()).collect();
    (people, groups, funds)
}

#[test]
fn sample_archive_parses_to_expected_collections() {
    let ctx = parse_archive(&sample_archive());
    let counts = ctx.counts();
    let expect = [
        ("campuses", 2),
        ("services", 2),
        ("serviceTimes", 2),
        ("households", 2),
        ("people", 3),
        ("groups", 2),
        ("groupServiceTimes", 1),
        ("groupMembers", 2),
        ("sessions", 1),
        ("visits", 3),
        ("visitSessions", 2),
        ("funds", 2),
        ("donationBatches", 1),
        ("donations", 2),
        ("fundDonations", 3),
        ("forms", 1),
        ("questions", 1),
        ("formSubmissions", 1),
        ("answers", 1),
    ];
    for (step, n) in expect {
        assert_eq!(counts.get(step), Some(&n), "count for {step}");
    }
    assert_eq!(ctx.photos.len(), 1);
    assert_eq!(ctx.issues, vec![]);
}

#[test]
fn export_then_import_is_identity_under_natural_keys() {
    let first = MemoryStore::new();
    let ctx1 = import_into(&first, &sample_archive());

    let exported = export_store(&first).expect("export");
    assert!(exported.issues.is_empty(), "{:?}", exported.issues);
    assert_eq!(exported.archive.attachment_names().len(), 1);

    let second = MemoryStore::new();
    let ctx2 = import_into(&second, &exported.archive);

    assert_eq!(ctx1.counts(), ctx2.counts());
    assert_eq!(names(&ctx1), names(&ctx2));
    for kind in EntityType::ALL {
        assert_eq!(first.count(kind), second.count(kind), "store count for {kind}");
    }

    let mut amounts: Vec<f64> = ctx2.donations.iter().map(|d| d.amount).collect();
    amounts.sort_by(|a, b| a.total_cmp(b));
    assert_eq!(amounts, vec![75.0, 75.0]);

    let john = second
        .records(EntityType::Person)
        .into_iter()
        .find(|p| p["firstName"] == "John")
        .expect("john");
    let john_id = john["id"].as_str().expect("id");
    assert_eq!(second.photo(john_id), Some(vec![0x89, b'P', b'N', b'G']));
}

#[test]
fn committed_references_point_at_real_ids() {
    let store = MemoryStore::new();
    import_into(&store, &sample_archive());

    for kind in EntityType::ALL {
        for doc in store.records(kind) {
            for r in kind.references() {
                let value = &doc[r.field];
                if value.is_null() {
                    assert!(!r.required, "{kind}.{} is required but null", r.field);
                    continue;
                }
                let id = value.as_str().expect("string id");
                let found = store
                    .records(r.target)
                    .iter()
                    .any(|t| t["id"].as_str() == Some(id));
                assert!(found, "{kind}.{} = {id} does not exist in {}", r.field, r.target);
            }
        }
    }
}

#[test]
fn zip_archive_round_trip_keeps_tables_photos_and_fingerprint() {
    let dir = temp_dir("flockport-archive-zip");
    let path = dir.join("export.zip");
    let archive = sample_archive();

    let summary = write_archive(&archive, &path).expect("write archive");
    assert_eq!(summary.format, ARCHIVE_FORMAT_V1);
    assert_eq!(summary.entry_count, 1 + 10 + 1);

    let f = File::open(&path).expect("open zip");
    let mut zip = zip::ZipArchive::new(f).expect("zip");
    let mut manifest = String::new();
    zip.by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("manifest json");
    assert_eq!(manifest["format"], ARCHIVE_FORMAT_V1);
    assert_eq!(manifest["fingerprint"], summary.fingerprint);

    let back = read_archive(&path).expect("read archive");
    assert_eq!(back.fingerprint(), archive.fingerprint());
    assert_eq!(back.table("people.csv"), archive.table("people.csv"));
    assert_eq!(back.attachment("john.png"), archive.attachment("john.png"));

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn hand_built_zip_without_manifest_is_accepted() {
    let dir = temp_dir("flockport-archive-plain");
    let path = dir.join("plain.zip");
    {
        use std::io::Write;
        let f = File::create(&path).expect("create zip");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("export/People.csv", opts).expect("start");
        zip.write_all(b"lastName,firstName\nSmith,John\n").expect("write");
        zip.start_file("export/songs.csv", opts).expect("start");
        zip.write_all(b"title\nAmazing Grace\n").expect("write");
        zip.finish().expect("finish");
    }

    let archive = read_archive(&path).expect("read");
    assert_eq!(archive.table_names(), vec!["people.csv"]);
    let ctx = parse_archive(&archive);
    assert_eq!(ctx.people.len(), 1);
    assert_eq!(ctx.households.len(), 1);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn service_with_missing_campus_still_reimports() {
    let store = MemoryStore::new();
    store.seed(EntityType::Campus, "c1", json!({ "name": "Main" }));
    store.seed(EntityType::Service, "s1", json!({ "campusId": "c1", "name": "Sunday" }));
    store.seed(EntityType::Service, "s2", json!({ "campusId": "GONE", "name": "Saturday" }));
    store.seed(EntityType::ServiceTime, "t1", json!({ "serviceId": "s1", "name": "9am" }));
    store.seed(EntityType::ServiceTime, "t2", json!({ "serviceId": "s2", "name": "5pm" }));
    store.seed(EntityType::Group, "g1", json!({ "name": "Choir" }));
    store.seed(
        EntityType::GroupServiceTime,
        "gst1",
        json!({ "groupId": "g1", "serviceTimeId": "t2" }),
    );

    let exported = export_store(&store).expect("export");
    assert!(!exported.issues.is_empty());
    assert!(exported
        .issues
        .iter()
        .all(|i| i.code == "dangling_reference" && i.field.as_deref() == Some("campusId")));

    let target = MemoryStore::new();
    let ctx = import_into(&target, &exported.archive);
    assert_eq!(ctx.service_times.len(), 2);
    assert_eq!(ctx.group_service_times.len(), 1);
    assert!(ctx.campuses.iter().any(|c| c.name == DEFAULT_CAMPUS));

    let saturday = target
        .records(EntityType::Service)
        .into_iter()
        .find(|s| s["name"] == "Saturday")
        .expect("saturday service");
    let placeholder = target
        .records(EntityType::Campus)
        .into_iter()
        .find(|c| c["name"] == DEFAULT_CAMPUS)
        .expect("placeholder campus");
    assert_eq!(saturday["campusId"], placeholder["id"]);
    assert_eq!(target.count(EntityType::GroupServiceTime), 1);
}

#[test]
fn sqlite_workspace_store_round_trips() {
    let dir = temp_dir("flockport-sqlite-rt");
    let store = SqliteStore::open(&dir).expect("open store");
    let ctx1 = import_into(&store, &sample_archive());
    drop(store);

    let reopened = SqliteStore::open(&dir).expect("reopen store");
    let exported = export_store(&reopened).expect("export");
    let ctx2 = parse_archive(&exported.archive);
    assert_eq!(ctx1.counts(), ctx2.counts());
    assert_eq!(names(&ctx1), names(&ctx2));
    drop(reopened);

    let _ = std::fs::remove_dir_all(dir);
}
