use flockport::archive::Archive;
use flockport::config::MigrateConfig;
use flockport::import::{commit, parse_archive, CancelToken, ImportContext};
use flockport::model::EntityType;
use flockport::progress::ProgressTracker;
use flockport::store::MemoryStore;

fn archive_with(tables: &[(&str, &str)]) -> Archive {
    let mut a = Archive::default();
    for (name, text) in tables {
        a.insert_table(name, text.to_string());
    }
    a
}

const SERVICES: &str = "importKey,campus,service,time\n10,Main,Sunday,9:00\n11,North,Sunday,10:00\n";
const GROUPS: &str = "importKey,serviceTimeKey,name\ng1,10,Nursery\ng1,11,Nursery\ng2,,Choir\n";
const DONATIONS: &str = "batch,date,amount,fund\n\
                         January,2024-01-07,10.00,Missions\n\
                         February,2024-02-04,20.00,Building\n";

fn shared_sizes(ctx: &ImportContext) -> [usize; 4] {
    [
        ctx.len(EntityType::Campus),
        ctx.len(EntityType::Fund),
        ctx.len(EntityType::DonationBatch),
        ctx.len(EntityType::Group),
    ]
}

#[test]
fn duplicate_rows_do_not_grow_shared_collections() {
    let base = parse_archive(&archive_with(&[
        ("services.csv", SERVICES),
        ("groups.csv", GROUPS),
        ("donations.csv", DONATIONS),
    ]));

    let services = format!("{SERVICES}11, north ,SUNDAY,10:00\n");
    let groups = format!("{GROUPS}g2,,Choir\n");
    let donations = format!("{DONATIONS}january,2024-01-21,5.00, missions\n");
    let with_dupes = parse_archive(&archive_with(&[
        ("services.csv", &services),
        ("groups.csv", &groups),
        ("donations.csv", &donations),
    ]));

    assert_eq!(shared_sizes(&base), [2, 2, 2, 2]);
    assert_eq!(shared_sizes(&base), shared_sizes(&with_dupes));
    assert_eq!(with_dupes.len(EntityType::Donation), 3);
    assert_eq!(with_dupes.errors().count(), 0);
}

#[test]
fn drive_donations_commit_to_one_batch_and_fund() {
    let ctx = parse_archive(&archive_with(&[(
        "donations.csv",
        "batch,date,amount,fund\n\
         General Fund Drive,2024-01-07,50.00,Missions\n\
         General Fund Drive,2024-01-14,75.00,Missions\n",
    )]));
    let store = MemoryStore::new();
    commit(
        &ctx,
        &store,
        &MigrateConfig::default(),
        &ProgressTracker::for_import(),
        &CancelToken::new(),
    )
    .expect("commit");

    assert_eq!(store.count(EntityType::DonationBatch), 1);
    assert_eq!(store.count(EntityType::Fund), 1);
    let donations = store.records(EntityType::Donation);
    assert_eq!(donations.len(), 2);
    let batch = &store.records(EntityType::DonationBatch)[0];
    assert_eq!(batch["name"], "General Fund Drive");
    assert_eq!(batch["batchDate"], "2024-01-07");

    let fund_donations = store.records(EntityType::FundDonation);
    assert_eq!(fund_donations.len(), 2);
    for fd in &fund_donations {
        let donation = donations
            .iter()
            .find(|d| d["id"] == fd["donationId"])
            .expect("donation for fund donation");
        assert_eq!(fd["amount"], donation["amount"]);
        assert_eq!(donation["batchId"], batch["id"]);
    }
    let mut amounts: Vec<f64> = donations
        .iter()
        .map(|d| d["amount"].as_f64().expect("amount"))
        .collect();
    amounts.sort_by(|a, b| a.total_cmp(b));
    assert_eq!(amounts, vec![50.0, 75.0]);
}

#[test]
fn blank_last_name_rows_leave_no_key_gap() {
    let ctx = parse_archive(&archive_with(&[(
        "people.csv",
        "importKey,lastName,firstName\na,Smith,John\nb,,Ghost\nc,Jones,Ann\n",
    )]));
    let keys: Vec<&str> = ctx.people.iter().map(|p| p.import_key.as_str()).collect();
    assert_eq!(keys, vec!["1", "2"]);
    let warnings: Vec<_> = ctx.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code, "blank_row");
    assert_eq!(warnings[0].line, Some(3));
}
