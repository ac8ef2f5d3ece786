use labtopo::history::HistoryStore;
use labtopo::model::Entity;
use labtopo::report::assemble;
use labtopo::TopologyReport;

fn report_with_scan_id(scan_id: &str) -> TopologyReport {
    let mut report = assemble(
        vec!["192.168.1.0/24".to_string()],
        vec![Entity::unknown("192.168.1.10")],
        Vec::new(),
    );
    report.scan_id = scan_id.to_string();
    report
}

#[test]
fn save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::new(dir.path(), 5);

    let report = report_with_scan_id("scan-20260801-120000");
    let path = store.save(&report).unwrap();
    assert!(path.ends_with("scan-20260801-120000.json"));

    let loaded = store.load("scan-20260801-120000").unwrap();
    assert_eq!(loaded.entities, report.entities);
    assert_eq!(loaded.scan_id, report.scan_id);
}

#[test]
fn latest_is_newest_by_scan_id() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::new(dir.path(), 5);

    store.save(&report_with_scan_id("scan-20260801-090000")).unwrap();
    store.save(&report_with_scan_id("scan-20260802-090000")).unwrap();
    store.save(&report_with_scan_id("scan-20260801-230000")).unwrap();

    let latest = store.load_latest().unwrap().unwrap();
    assert_eq!(latest.scan_id, "scan-20260802-090000");
}

#[test]
fn retention_prunes_oldest() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::new(dir.path(), 2);

    store.save(&report_with_scan_id("scan-20260801-090000")).unwrap();
    store.save(&report_with_scan_id("scan-20260801-100000")).unwrap();
    store.save(&report_with_scan_id("scan-20260801-110000")).unwrap();

    let ids = store.list().unwrap();
    assert_eq!(
        ids,
        vec![
            "scan-20260801-110000".to_string(),
            "scan-20260801-100000".to_string()
        ]
    );
}

#[test]
fn empty_store_has_no_latest() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::new(dir.path().join("never-created"), 3);
    assert!(store.list().unwrap().is_empty());
    assert!(store.load_latest().unwrap().is_none());
}
