mod test_support;

use serde_json::json;
use test_support::{memory_db, volunteer_record, FakeCrm};
use vmsyncd::sync::volunteer_sync;

// 4500 records at the 2000-row page size: two full pages and a short one.
#[test]
fn volunteer_sync_pages_through_a_large_entity() {
    let crm = FakeCrm::new().route("'Volunteer'", (0..4500).map(volunteer_record).collect());
    let conn = memory_db();

    let result = volunteer_sync(&crm, &conn);
    assert_eq!(result["success"], json!(true));
    assert_eq!(result["volunteer_success"], json!(4500));
    assert_eq!(result["volunteer_errors"], json!(0));

    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM volunteers", [], |r| r.get(0))
        .expect("count");
    assert_eq!(rows, 4500);

    let distinct: i64 = conn
        .query_row(
            "SELECT COUNT(DISTINCT external_id) FROM volunteers",
            [],
            |r| r.get(0),
        )
        .expect("distinct count");
    assert_eq!(distinct, 4500);
}
