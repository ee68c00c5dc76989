// 🌱 Bootstrap - First admin view of a user's document
//
// Only valid when the remote document is ABSENT. A remote document that is
// present but empty (everything tombstoned and purged) must go through the
// normal merge, otherwise deleted records would come back.

use tracing::info;

use crate::record::{sort_document, Record};
use crate::rules::promoted;

/// Result of promoting a local document into an absent remote one
#[derive(Debug, Clone, PartialEq)]
pub struct Bootstrap {
    pub records: Vec<Record>,

    /// Records that carried no tag and were given USER_INPUT
    pub tagged: usize,
}

/// Promote every local record into the remote document.
///
/// Tagged records are copied unchanged; untagged ones become USER_INPUT.
/// Tombstones never enter a merge result, so they are skipped.
pub fn bootstrap(local: &[Record]) -> Bootstrap {
    let mut tagged = 0;
    let mut records: Vec<Record> = local
        .iter()
        .filter(|record| !record.is_tombstone())
        .map(|record| {
            if record.status.is_none() {
                tagged += 1;
            }
            promoted(record)
        })
        .collect();

    sort_document(&mut records);

    info!(
        promoted = records.len(),
        tagged, "bootstrapped remote document from local copy"
    );

    Bootstrap { records, tagged }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Payload;
    use crate::status::Status;
    use chrono::NaiveDate;

    fn rec(id: &str, day: u32, status: Option<Status>) -> Record {
        let mut r = Record::new(
            id,
            "alice",
            Payload::new(NaiveDate::from_ymd_opt(2025, 3, day).unwrap(), "W"),
        );
        r.status = status;
        r
    }

    #[test]
    fn test_bootstrap_keeps_all_user_input() {
        let local = vec![
            rec("1", 1, Some(Status::UserInput)),
            rec("2", 2, Some(Status::UserInput)),
            rec("3", 3, Some(Status::UserInput)),
        ];

        let result = bootstrap(&local);
        assert_eq!(result.records, local);
        assert_eq!(result.tagged, 0);
    }

    #[test]
    fn test_bootstrap_tags_only_untagged() {
        let local = vec![rec("1", 1, None), rec("2", 2, Some(Status::UserDone))];

        let result = bootstrap(&local);
        assert_eq!(result.records[0].status, Some(Status::UserInput));
        assert_eq!(result.records[1].status, Some(Status::UserDone));
        assert_eq!(result.tagged, 1);
    }

    #[test]
    fn test_bootstrap_skips_tombstones() {
        let local = vec![rec("1", 1, Some(Status::AdminBlank)), rec("2", 2, None)];
        let result = bootstrap(&local);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].id, "2");
    }
}
