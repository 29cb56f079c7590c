//! Partitions extended rows into ADD drafts and UPDATE patches against a remote snapshot.
//!
//! Rows sharing an identity key collapse into one group in first-seen order. A group whose key
//! is unknown to the store becomes a draft; a known key becomes a patch built from the stored
//! record, or nothing when the group adds no new information.

use std::collections::HashMap;

use serde::Serialize;
use tgsync_adapters::ImportAdapter;
use tgsync_core::{
    join_remarks, ClientRecordDraft, ClientRecordPatch, ExtendedRow, IdentityKey, Recipient,
    RecipientCandidate, RemoteClientRecord,
};
use tracing::warn;

/// Stored client records keyed by identity key. Read-only once built.
#[derive(Debug, Default, Clone)]
pub struct RemoteSnapshot {
    records: HashMap<IdentityKey, RemoteClientRecord>,
}

impl RemoteSnapshot {
    /// Later records win when the store holds the same key twice.
    pub fn from_records(records: impl IntoIterator<Item = RemoteClientRecord>) -> Self {
        let mut map = HashMap::new();
        for record in records {
            if let Some(previous) = map.insert(record.identity_key.clone(), record) {
                warn!(
                    key = %previous.identity_key,
                    replaced_id = %previous.id,
                    "duplicate identity key in client app"
                );
            }
        }
        Self { records: map }
    }

    pub fn get(&self, key: &IdentityKey) -> Option<&RemoteClientRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub rows: usize,
    pub distinct_keys: usize,
    pub to_add: usize,
    pub to_update: usize,
    /// Known keys that brought nothing new.
    pub unchanged: usize,
    pub appended_recipients: usize,
    pub suppressed_recipients: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    pub to_add: Vec<ClientRecordDraft>,
    pub to_update: Vec<ClientRecordPatch>,
    pub stats: ReconcileStats,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty()
    }
}

/// Rows of one identity key, reduced to what reconciliation needs.
#[derive(Debug)]
struct KeyGroup<'a> {
    first: &'a ExtendedRow,
    remark: String,
    recipients: Vec<RecipientCandidate>,
}

impl KeyGroup<'_> {
    fn absorb_recipient(&mut self, candidate: Option<&RecipientCandidate>) {
        if let Some(candidate) = candidate {
            if !self.recipients.iter().any(|r| r.key == candidate.key) {
                self.recipients.push(candidate.clone());
            }
        }
    }
}

/// Insertion-ordered map from identity key to its group.
#[derive(Debug, Default)]
struct GroupIndex<'a> {
    index: HashMap<IdentityKey, usize>,
    groups: Vec<KeyGroup<'a>>,
}

impl<'a> GroupIndex<'a> {
    fn collect(rows: &'a [ExtendedRow]) -> Self {
        let mut this = Self::default();
        for row in rows {
            match this.index.get(&row.key).copied() {
                Some(slot) => {
                    let group = &mut this.groups[slot];
                    group.remark = join_remarks(&group.remark, &row.remark);
                    group.absorb_recipient(row.recipient.as_ref());
                }
                None => {
                    let mut group = KeyGroup {
                        first: row,
                        remark: row.remark.clone(),
                        recipients: Vec::new(),
                    };
                    group.absorb_recipient(row.recipient.as_ref());
                    this.index.insert(row.key.clone(), this.groups.len());
                    this.groups.push(group);
                }
            }
        }
        this
    }
}

pub struct ReconcileEngine<'a> {
    adapter: &'a dyn ImportAdapter,
}

impl<'a> ReconcileEngine<'a> {
    pub fn new(adapter: &'a dyn ImportAdapter) -> Self {
        Self { adapter }
    }

    pub fn reconcile(&self, rows: &[ExtendedRow], snapshot: &RemoteSnapshot) -> Reconciliation {
        let groups = GroupIndex::collect(rows);
        let mut out = Reconciliation {
            stats: ReconcileStats {
                rows: rows.len(),
                distinct_keys: groups.groups.len(),
                ..ReconcileStats::default()
            },
            ..Reconciliation::default()
        };

        for group in &groups.groups {
            match snapshot.get(&group.first.key) {
                None => out.to_add.push(self.adapter.draft(
                    group.first,
                    &group.remark,
                    &group.recipients,
                )),
                Some(existing) => match self.patch(group, existing, &mut out.stats) {
                    Some(patch) => out.to_update.push(patch),
                    None => out.stats.unchanged += 1,
                },
            }
        }

        out.stats.to_add = out.to_add.len();
        out.stats.to_update = out.to_update.len();
        out
    }

    fn patch(
        &self,
        group: &KeyGroup<'_>,
        existing: &RemoteClientRecord,
        stats: &mut ReconcileStats,
    ) -> Option<ClientRecordPatch> {
        let appended = if self.adapter.tracks_recipients() {
            let (fresh, suppressed) = new_recipients(&group.recipients, &existing.recipients);
            stats.suppressed_recipients += suppressed;
            stats.appended_recipients += fresh.len();
            fresh
        } else {
            Vec::new()
        };

        if group.remark.is_empty() && appended.is_empty() {
            return None;
        }

        let remark = (!group.remark.is_empty()).then(|| {
            let merged = self
                .adapter
                .remark_order()
                .merge(&existing.remark, &group.remark);
            self.adapter.finish_update_remark(merged)
        });
        let recipients = (!appended.is_empty()).then(|| {
            let mut table = existing.recipients.clone();
            table.extend(appended);
            table
        });

        Some(ClientRecordPatch {
            id: existing.id.clone(),
            remark_field: self.adapter.remark_field(),
            remark,
            recipients,
        })
    }
}

/// Candidates whose key matches no stored entry, plus the number suppressed.
fn new_recipients(
    candidates: &[RecipientCandidate],
    stored: &[Recipient],
) -> (Vec<Recipient>, usize) {
    let mut fresh = Vec::new();
    let mut suppressed = 0;
    for candidate in candidates {
        if stored.iter().any(|entry| entry.identity_key() == candidate.key) {
            suppressed += 1;
        } else {
            fresh.push(candidate.entry.clone());
        }
    }
    (fresh, suppressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgsync_adapters::{ClientImportAdapter, OrderImportAdapter, CLIENT_SCHEMA, ORDER_SCHEMA};
    use tgsync_core::{Address, RawRow, RemarkField};

    fn client_row(name: &str, remark: &str) -> ExtendedRow {
        ClientImportAdapter.extend_row(
            RawRow::from_pairs(
                CLIENT_SCHEMA,
                [
                    ("名前", name),
                    ("【電話番号】", "0312345678"),
                    ("都道府県", "東京都"),
                    ("備考", remark),
                ],
            ),
            &[],
        )
    }

    fn order_row(order_id: &str, recipient: &str) -> ExtendedRow {
        OrderImportAdapter.extend_row(
            RawRow::from_pairs(
                ORDER_SCHEMA,
                [
                    ("受注ID", order_id),
                    ("受注日時", "2025/04/01"),
                    ("注文者氏名", "山田太郎"),
                    ("注文者電話番号", "0312345678"),
                    ("注文者都道府県", "東京都"),
                    ("送付先氏名", recipient),
                    ("送付先電話番号", "0901111222"),
                    ("送付先都道府県", "大阪府"),
                ],
            ),
            &[],
        )
    }

    fn stored(key: &IdentityKey, remark: &str, recipients: Vec<Recipient>) -> RemoteSnapshot {
        RemoteSnapshot::from_records([RemoteClientRecord {
            id: "100".into(),
            identity_key: key.clone(),
            remark: remark.into(),
            recipients,
        }])
    }

    fn recipient(name: &str) -> Recipient {
        Recipient {
            row_id: Some("1".into()),
            name: name.into(),
            phone_number: "0901111222".into(),
            postal_code: String::new(),
            address: Address::new("大阪府", "", "", ""),
        }
    }

    #[test]
    fn rows_sharing_a_key_collapse_into_one_draft() {
        let rows = vec![client_row("山田太郎", "A"), client_row("山田 太郎", "B")];
        let result =
            ReconcileEngine::new(&ClientImportAdapter).reconcile(&rows, &RemoteSnapshot::default());

        assert_eq!(result.to_add.len(), 1);
        assert_eq!(result.to_add[0].remark, "A\nB");
        assert_eq!(result.stats.rows, 2);
        assert_eq!(result.stats.distinct_keys, 1);
    }

    #[test]
    fn client_update_keeps_existing_remark_first() {
        let rows = vec![client_row("山田太郎", "NEW")];
        let snapshot = stored(&rows[0].key, "OLD", vec![]);
        let result = ReconcileEngine::new(&ClientImportAdapter).reconcile(&rows, &snapshot);

        assert!(result.to_add.is_empty());
        let patch = &result.to_update[0];
        assert_eq!(patch.id, "100");
        assert_eq!(patch.remark_field, RemarkField::TatenpoGuide);
        assert_eq!(patch.remark.as_deref(), Some("OLD\nNEW"));
        assert_eq!(patch.recipients, None);
    }

    #[test]
    fn client_update_without_new_remark_is_dropped() {
        let rows = vec![client_row("山田太郎", "")];
        let snapshot = stored(&rows[0].key, "OLD", vec![]);
        let result = ReconcileEngine::new(&ClientImportAdapter).reconcile(&rows, &snapshot);

        assert!(result.is_empty());
        assert_eq!(result.stats.unchanged, 1);
    }

    #[test]
    fn order_update_puts_new_remarks_first_and_appends_new_recipient() {
        let rows = vec![order_row("A-1", "佐藤花子"), order_row("A-2", "鈴木一郎")];
        let snapshot = stored(&rows[0].key, "OLD", vec![recipient("佐藤花子")]);
        let result = ReconcileEngine::new(&OrderImportAdapter).reconcile(&rows, &snapshot);

        let patch = &result.to_update[0];
        assert_eq!(patch.remark_field, RemarkField::General);
        assert_eq!(
            patch.remark.as_deref(),
            Some("A-1, 2025/04/01\nA-2, 2025/04/01\nOLD")
        );
        let table = patch.recipients.as_ref().expect("recipients");
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].row_id.as_deref(), Some("1"));
        assert_eq!(table[1].name, "鈴木一郎");
        assert_eq!(table[1].row_id, None);
        assert_eq!(result.stats.suppressed_recipients, 1);
        assert_eq!(result.stats.appended_recipients, 1);
    }

    #[test]
    fn known_recipient_is_not_appended() {
        let rows = vec![order_row("A-1", "佐藤 花子")];
        let snapshot = stored(&rows[0].key, "", vec![recipient("佐藤花子")]);
        let result = ReconcileEngine::new(&OrderImportAdapter).reconcile(&rows, &snapshot);

        let patch = &result.to_update[0];
        assert_eq!(patch.remark.as_deref(), Some("A-1, 2025/04/01"));
        assert_eq!(patch.recipients, None);
    }

    #[test]
    fn order_draft_lists_each_distinct_recipient_once() {
        let rows = vec![
            order_row("A-1", "佐藤花子"),
            order_row("A-2", "鈴木一郎"),
            order_row("A-3", "佐藤花子"),
        ];
        let result =
            ReconcileEngine::new(&OrderImportAdapter).reconcile(&rows, &RemoteSnapshot::default());

        let draft = &result.to_add[0];
        let names: Vec<&str> = draft.recipients.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["佐藤花子", "鈴木一郎"]);
        assert_eq!(draft.remark.lines().count(), 3);
    }

    #[test]
    fn snapshot_is_left_untouched() {
        let rows = vec![order_row("A-1", "鈴木一郎")];
        let snapshot = stored(&rows[0].key, "OLD", vec![recipient("佐藤花子")]);
        let before = snapshot.get(&rows[0].key).cloned();
        let _ = ReconcileEngine::new(&OrderImportAdapter).reconcile(&rows, &snapshot);
        assert_eq!(snapshot.get(&rows[0].key).cloned(), before);
    }

    #[test]
    fn duplicate_snapshot_keys_keep_the_last_record() {
        let key = IdentityKey::from_stored("k");
        let record = |id: &str| RemoteClientRecord {
            id: id.into(),
            identity_key: key.clone(),
            remark: String::new(),
            recipients: vec![],
        };
        let snapshot = RemoteSnapshot::from_records([record("1"), record("2")]);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(&key).map(|r| r.id.as_str()), Some("2"));
    }
}
