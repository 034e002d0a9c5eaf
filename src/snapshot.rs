use crate::action::DocAction;
use crate::apply::apply_action;
use crate::cell::{CellValue, RowId};
use crate::error::RowgateError;
use crate::provider::StoreFetcher;
use crate::table::{TableData, TableQuery};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Before/after image of one mutation's target table, restricted to the rows
/// the bundle touches.
#[derive(Debug, Clone)]
pub struct SnapshotStep {
    pub table_id: String,
    pub before: TableData,
    pub after: TableData,
}

/// One snapshot step per mutation of the bundle, in bundle order.
#[derive(Debug, Clone, Default)]
pub struct RowSnapshotBundle {
    pub steps: Vec<SnapshotStep>,
}

/// The broadcast in flight: the applied forward log, its undo log, and a
/// lazily-built snapshot bundle shared by every recipient. The cell has
/// classical once semantics: exactly one builder runs, all waiters observe
/// the same result, and a failed or cancelled build leaves it reusable.
#[derive(Clone)]
pub(crate) struct Broadcast {
    forward: Arc<Vec<DocAction>>,
    undo: Arc<Vec<DocAction>>,
    cell: Arc<OnceCell<Arc<RowSnapshotBundle>>>,
}

impl Broadcast {
    pub fn new(forward: Vec<DocAction>, undo: Vec<DocAction>) -> Self {
        Self {
            forward: Arc::new(forward),
            undo: Arc::new(undo),
            cell: Arc::new(OnceCell::new()),
        }
    }

    pub async fn snapshots(
        &self,
        fetcher: &dyn StoreFetcher,
    ) -> Result<Arc<RowSnapshotBundle>, RowgateError> {
        self.cell
            .get_or_try_init(|| build_bundle(fetcher, &self.forward, &self.undo))
            .await
            .cloned()
    }
}

/// Reconstructs per-mutation row snapshots. The authoritative store already
/// holds the post-bundle state, so: fetch exactly the touched rows, roll them
/// back through the undo log, then replay the forward log capturing an image
/// immediately before and after each action.
async fn build_bundle(
    fetcher: &dyn StoreFetcher,
    forward: &[DocAction],
    undo: &[DocAction],
) -> Result<Arc<RowSnapshotBundle>, RowgateError> {
    let mut touched: BTreeMap<String, BTreeSet<RowId>> = BTreeMap::new();
    for action in undo {
        if action.is_record_shaped() {
            touched
                .entry(action.table_id().to_string())
                .or_default()
                .extend(action.row_ids());
        }
    }

    let mut tables: BTreeMap<String, TableData> = BTreeMap::new();
    for (table_id, row_ids) in &touched {
        let values: Vec<CellValue> = row_ids.iter().map(|id| CellValue::Int(*id)).collect();
        let data = fetcher
            .fetch_table(&TableQuery::filtered(table_id, "id", values))
            .await?;
        tables.insert(table_id.clone(), data);
    }

    for action in undo.iter().rev() {
        apply_action(&mut tables, action);
    }

    let mut steps = Vec::with_capacity(forward.len());
    for action in forward {
        let target = action.table_id().to_string();
        let before = tables
            .get(&target)
            .cloned()
            .unwrap_or_else(|| TableData::new(&target));
        apply_action(&mut tables, action);
        let resulting = action.resulting_table_id();
        let after = tables
            .get(resulting)
            .cloned()
            .unwrap_or_else(|| TableData::new(resulting));
        steps.push(SnapshotStep {
            table_id: target,
            before,
            after,
        });
    }
    Ok(Arc::new(RowSnapshotBundle { steps }))
}

#[cfg(test)]
mod tests {
    use super::Broadcast;
    use crate::action::DocAction;
    use crate::cell::CellValue;
    use crate::error::RowgateError;
    use crate::provider::StoreFetcher;
    use crate::table::{TableData, TableQuery};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store holding the post-bundle state, counting fetches.
    struct PostStore {
        table: TableData,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl StoreFetcher for PostStore {
        async fn fetch_table(&self, query: &TableQuery) -> Result<TableData, RowgateError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut out = TableData::new(&query.table_id);
            out.columns = self
                .table
                .columns
                .keys()
                .map(|c| (c.clone(), Vec::new()))
                .collect();
            let wanted = query.filters.get("id").cloned().unwrap_or_default();
            for row in 0..self.table.len() {
                let id = self.table.row_ids[row];
                if !wanted.is_empty() && !wanted.contains(&CellValue::Int(id)) {
                    continue;
                }
                out.row_ids.push(id);
                for (col, values) in &self.table.columns {
                    let dst = out.columns.get_mut(col).unwrap();
                    dst.push(values[row].clone());
                }
            }
            Ok(out)
        }
    }

    fn post_state() -> TableData {
        // Post-bundle: row 2's owner was updated from alice to bob.
        let mut t = TableData::new("Leads");
        t.row_ids = vec![2];
        t.columns
            .insert("owner".into(), vec![CellValue::text("bob")]);
        t
    }

    #[tokio::test]
    async fn rollback_and_replay_capture_both_sides() {
        let store = PostStore {
            table: post_state(),
            fetches: AtomicUsize::new(0),
        };
        let forward = vec![DocAction::UpdateRecord {
            table_id: "Leads".into(),
            row_id: 2,
            values: BTreeMap::from([("owner".into(), CellValue::text("bob"))]),
        }];
        let undo = vec![DocAction::UpdateRecord {
            table_id: "Leads".into(),
            row_id: 2,
            values: BTreeMap::from([("owner".into(), CellValue::text("alice"))]),
        }];
        let broadcast = Broadcast::new(forward, undo);
        let bundle = broadcast.snapshots(&store).await.unwrap();
        assert_eq!(bundle.steps.len(), 1);
        let step = &bundle.steps[0];
        assert_eq!(
            step.before.record(2).unwrap().get("owner"),
            CellValue::text("alice")
        );
        assert_eq!(
            step.after.record(2).unwrap().get("owner"),
            CellValue::text("bob")
        );
    }

    #[tokio::test]
    async fn concurrent_observers_share_one_build() {
        let store = PostStore {
            table: post_state(),
            fetches: AtomicUsize::new(0),
        };
        let forward = vec![DocAction::UpdateRecord {
            table_id: "Leads".into(),
            row_id: 2,
            values: BTreeMap::from([("owner".into(), CellValue::text("bob"))]),
        }];
        let undo = vec![DocAction::UpdateRecord {
            table_id: "Leads".into(),
            row_id: 2,
            values: BTreeMap::from([("owner".into(), CellValue::text("alice"))]),
        }];
        let broadcast = Broadcast::new(forward, undo);
        let (a, b) = tokio::join!(broadcast.snapshots(&store), broadcast.snapshots(&store));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(std::sync::Arc::ptr_eq(&a, &b));
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_build_leaves_cell_reusable() {
        struct FailingOnce {
            inner: PostStore,
            failed: AtomicUsize,
        }

        #[async_trait]
        impl StoreFetcher for FailingOnce {
            async fn fetch_table(&self, query: &TableQuery) -> Result<TableData, RowgateError> {
                if self.failed.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(RowgateError::Fetch("transient".into()));
                }
                self.inner.fetch_table(query).await
            }
        }

        let store = FailingOnce {
            inner: PostStore {
                table: post_state(),
                fetches: AtomicUsize::new(0),
            },
            failed: AtomicUsize::new(0),
        };
        let undo = vec![DocAction::UpdateRecord {
            table_id: "Leads".into(),
            row_id: 2,
            values: BTreeMap::from([("owner".into(), CellValue::text("alice"))]),
        }];
        let broadcast = Broadcast::new(Vec::new(), undo);
        assert!(broadcast.snapshots(&store).await.is_err());
        assert!(broadcast.snapshots(&store).await.is_ok());
    }
}
