use crate::error::MergeResult;
use crate::job::MergeDispatcher;
use crate::merge::RecordMerge;
use recmerge_model::{Actor, MergeConfig, MergeData, Record};
use recmerge_storage::{RecordStore, RecordStoreExt};
use tokio::task::JoinHandle;

/// Merge shortcuts on a record.
pub trait SupportsMerging {
    /// Previews merging `self` into `target`.
    fn preview_merge_to(
        &self,
        store: &dyn RecordStore,
        target: &Record,
        merge_config: Option<MergeConfig>,
    ) -> MergeResult<MergeData>;

    /// Queues a merge of `self` into `target`.
    fn merge_to(
        &self,
        dispatcher: &MergeDispatcher,
        target: &Record,
        performed_by: Option<Actor>,
        merge_config: Option<MergeConfig>,
    ) -> MergeResult<JoinHandle<MergeResult<Record>>>;

    /// Up to `amount` live records of the same type matching `term`.
    fn possible_records_for_merging(&self, store: &dyn RecordStore, term: &str, amount: usize) -> MergeResult<Vec<Record>>;
}

impl SupportsMerging for Record {
    fn preview_merge_to(
        &self,
        store: &dyn RecordStore,
        target: &Record,
        merge_config: Option<MergeConfig>,
    ) -> MergeResult<MergeData> {
        RecordMerge::new(store)
            .from(self.clone())
            .to(target.clone())
            .with_merge_config(merge_config)
            .preview()
    }

    fn merge_to(
        &self,
        dispatcher: &MergeDispatcher,
        target: &Record,
        performed_by: Option<Actor>,
        merge_config: Option<MergeConfig>,
    ) -> MergeResult<JoinHandle<MergeResult<Record>>> {
        dispatcher.merge_to(self.clone(), target.clone(), performed_by, merge_config)
    }

    fn possible_records_for_merging(&self, store: &dyn RecordStore, term: &str, amount: usize) -> MergeResult<Vec<Record>> {
        Ok(store.merge_candidates(self, term, amount)?)
    }
}
