//! Store facade abstraction for the API layer.

use std::sync::Arc;

use async_trait::async_trait;
use dialtone_data::{
    CreateOutcome, DataResult, DeleteOutcome, DeviceStore, DeviceSummaryRow, DeviceVariableRow,
    MergeOutcome,
};

/// Trait defining the device storage backend used by the API layer.
#[async_trait]
pub trait DeviceFacade: Send + Sync {
    /// List every known category with its grouping metric.
    async fn list_devices(&self) -> DataResult<Vec<DeviceSummaryRow>>;
    /// Fetch the variable rows of the category identified by `cat_metric`.
    async fn device_by_metric(&self, cat_metric: i32) -> DataResult<Vec<DeviceVariableRow>>;
    /// Create a category and its variable rows as one batch.
    async fn create_device(
        &self,
        category: &str,
        variables: &[(String, String)],
    ) -> DataResult<CreateOutcome>;
    /// Merge variables into an existing category.
    async fn merge_device(
        &self,
        category: &str,
        variables: &[(String, String)],
    ) -> DataResult<MergeOutcome>;
    /// Delete every row of the named category.
    async fn delete_device(&self, category: &str) -> DataResult<DeleteOutcome>;
    /// Check that the backing store is reachable.
    async fn ping(&self) -> DataResult<()>;
}

/// Shared reference to the storage backend.
pub type SharedStore = Arc<dyn DeviceFacade>;

#[async_trait]
impl DeviceFacade for DeviceStore {
    async fn list_devices(&self) -> DataResult<Vec<DeviceSummaryRow>> {
        Self::list_devices(self).await
    }

    async fn device_by_metric(&self, cat_metric: i32) -> DataResult<Vec<DeviceVariableRow>> {
        Self::device_by_metric(self, cat_metric).await
    }

    async fn create_device(
        &self,
        category: &str,
        variables: &[(String, String)],
    ) -> DataResult<CreateOutcome> {
        Self::create_device(self, category, variables).await
    }

    async fn merge_device(
        &self,
        category: &str,
        variables: &[(String, String)],
    ) -> DataResult<MergeOutcome> {
        Self::merge_device(self, category, variables).await
    }

    async fn delete_device(&self, category: &str) -> DataResult<DeleteOutcome> {
        Self::delete_device(self, category).await
    }

    async fn ping(&self) -> DataResult<()> {
        Self::ping(self).await
    }
}
