//! Named telemetry stores and the timed query call every panel goes through.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tq_store::{StoreError, TableResult, TelemetryStore};

/// Stores by the name dashboard items refer to them with.
pub type StoreRegistry = HashMap<String, Arc<dyn TelemetryStore>>;

/// First table of `query`, bounded by `timeout`.
pub async fn fetch_table(
    store: &dyn TelemetryStore,
    query: &str,
    timeout: Duration,
) -> Result<TableResult, StoreError> {
    tokio::time::timeout(timeout, store.execute_table(query))
        .await
        .map_err(|_| StoreError::Timeout(timeout))?
}
