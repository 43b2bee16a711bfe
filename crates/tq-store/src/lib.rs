//! # tq-store — The "Store" of TELEQUERY
//!
//! Everything that talks to the telemetry query API: the [`TelemetryStore`]
//! capability, the typed [`TableResult`] it returns, and the HTTP
//! implementation with its credentials.

pub mod client;
pub mod credentials;
pub mod error;
pub mod table;

pub use client::HttpTelemetryStore;
pub use credentials::{Access, ResourceKind, StoreConfig};
pub use error::StoreError;
pub use table::{Column, ColumnType, TableResult, Value};

/// A backend that executes pipeline queries and returns result tables.
///
/// One call is one round trip. Implementations must be shareable across
/// requests (`Send + Sync`), the hub keeps them behind an `Arc`.
#[async_trait::async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Execute `query` and return every table of the response.
    async fn execute(&self, query: &str) -> Result<Vec<TableResult>, StoreError>;

    /// Execute `query` and return its first table.
    async fn execute_table(&self, query: &str) -> Result<TableResult, StoreError> {
        self.execute(query)
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::EmptyResponse)
    }
}
