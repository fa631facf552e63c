//! Key/value metadata tables stored inside the cache store.
//!
//! A table is just a cache whose entries are JSON documents. Keeping metadata
//! in the same store as the data it describes means deleting a cache store
//! wipes both together, and cleanup can treat tables like any other cache.

use crate::error::{ErrorKind, Result};
use crate::http::Response;
use crate::{CacheHandle, StoreHandle};
use exn::ResultExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Opens metadata tables as caches named `{prefix}:db:{table}`.
#[derive(Clone)]
pub struct Database {
    store: StoreHandle,
    prefix: String,
}
impl Database {
    pub fn new(store: StoreHandle, prefix: impl Into<String>) -> Self {
        Self { store, prefix: prefix.into() }
    }

    /// Name of the cache backing `table`.
    pub fn cache_name(&self, table: &str) -> String {
        format!("{}:db:{}", self.prefix, table)
    }

    pub async fn open(&self, table: &str) -> Result<Table> {
        let cache = self.store.open(&self.cache_name(table)).await?;
        Ok(Table { name: table.to_string(), cache })
    }

    /// Delete `table` and its contents. Returns `false` if it didn't exist.
    pub async fn delete(&self, table: &str) -> Result<bool> {
        self.store.delete(&self.cache_name(table)).await
    }

    /// Names of every table in this database.
    pub async fn list(&self) -> Result<Vec<String>> {
        let marker = self.cache_name("");
        Ok(self
            .store
            .keys()
            .await?
            .into_iter()
            .filter_map(|name| name.strip_prefix(&marker).map(str::to_string))
            .collect())
    }
}

#[derive(Clone)]
pub struct Table {
    name: String,
    cache: CacheHandle,
}
impl Table {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the cache backing this table.
    pub fn cache_name(&self) -> &str {
        self.cache.name()
    }

    /// Read and decode the value stored under `key`.
    ///
    /// Fails with [`NotFound`](ErrorKind::NotFound) if there is no such key.
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let response = self
            .cache
            .lookup(key)
            .await?
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(format!("{}/{}", self.name, key))))?;
        serde_json::from_slice(&response.body).or_raise(|| ErrorKind::BackendError(format!("undecodable value at {}/{}", self.name, key)))
    }

    pub async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value).map_err(ErrorKind::Serialization)?;
        let response = Response::ok_with(body).with_header("Content-Type", "application/json");
        self.cache.put(key, &response).await
    }

    /// Returns `false` if there was no such key.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.cache.delete(key).await
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.cache.keys().await
    }
}
