//! REST storage backend.
//!
//! Talks to a PostgREST-style endpoint (`/rest/v1/<table>`), using
//! `on_conflict` plus `Prefer: resolution=merge-duplicates` for upserts and
//! `eq.` filters for point reads.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use waypoint_core::{
    LevelId, LevelProgressRecord, ModuleId, ModuleProgressRecord, ScreenId, TimerSnapshot, UserId,
};
use super::{RemoteStore, Result, StorageError};

const LEVEL_TABLE: &str = "level_progress";
const MODULE_TABLE: &str = "module_progress";
const TIMER_TABLE: &str = "timer_snapshots";

/// Remote store reached over HTTP.
#[derive(Clone)]
pub struct HttpStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpStore {
    /// Store at `base_url`, authenticating with `api_key`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn upsert<T: Serialize + Sync>(&self, table: &str, conflict: &str, row: &T) -> Result<()> {
        let response = self
            .authed(self.client.post(self.table_url(table)))
            .query(&[("on_conflict", conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row])
            .send()
            .await?;
        check_status(response.status(), table)?;
        Ok(())
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, filters: &[(&str, String)]) -> Result<Vec<T>> {
        let response = self
            .authed(self.client.get(self.table_url(table)))
            .query(&[("select", "*")])
            .query(filters)
            .send()
            .await?;
        check_status(response.status(), table)?;
        Ok(response.json().await?)
    }

    async fn delete_where_user(&self, table: &str, user: &UserId) -> Result<usize> {
        let response = self
            .authed(self.client.delete(self.table_url(table)))
            .query(&user_filter(user))
            .header("Prefer", "return=representation")
            .send()
            .await?;
        check_status(response.status(), table)?;
        let rows: Vec<serde_json::Value> = response.json().await?;
        Ok(rows.len())
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

fn user_filter(user: &UserId) -> Vec<(&'static str, String)> {
    vec![("user_id", eq(user))]
}

fn check_status(status: StatusCode, table: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(StorageError::Unavailable(format!("{} returned {}", table, status)));
    }
    Err(StorageError::Other(format!("{} returned {}", table, status)))
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn upsert_level(&self, record: &LevelProgressRecord) -> Result<()> {
        self.upsert(LEVEL_TABLE, "user_id,module_id,level_id", record).await
    }

    async fn load_level(
        &self,
        user: &UserId,
        module: ModuleId,
        level: LevelId,
    ) -> Result<Option<LevelProgressRecord>> {
        let mut filters = user_filter(user);
        filters.push(("module_id", eq(module)));
        filters.push(("level_id", eq(level)));
        let rows: Vec<LevelProgressRecord> = self.select(LEVEL_TABLE, &filters).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_levels(
        &self,
        user: &UserId,
        module: Option<ModuleId>,
    ) -> Result<Vec<LevelProgressRecord>> {
        let mut filters = user_filter(user);
        if let Some(module) = module {
            filters.push(("module_id", eq(module)));
        }
        filters.push(("order", "module_id.asc,level_id.asc".to_string()));
        self.select(LEVEL_TABLE, &filters).await
    }

    async fn upsert_module(&self, record: &ModuleProgressRecord) -> Result<()> {
        self.upsert(MODULE_TABLE, "user_id,module_id", record).await
    }

    async fn load_module(
        &self,
        user: &UserId,
        module: ModuleId,
    ) -> Result<Option<ModuleProgressRecord>> {
        let mut filters = user_filter(user);
        filters.push(("module_id", eq(module)));
        let rows: Vec<ModuleProgressRecord> = self.select(MODULE_TABLE, &filters).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_modules(&self, user: &UserId) -> Result<Vec<ModuleProgressRecord>> {
        let mut filters = user_filter(user);
        filters.push(("order", "module_id.asc".to_string()));
        self.select(MODULE_TABLE, &filters).await
    }

    async fn save_timer(&self, snapshot: &TimerSnapshot) -> Result<()> {
        self.upsert(TIMER_TABLE, "user_id,screen_id", snapshot).await
    }

    async fn load_timer(&self, user: &UserId, screen: &ScreenId) -> Result<Option<TimerSnapshot>> {
        let mut filters = user_filter(user);
        filters.push(("screen_id", eq(screen)));
        let rows: Vec<TimerSnapshot> = self.select(TIMER_TABLE, &filters).await?;
        Ok(rows.into_iter().next())
    }

    async fn delete_user(&self, user: &UserId) -> Result<usize> {
        let mut removed = 0;
        for table in [LEVEL_TABLE, MODULE_TABLE, TIMER_TABLE] {
            removed += self.delete_where_user(table, user).await?;
        }
        Ok(removed)
    }
}
