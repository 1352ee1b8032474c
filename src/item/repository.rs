//! SQLite-backed item store.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::store::{ItemStore, PathChange};
use super::{Item, ItemFilter, ItemKind, NewItem};
use crate::{CabinetError, Result};

/// Raw `items` row as stored.
#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    id: String,
    owner_id: String,
    parent_id: Option<String>,
    name: String,
    kind: String,
    path: String,
    size: Option<i64>,
    mime_type: Option<String>,
    storage_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ItemRow> for Item {
    type Error = CabinetError;

    fn try_from(row: ItemRow) -> Result<Self> {
        let kind = row
            .kind
            .parse::<ItemKind>()
            .map_err(CabinetError::Database)?;
        let size = row
            .size
            .map(u64::try_from)
            .transpose()
            .map_err(|_| CabinetError::Database(format!("negative size on item {}", row.id)))?;

        Ok(Item {
            id: row.id,
            name: row.name,
            kind,
            parent_id: row.parent_id,
            owner_id: row.owner_id,
            path: row.path,
            size,
            mime_type: row.mime_type,
            storage_key: row.storage_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_items(rows: Vec<ItemRow>) -> Result<Vec<Item>> {
    rows.into_iter().map(Item::try_from).collect()
}

/// Item store over the `items` table.
#[derive(Debug, Clone)]
pub struct SqliteItemStore {
    pool: SqlitePool,
}

impl SqliteItemStore {
    /// Create a new store on the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl ItemStore for SqliteItemStore {
    async fn insert(&self, owner_id: &str, item: &NewItem, path: &str) -> Result<Item> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let attrs = item.file.clone().unwrap_or_default();
        let size = attrs
            .size
            .map(i64::try_from)
            .transpose()
            .map_err(|_| CabinetError::Validation("file size is too large".to_string()))?;

        sqlx::query(
            "INSERT INTO items (id, owner_id, parent_id, name, kind, path, size, mime_type,
                                storage_key, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(owner_id)
        .bind(&item.parent_id)
        .bind(&item.name)
        .bind(item.kind.as_str())
        .bind(path)
        .bind(size)
        .bind(&attrs.mime_type)
        .bind(&attrs.storage_key)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_by_id(&id)
            .await?
            .ok_or_else(|| CabinetError::NotFound("item".to_string()))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Item>> {
        let row = sqlx::query_as::<_, ItemRow>(
            "SELECT id, owner_id, parent_id, name, kind, path, size, mime_type, storage_key,
                    created_at, updated_at
             FROM items WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Item::try_from).transpose()
    }

    async fn find_by_parent(&self, owner_id: &str, parent_id: Option<&str>) -> Result<Vec<Item>> {
        let rows = sqlx::query_as::<_, ItemRow>(
            "SELECT id, owner_id, parent_id, name, kind, path, size, mime_type, storage_key,
                    created_at, updated_at
             FROM items WHERE owner_id = ? AND parent_id IS ?",
        )
        .bind(owner_id)
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        into_items(rows)
    }

    async fn find_by_owner(&self, owner_id: &str, filter: &ItemFilter) -> Result<Vec<Item>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, owner_id, parent_id, name, kind, path, size, mime_type, storage_key,
                    created_at, updated_at
             FROM items WHERE owner_id = ",
        );
        query.push_bind(owner_id);

        match &filter.parent_id {
            Some(Some(parent_id)) => {
                query.push(" AND parent_id = ");
                query.push_bind(parent_id.as_str());
            }
            Some(None) => {
                query.push(" AND parent_id IS NULL");
            }
            None => {}
        }

        if let Some(kind) = filter.kind {
            query.push(" AND kind = ");
            query.push_bind(kind.as_str());
        }

        let rows = query
            .build_query_as::<ItemRow>()
            .fetch_all(&self.pool)
            .await?;

        into_items(rows)
    }

    async fn update(&self, item: &Item, cascade: &[PathChange]) -> Result<Item> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE items SET name = ?, parent_id = ?, path = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&item.name)
        .bind(&item.parent_id)
        .bind(&item.path)
        .bind(now)
        .bind(&item.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CabinetError::NotFound("item".to_string()));
        }

        for change in cascade {
            sqlx::query("UPDATE items SET path = ?, updated_at = ? WHERE id = ?")
                .bind(&change.path)
                .bind(now)
                .bind(&change.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!(
            "Updated item {} and {} descendant paths",
            item.id,
            cascade.len()
        );

        self.find_by_id(&item.id)
            .await?
            .ok_or_else(|| CabinetError::NotFound("item".to_string()))
    }

    async fn delete(&self, ids: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for id in ids {
            let result = sqlx::query("DELETE FROM items WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn storage_key_in_use(&self, storage_key: &str) -> Result<bool> {
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM items WHERE storage_key = ?)")
                .bind(storage_key)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists.0)
    }
}
