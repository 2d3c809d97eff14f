use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use folio_core::{
    ContentLocation, CoreError, CoreResult, ResourceFilter, ResourceKey, ResourceMetadata,
    ResourceRepository, ResourceType, SemanticVersion, VersionId, VersionInfo, VersionedResource,
};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{query, Executor, QueryBuilder, Row, Sqlite, SqlitePool};

const SELECT_COLUMNS: &str = r#"
    SELECT id,
           resource_id,
           resource_type,
           namespace,
           version,
           data_hash,
           is_latest,
           supersedes,
           superseded_by,
           created_at,
           content_inline,
           content_location,
           metadata
      FROM resource_versions
"#;

const ORDER_NEWEST_FIRST: &str = r#"
  ORDER BY version_major DESC,
           version_minor DESC,
           version_patch DESC,
           created_at DESC
"#;

/// SQLite-backed repository for versioned resource records.
///
/// A partial unique index on `(resource_id, resource_type) WHERE is_latest = 1`
/// backs the single-latest invariant; `swap_latest` performs the conditional
/// flip and the insert inside one transaction.
pub struct SqliteResourceRepository {
    pool: SqlitePool,
}

impl SqliteResourceRepository {
    /// Creates a new repository backed by the provided pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool (useful for composing with other services).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts a record via the supplied executor.
    pub async fn insert_with_executor<'e, E>(
        executor: E,
        record: &VersionedResource,
    ) -> CoreResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        record.validate()?;

        let info = &record.version_info;
        let (major, minor, patch) = version_columns(&info.version)?;
        let content_inline = record
            .content_inline
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let content_location = record
            .content_location
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metadata = serde_json::to_string(&record.metadata)?;

        query(
            r#"
            INSERT INTO resource_versions (
                id,
                resource_id,
                resource_type,
                namespace,
                version,
                version_major,
                version_minor,
                version_patch,
                data_hash,
                is_latest,
                supersedes,
                superseded_by,
                created_at,
                content_inline,
                content_location,
                metadata
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(record.id.to_bytes().to_vec())
        .bind(&record.resource_id)
        .bind(record.resource_type.as_str())
        .bind(&record.namespace)
        .bind(info.version.to_string())
        .bind(major)
        .bind(minor)
        .bind(patch)
        .bind(&info.data_hash)
        .bind(info.is_latest)
        .bind(info.supersedes.map(|id| id.to_bytes().to_vec()))
        .bind(info.superseded_by.map(|id| id.to_bytes().to_vec()))
        .bind(format_timestamp(&info.created_at))
        .bind(content_inline)
        .bind(content_location)
        .bind(metadata)
        .execute(executor)
        .await
        .map(|_| ())
        .map_err(|err| map_sqlx_error("version", record.id.to_string(), err))
    }

    /// Updates a record via the supplied executor.
    pub async fn update_with_executor<'e, E>(
        executor: E,
        record: &VersionedResource,
    ) -> CoreResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        record.validate()?;

        let info = &record.version_info;
        let (major, minor, patch) = version_columns(&info.version)?;
        let content_inline = record
            .content_inline
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let content_location = record
            .content_location
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metadata = serde_json::to_string(&record.metadata)?;

        let result = query(
            r#"
            UPDATE resource_versions
               SET resource_id = ?2,
                   resource_type = ?3,
                   namespace = ?4,
                   version = ?5,
                   version_major = ?6,
                   version_minor = ?7,
                   version_patch = ?8,
                   data_hash = ?9,
                   is_latest = ?10,
                   supersedes = ?11,
                   superseded_by = ?12,
                   created_at = ?13,
                   content_inline = ?14,
                   content_location = ?15,
                   metadata = ?16
             WHERE id = ?1
            "#,
        )
        .bind(record.id.to_bytes().to_vec())
        .bind(&record.resource_id)
        .bind(record.resource_type.as_str())
        .bind(&record.namespace)
        .bind(info.version.to_string())
        .bind(major)
        .bind(minor)
        .bind(patch)
        .bind(&info.data_hash)
        .bind(info.is_latest)
        .bind(info.supersedes.map(|id| id.to_bytes().to_vec()))
        .bind(info.superseded_by.map(|id| id.to_bytes().to_vec()))
        .bind(format_timestamp(&info.created_at))
        .bind(content_inline)
        .bind(content_location)
        .bind(metadata)
        .execute(executor)
        .await
        .map_err(|err| map_sqlx_error("version", record.id.to_string(), err))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("version", record.id.to_string()));
        }
        Ok(())
    }

    fn map_row(row: SqliteRow) -> CoreResult<VersionedResource> {
        let id_bytes: Vec<u8> = row.get("id");
        let id = VersionId::from_bytes(&id_bytes)
            .map_err(|err| CoreError::internal(err.to_string()))?;
        let resource_id: String = row.get("resource_id");
        let resource_type: String = row.get("resource_type");
        let resource_type = ResourceType::from_str(&resource_type)?;
        let namespace: String = row.get("namespace");
        let version: String = row.get("version");
        let version = SemanticVersion::from_str(&version)?;
        let data_hash: String = row.get("data_hash");
        let is_latest: bool = row.get("is_latest");
        let supersedes: Option<Vec<u8>> = row.get("supersedes");
        let superseded_by: Option<Vec<u8>> = row.get("superseded_by");
        let created_at: String = row.get("created_at");
        let content_inline: Option<String> = row.get("content_inline");
        let content_location: Option<String> = row.get("content_location");
        let metadata: String = row.get("metadata");

        let supersedes = supersedes
            .map(|bytes| VersionId::from_bytes(&bytes))
            .transpose()
            .map_err(|err| CoreError::internal(format!("invalid supersedes: {err}")))?;
        let superseded_by = superseded_by
            .map(|bytes| VersionId::from_bytes(&bytes))
            .transpose()
            .map_err(|err| CoreError::internal(format!("invalid superseded_by: {err}")))?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|err| CoreError::internal(format!("invalid created_at: {err}")))?
            .with_timezone(&Utc);
        let content_inline = content_inline
            .map(|text| serde_json::from_str::<Value>(&text))
            .transpose()?;
        let content_location = content_location
            .map(|text| serde_json::from_str::<ContentLocation>(&text))
            .transpose()?;
        let metadata: ResourceMetadata = serde_json::from_str(&metadata)?;

        Ok(VersionedResource {
            id,
            resource_id,
            resource_type,
            namespace,
            version_info: VersionInfo {
                version,
                data_hash,
                is_latest,
                supersedes,
                superseded_by,
                created_at,
            },
            content_inline,
            content_location,
            metadata,
        })
    }
}

#[async_trait::async_trait]
impl ResourceRepository for SqliteResourceRepository {
    async fn insert(&self, record: &VersionedResource) -> CoreResult<()> {
        Self::insert_with_executor(&self.pool, record).await
    }

    async fn get(&self, id: VersionId) -> CoreResult<Option<VersionedResource>> {
        let row = query(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id.to_bytes().to_vec())
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| CoreError::internal(err.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn find(&self, filter: &ResourceFilter) -> CoreResult<Vec<VersionedResource>> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(SELECT_COLUMNS);
        builder.push(" WHERE 1 = 1");
        if let Some(resource_id) = &filter.resource_id {
            builder.push(" AND resource_id = ").push_bind(resource_id.clone());
        }
        if let Some(resource_type) = filter.resource_type {
            builder
                .push(" AND resource_type = ")
                .push_bind(resource_type.as_str());
        }
        if let Some(namespace) = &filter.namespace {
            builder.push(" AND namespace = ").push_bind(namespace.clone());
        }
        if let Some(is_latest) = filter.is_latest {
            builder.push(" AND is_latest = ").push_bind(is_latest);
        }
        if let Some(cutoff) = filter.created_before {
            builder
                .push(" AND created_at < ")
                .push_bind(format_timestamp(&cutoff));
        }
        builder.push(ORDER_NEWEST_FIRST);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|err| CoreError::internal(err.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn update(&self, record: &VersionedResource) -> CoreResult<()> {
        Self::update_with_executor(&self.pool, record).await
    }

    async fn delete(&self, id: VersionId) -> CoreResult<()> {
        let result = query(
            r#"
            DELETE FROM resource_versions
             WHERE id = ?1
            "#,
        )
        .bind(id.to_bytes().to_vec())
        .execute(&self.pool)
        .await
        .map_err(|err| map_sqlx_error("version", id.to_string(), err))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("version", id.to_string()));
        }
        Ok(())
    }

    async fn list_resource_keys(&self) -> CoreResult<Vec<ResourceKey>> {
        let rows = query(
            r#"
            SELECT DISTINCT resource_id, resource_type
              FROM resource_versions
          ORDER BY resource_type ASC, resource_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|err| CoreError::internal(err.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let resource_id: String = row.get("resource_id");
                let resource_type: String = row.get("resource_type");
                Ok(ResourceKey::new(
                    resource_id,
                    ResourceType::from_str(&resource_type)?,
                ))
            })
            .collect()
    }

    async fn latest(&self, key: &ResourceKey) -> CoreResult<Option<VersionedResource>> {
        let row = query(&format!(
            "{SELECT_COLUMNS} WHERE resource_id = ?1 AND resource_type = ?2 AND is_latest = 1"
        ))
        .bind(&key.resource_id)
        .bind(key.resource_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| CoreError::internal(err.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn swap_latest(
        &self,
        key: &ResourceKey,
        expected_latest: Option<VersionId>,
        new_record: &VersionedResource,
    ) -> CoreResult<bool> {
        let mut latest_record = new_record.clone();
        latest_record.version_info.is_latest = true;
        latest_record.validate()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| CoreError::internal(err.to_string()))?;

        // Writing first takes the database write lock up front; the partial
        // unique index rejects the insert when `expected_latest` is None but a
        // latest already exists.
        if let Some(previous) = expected_latest {
            let result = query(
                r#"
                UPDATE resource_versions
                   SET is_latest = 0,
                       superseded_by = ?2
                 WHERE id = ?1
                   AND resource_id = ?3
                   AND resource_type = ?4
                   AND is_latest = 1
                "#,
            )
            .bind(previous.to_bytes().to_vec())
            .bind(latest_record.id.to_bytes().to_vec())
            .bind(&key.resource_id)
            .bind(key.resource_type.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|err| map_sqlx_error("version", previous.to_string(), err))?;

            if result.rows_affected() == 0 {
                tracing::debug!(key = %key, "latest swap lost: expected latest no longer current");
                return Ok(false);
            }
        }

        match Self::insert_with_executor(&mut *tx, &latest_record).await {
            Ok(()) => {}
            Err(CoreError::AlreadyExists { .. }) => {
                tracing::debug!(key = %key, "latest swap lost: concurrent latest or version exists");
                return Ok(false);
            }
            Err(err) => return Err(err),
        }

        tx.commit()
            .await
            .map_err(|err| CoreError::internal(err.to_string()))?;
        Ok(true)
    }
}

fn version_columns(version: &SemanticVersion) -> CoreResult<(i64, i64, i64)> {
    let convert = |component: u64| {
        i64::try_from(component)
            .map_err(|_| CoreError::invalid_resource("version component exceeds 63-bit range"))
    };
    Ok((
        convert(version.major)?,
        convert(version.minor)?,
        convert(version.patch)?,
    ))
}

/// Fixed-width RFC 3339 so that text comparison orders chronologically.
fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn map_sqlx_error(entity: &'static str, id: String, err: sqlx::Error) -> CoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            if message.contains("UNIQUE constraint failed") {
                CoreError::already_exists(entity, id)
            } else if message.contains("CHECK constraint failed") {
                CoreError::invalid_resource(format!("check constraint failed: {message}"))
            } else {
                CoreError::StorageError(message)
            }
        }
        other => CoreError::internal(other.to_string()),
    }
}
