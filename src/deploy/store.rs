use super::{DeploymentRecord, DeploymentState};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database, Row, params};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const SELECT_COLUMNS: &str = "SELECT id, app_name, model_id, environment, state, base_url, endpoints, created_at, updated_at FROM deployments";

/// Registry of every deployment, kept across processes so `inspect` and
/// `teardown` can act on services started elsewhere.
pub struct DeploymentStore {
    db: Option<(Database, Connection)>,
    // In-memory fallback storage
    fallback: Arc<Mutex<Vec<DeploymentRecord>>>,
}

impl DeploymentStore {
    pub async fn new(db_path: &str) -> Result<Self> {
        let mut store = Self {
            db: None,
            fallback: Arc::new(Mutex::new(Vec::new())),
        };

        match store.init_database(db_path).await {
            Ok(()) => {
                info!("Deployment registry opened: {}", db_path);
            }
            Err(e) => {
                warn!(
                    "Deployment registry unavailable, using in-memory fallback: {}",
                    e
                );
            }
        }

        Ok(store)
    }

    pub fn is_persistent(&self) -> bool {
        self.db.is_some()
    }

    async fn init_database(&mut self, db_path: &str) -> Result<()> {
        let db = Builder::new_local(db_path).build().await?;
        let conn = db.connect()?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS deployments (
                id TEXT PRIMARY KEY,
                app_name TEXT NOT NULL,
                model_id TEXT NOT NULL,
                environment TEXT NOT NULL,
                state TEXT NOT NULL,
                base_url TEXT NOT NULL,
                endpoints TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            (),
        )
        .await?;

        self.db = Some((db, conn));
        Ok(())
    }

    pub async fn save(&self, record: &DeploymentRecord) -> Result<()> {
        if let Some((_, conn)) = &self.db {
            match self.save_to_db(conn, record).await {
                Ok(()) => {
                    debug!("Deployment {} saved to registry", record.id);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to save deployment to registry, using fallback: {}", e);
                }
            }
        }

        let mut fallback = self.lock_fallback()?;
        fallback.retain(|existing| existing.id != record.id);
        fallback.push(record.clone());
        Ok(())
    }

    async fn save_to_db(&self, conn: &Connection, record: &DeploymentRecord) -> Result<()> {
        let endpoints = serde_json::to_string(&record.endpoints)?;
        conn.execute(
            "INSERT OR REPLACE INTO deployments (id, app_name, model_id, environment, state, base_url, endpoints, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id.as_str(),
                record.app_name.as_str(),
                record.model_id.as_str(),
                record.environment.as_str(),
                record.state.as_str(),
                record.base_url.as_str(),
                endpoints,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn update_state(&self, id: &str, state: DeploymentState) -> Result<()> {
        let now = Utc::now();
        if let Some((_, conn)) = &self.db {
            match conn
                .execute(
                    "UPDATE deployments SET state = ?1, updated_at = ?2 WHERE id = ?3",
                    params![state.as_str(), now.to_rfc3339(), id],
                )
                .await
            {
                Ok(0) => {}
                Ok(_) => {
                    debug!("Deployment {} marked {}", id, state);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to update registry, using fallback: {}", e);
                }
            }
        }

        let mut fallback = self.lock_fallback()?;
        let record = fallback
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or_else(|| Error::DeploymentNotFound {
                deployment_id: id.to_string(),
            })?;
        record.state = state;
        record.updated_at = now;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<DeploymentRecord>> {
        if let Some((_, conn)) = &self.db {
            match self
                .query_db(conn, &format!("{SELECT_COLUMNS} WHERE id = ?1"), id)
                .await
            {
                Ok(mut records) if !records.is_empty() => return Ok(records.pop()),
                Ok(_) => {}
                Err(e) => warn!("Failed to read registry, using fallback: {}", e),
            }
        }

        let fallback = self.lock_fallback()?;
        Ok(fallback.iter().find(|record| record.id == id).cloned())
    }

    /// Every deployment, newest first.
    pub async fn list(&self) -> Result<Vec<DeploymentRecord>> {
        let mut records = Vec::new();
        if let Some((_, conn)) = &self.db {
            match self.query_all(conn).await {
                Ok(found) => records = found,
                Err(e) => warn!("Failed to read registry, using fallback: {}", e),
            }
        }

        let fallback = self.lock_fallback()?;
        records.extend(fallback.iter().cloned());
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        debug!("Listed {} deployments", records.len());
        Ok(records)
    }

    pub async fn latest_for_app(&self, app_name: &str) -> Result<Option<DeploymentRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|record| record.app_name == app_name))
    }

    async fn query_all(&self, conn: &Connection) -> Result<Vec<DeploymentRecord>> {
        let mut rows = conn.query(SELECT_COLUMNS, ()).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(record_from_row(&row)?);
        }
        Ok(records)
    }

    async fn query_db(
        &self,
        conn: &Connection,
        sql: &str,
        arg: &str,
    ) -> Result<Vec<DeploymentRecord>> {
        let mut rows = conn.query(sql, [arg]).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(record_from_row(&row)?);
        }
        Ok(records)
    }

    fn lock_fallback(&self) -> Result<std::sync::MutexGuard<'_, Vec<DeploymentRecord>>> {
        self.fallback
            .lock()
            .map_err(|e| Error::internal(format!("Mutex lock failed: {e}")))
    }
}

fn record_from_row(row: &Row) -> Result<DeploymentRecord> {
    let state: String = row.get(4)?;
    let endpoints: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(DeploymentRecord {
        id: row.get(0)?,
        app_name: row.get(1)?,
        model_id: row.get(2)?,
        environment: row.get(3)?,
        state: state.parse()?,
        base_url: row.get(5)?,
        endpoints: serde_json::from_str(&endpoints)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .map_err(|e| Error::internal(format!("Failed to parse timestamp: {e}")))?
        .with_timezone(&Utc))
}
