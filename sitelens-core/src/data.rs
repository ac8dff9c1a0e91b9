use crate::collaborators::{AuditStore, Site};
use crate::error::{StoreError, StoreResult};
use crate::run::{AuditRun, RunUpdate};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use sitelens_scanner::discovery::{CachedSitemap, PlatformCredentials, StoredEntity};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// SQLite-backed audit store.
///
/// Runs are kept as a JSON document plus the columns needed for lookup.
pub struct Database {
    conn: Mutex<Connection>,
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

impl Database {
    pub fn drop(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        // Optimize for concurrent writes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.conn()?.execute_batch(
            "
CREATE TABLE IF NOT EXISTS sites (
    id TEXT PRIMARY KEY,
    url TEXT UNIQUE NOT NULL,
    name TEXT,
    account_id TEXT,
    credentials TEXT,         -- JSON platform credentials
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_runs (
    id TEXT PRIMARY KEY,
    site_id TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('PENDING', 'RUNNING', 'COMPLETED', 'FAILED')),
    overall_score INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    data TEXT NOT NULL,       -- JSON run document
    FOREIGN KEY(site_id) REFERENCES sites(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_audit_runs_site ON audit_runs(site_id);
CREATE INDEX IF NOT EXISTS idx_audit_runs_status ON audit_runs(status);

-- Sitemap bodies captured by earlier scans
CREATE TABLE IF NOT EXISTS cached_sitemaps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id TEXT NOT NULL,
    url TEXT NOT NULL,
    body TEXT NOT NULL DEFAULT '',
    fetched_at INTEGER NOT NULL,
    FOREIGN KEY(site_id) REFERENCES sites(id) ON DELETE CASCADE,
    UNIQUE(site_id, url)
);

-- Content records synced from the site's platform
CREATE TABLE IF NOT EXISTS stored_entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id TEXT NOT NULL,
    url TEXT,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    synced_at INTEGER NOT NULL,
    FOREIGN KEY(site_id) REFERENCES sites(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cached_sitemaps_site ON cached_sitemaps(site_id);
CREATE INDEX IF NOT EXISTS idx_stored_entities_site ON stored_entities(site_id);
            ",
        )?;
        Ok(())
    }

    // Site management
    pub fn insert_site(
        &self,
        url: &str,
        name: Option<&str>,
        account_id: Option<&str>,
        credentials: Option<&PlatformCredentials>,
    ) -> StoreResult<Site> {
        let site = Site {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            name: name.map(String::from),
            account_id: account_id.map(String::from),
            credentials: credentials.cloned(),
        };
        let credentials_json = credentials.map(serde_json::to_string).transpose()?;

        self.conn()?.execute(
            "INSERT INTO sites (id, url, name, account_id, credentials, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &site.id,
                &site.url,
                &site.name,
                &site.account_id,
                credentials_json,
                current_timestamp(),
            ],
        )?;

        Ok(site)
    }

    pub fn find_site_by_url(&self, url: &str) -> StoreResult<Option<Site>> {
        self.query_site("SELECT id, url, name, account_id, credentials FROM sites WHERE url = ?1", url)
    }

    pub fn get_site(&self, id: &str) -> StoreResult<Option<Site>> {
        self.query_site("SELECT id, url, name, account_id, credentials FROM sites WHERE id = ?1", id)
    }

    fn query_site(&self, sql: &str, key: &str) -> StoreResult<Option<Site>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let row = stmt
            .query_row(params![key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .optional()?;

        row.map(|(id, url, name, account_id, credentials)| -> StoreResult<Site> {
            Ok(Site {
                id,
                url,
                name,
                account_id,
                credentials: credentials
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()?,
            })
        })
        .transpose()
    }

    pub fn list_sites(&self) -> StoreResult<Vec<Site>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, url, name, account_id FROM sites ORDER BY created_at, url")?;

        let sites = stmt
            .query_map([], |row| {
                Ok(Site {
                    id: row.get(0)?,
                    url: row.get(1)?,
                    name: row.get(2)?,
                    account_id: row.get(3)?,
                    credentials: None,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(sites)
    }

    // Run management
    pub fn insert_run(&self, run: &AuditRun) -> StoreResult<()> {
        let data = serde_json::to_string(run)?;
        let timestamp = current_timestamp();

        self.conn()?.execute(
            "INSERT INTO audit_runs (id, site_id, status, overall_score, created_at, updated_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &run.id,
                &run.site_id,
                run.status.as_str(),
                run.overall_score,
                run.created_at.timestamp(),
                timestamp,
                data,
            ],
        )?;
        Ok(())
    }

    pub fn get_run(&self, id: &str) -> StoreResult<Option<AuditRun>> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM audit_runs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(data.as_deref().map(serde_json::from_str).transpose()?)
    }

    /// Runs for one site, newest first.
    pub fn list_runs_for_site(&self, site_id: &str) -> StoreResult<Vec<AuditRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT data FROM audit_runs WHERE site_id = ?1 ORDER BY created_at DESC, rowid DESC",
        )?;

        let docs = stmt
            .query_map(params![site_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        docs.iter()
            .map(|doc| serde_json::from_str(doc).map_err(StoreError::from))
            .collect()
    }

    /// Read-merge-write under one lock so concurrent patches never interleave.
    pub fn patch_run(&self, id: &str, update: RunUpdate) -> StoreResult<AuditRun> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let data: Option<String> = tx
            .query_row(
                "SELECT data FROM audit_runs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let data = data.ok_or_else(|| StoreError::NotFound {
            what: "Run",
            id: id.to_string(),
        })?;

        let mut run: AuditRun = serde_json::from_str(&data)?;
        if run.is_terminal() {
            return Err(StoreError::RunFinalized(id.to_string()));
        }
        run.apply(update);

        tx.execute(
            "UPDATE audit_runs SET status = ?1, overall_score = ?2, updated_at = ?3, data = ?4 WHERE id = ?5",
            params![
                run.status.as_str(),
                run.overall_score,
                current_timestamp(),
                serde_json::to_string(&run)?,
                id,
            ],
        )?;
        tx.commit()?;

        Ok(run)
    }

    // Discovery inputs
    pub fn insert_cached_sitemap(&self, site_id: &str, sitemap: &CachedSitemap) -> StoreResult<()> {
        self.conn()?.execute(
            "INSERT INTO cached_sitemaps (site_id, url, body, fetched_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(site_id, url) DO UPDATE SET body = excluded.body, fetched_at = excluded.fetched_at",
            params![site_id, &sitemap.url, &sitemap.body, current_timestamp()],
        )?;
        Ok(())
    }

    pub fn cached_sitemaps(&self, site_id: &str) -> StoreResult<Vec<CachedSitemap>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT url, body FROM cached_sitemaps WHERE site_id = ?1 ORDER BY id")?;

        let sitemaps = stmt
            .query_map(params![site_id], |row| {
                Ok(CachedSitemap {
                    url: row.get(0)?,
                    body: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(sitemaps)
    }

    pub fn insert_stored_entity(&self, site_id: &str, entity: &StoredEntity) -> StoreResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO stored_entities (site_id, url, kind, status, synced_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                site_id,
                &entity.url,
                &entity.kind,
                &entity.status,
                current_timestamp()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn stored_entities(&self, site_id: &str) -> StoreResult<Vec<StoredEntity>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT url, kind, status FROM stored_entities WHERE site_id = ?1 ORDER BY id")?;

        let entities = stmt
            .query_map(params![site_id], |row| {
                Ok(StoredEntity {
                    url: row.get(0)?,
                    kind: row.get(1)?,
                    status: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entities)
    }
}

#[async_trait]
impl AuditStore for Database {
    async fn create_run(&self, run: &AuditRun) -> StoreResult<()> {
        self.insert_run(run)
    }

    async fn update_run(&self, id: &str, update: RunUpdate) -> StoreResult<AuditRun> {
        self.patch_run(id, update)
    }

    async fn find_site(&self, id: &str) -> StoreResult<Option<Site>> {
        self.get_site(id)
    }

    async fn find_cached_sitemaps(&self, site_id: &str) -> StoreResult<Vec<CachedSitemap>> {
        self.cached_sitemaps(site_id)
    }

    async fn find_stored_entities(&self, site_id: &str) -> StoreResult<Vec<StoredEntity>> {
        self.stored_entities(site_id)
    }
}
