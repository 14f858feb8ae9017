//! Row-level table store
//!
//! Every dataset the dashboard works with (users, inventory, production,
//! material requests, vendor orders and the session log) lives in a
//! [`Table`]. Tables support filtered/sorted/limited reads, single and
//! batch inserts, and update-by-id. Unique constraints are declared by the
//! row type and checked before anything is written.
//!
//! When opened with a directory, each table is mirrored to
//! `<dir>/<table>.json`. Writes serialize the candidate state to disk first
//! and only then commit it in memory, so a failed write leaves both copies
//! as they were.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::cmp::Ordering;
use std::fs::{self, File, create_dir_all};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::UserRecord;
use crate::inventory::InventoryItem;
use crate::materials::MaterialRequest;
use crate::production::ProductionRecord;
use crate::vendor::VendorOrder;

/// Errors raised by table operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint was violated (SQLSTATE 23505 in a relational backend).
    #[error("duplicate key value violates unique constraint \"{constraint}\"")]
    DuplicateKey { constraint: &'static str },

    #[error("no row with id {id} in {table}")]
    NotFound { table: &'static str, id: Uuid },

    #[error("I/O error on table {table}: {source}")]
    Io {
        table: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt data in table {table}: {source}")]
    Serde {
        table: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("table {0} lock poisoned")]
    Poisoned(&'static str),
}

impl StoreError {
    /// Returns true when this is a unique-constraint violation on `constraint`.
    pub fn is_duplicate_of(&self, constraint: &str) -> bool {
        matches!(self, StoreError::DuplicateKey { constraint: c } if *c == constraint)
    }
}

/// A row that can be stored in a [`Table`].
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table name, also used as the file stem when persisted.
    const TABLE: &'static str;

    fn id(&self) -> Uuid;

    fn created_at(&self) -> DateTime<Utc>;

    /// Unique constraints as `(constraint name, key value)` pairs.
    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

type Filter<T> = Box<dyn Fn(&T) -> bool + Send>;
type Comparator<T> = Box<dyn Fn(&T, &T) -> Ordering + Send>;

/// A read query: optional filter, ordering and row limit.
pub struct Query<T> {
    filter: Option<Filter<T>>,
    order: Option<Comparator<T>>,
    limit: Option<usize>,
}

impl<T: Record> Default for Query<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> Query<T> {
    pub fn new() -> Self {
        Query {
            filter: None,
            order: None,
            limit: None,
        }
    }

    pub fn filter(mut self, predicate: impl Fn(&T) -> bool + Send + 'static) -> Self {
        self.filter = Some(Box::new(predicate));
        self
    }

    pub fn order_by(mut self, cmp: impl Fn(&T, &T) -> Ordering + Send + 'static) -> Self {
        self.order = Some(Box::new(cmp));
        self
    }

    /// Newest rows first.
    pub fn newest_first(self) -> Self {
        self.order_by(|a, b| b.created_at().cmp(&a.created_at()))
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A named, optionally file-backed collection of rows.
pub struct Table<T: Record> {
    rows: RwLock<Vec<T>>,
    path: Option<PathBuf>,
}

impl<T: Record> Table<T> {
    /// An empty table that is never written to disk.
    pub fn in_memory() -> Self {
        Table {
            rows: RwLock::new(Vec::new()),
            path: None,
        }
    }

    /// Open (or create) a table persisted under `dir`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        create_dir_all(dir).map_err(|source| StoreError::Io {
            table: T::TABLE,
            source,
        })?;

        let path = dir.join(format!("{}.json", T::TABLE));
        let rows = if path.exists() {
            let file = File::open(&path).map_err(|source| StoreError::Io {
                table: T::TABLE,
                source,
            })?;
            serde_json::from_reader(BufReader::new(file)).map_err(|source| StoreError::Serde {
                table: T::TABLE,
                source,
            })?
        } else {
            Vec::new()
        };

        debug!("opened table {} with {} rows", T::TABLE, rows.len());
        Ok(Table {
            rows: RwLock::new(rows),
            path: Some(path),
        })
    }

    pub fn select(&self, query: Query<T>) -> Result<Vec<T>, StoreError> {
        let rows = self.read()?;
        let mut out: Vec<T> = match &query.filter {
            Some(filter) => rows.iter().filter(|r| filter(r)).cloned().collect(),
            None => rows.clone(),
        };
        drop(rows);

        if let Some(cmp) = &query.order {
            out.sort_by(|a, b| cmp(a, b));
        }
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Result<Option<T>, StoreError> {
        Ok(self.read()?.iter().find(|r| predicate(r)).cloned())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<T>, StoreError> {
        self.find(|r| r.id() == id)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    pub fn insert(&self, row: T) -> Result<T, StoreError> {
        self.insert_all(vec![row.clone()])?;
        Ok(row)
    }

    /// Insert every row or none of them.
    pub fn insert_all(&self, new_rows: Vec<T>) -> Result<Vec<T>, StoreError> {
        let mut rows = self.write()?;

        let mut candidate = rows.clone();
        for row in &new_rows {
            for (constraint, key) in row.unique_keys() {
                let clash = candidate.iter().any(|existing| {
                    existing
                        .unique_keys()
                        .iter()
                        .any(|(c, k)| *c == constraint && *k == key)
                });
                if clash {
                    return Err(StoreError::DuplicateKey { constraint });
                }
            }
            candidate.push(row.clone());
        }

        self.persist(&candidate)?;
        *rows = candidate;
        Ok(new_rows)
    }

    /// Apply `mutate` to the row with `id` and return the updated row.
    pub fn update(&self, id: Uuid, mutate: impl FnOnce(&mut T)) -> Result<T, StoreError> {
        self.try_update(id, |row| {
            mutate(row);
            Ok(())
        })
    }

    /// Like [`Table::update`], but `mutate` sees the row under the write lock
    /// and may refuse the change. A refused change is not written.
    pub fn try_update<E>(
        &self,
        id: Uuid,
        mutate: impl FnOnce(&mut T) -> Result<(), E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut rows = self.write()?;

        let mut candidate = rows.clone();
        let row = candidate
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or(StoreError::NotFound {
                table: T::TABLE,
                id,
            })?;
        mutate(row)?;
        let updated = row.clone();

        self.persist(&candidate)?;
        *rows = candidate;
        Ok(updated)
    }

    /// Apply `mutate` to every row matching `predicate`; returns the number touched.
    pub fn update_where(
        &self,
        predicate: impl Fn(&T) -> bool,
        mutate: impl Fn(&mut T),
    ) -> Result<usize, StoreError> {
        let mut rows = self.write()?;

        let mut candidate = rows.clone();
        let mut touched = 0;
        for row in candidate.iter_mut().filter(|r| predicate(r)) {
            mutate(row);
            touched += 1;
        }
        if touched == 0 {
            return Ok(0);
        }

        self.persist(&candidate)?;
        *rows = candidate;
        Ok(touched)
    }

    fn persist(&self, rows: &[T]) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io = |source| StoreError::Io {
            table: T::TABLE,
            source,
        };

        let tmp = path.with_extension("json.tmp");
        {
            let file = File::create(&tmp).map_err(io)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, rows).map_err(|source| {
                StoreError::Serde {
                    table: T::TABLE,
                    source,
                }
            })?;
            writer.flush().map_err(io)?;
        }
        if let Err(e) = fs::rename(&tmp, path) {
            warn!("failed to replace {}: {}", path.display(), e);
            let _ = fs::remove_file(&tmp);
            return Err(io(e));
        }
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<T>>, StoreError> {
        self.rows.read().map_err(|_| StoreError::Poisoned(T::TABLE))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<T>>, StoreError> {
        self.rows.write().map_err(|_| StoreError::Poisoned(T::TABLE))
    }
}

/// One row of the login/logout audit trail.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct SessionLogEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub login_at: DateTime<Utc>,
    pub logout_at: Option<DateTime<Utc>>,
}

impl Record for SessionLogEntry {
    const TABLE: &'static str = "user_sessions";

    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.login_at
    }
}

/// All tables of the dashboard plus its two stored procedures.
pub struct Database {
    pub users: Table<UserRecord>,
    pub inventory: Table<InventoryItem>,
    pub production: Table<ProductionRecord>,
    pub material_requests: Table<MaterialRequest>,
    pub vendor_orders: Table<VendorOrder>,
    pub user_sessions: Table<SessionLogEntry>,
}

impl Database {
    pub fn in_memory() -> Self {
        Database {
            users: Table::in_memory(),
            inventory: Table::in_memory(),
            production: Table::in_memory(),
            material_requests: Table::in_memory(),
            vendor_orders: Table::in_memory(),
            user_sessions: Table::in_memory(),
        }
    }

    /// Open every table under `dir`, creating the directory if needed.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Ok(Database {
            users: Table::open(dir)?,
            inventory: Table::open(dir)?,
            production: Table::open(dir)?,
            material_requests: Table::open(dir)?,
            vendor_orders: Table::open(dir)?,
            user_sessions: Table::open(dir)?,
        })
    }

    /// Record a login and return the id of the new session-log row.
    pub fn log_user_login(
        &self,
        user_id: Uuid,
        role: &str,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<Uuid, StoreError> {
        let entry = SessionLogEntry {
            id: Uuid::new_v4(),
            user_id,
            role: role.to_string(),
            ip_address,
            user_agent,
            login_at: Utc::now(),
            logout_at: None,
        };
        let id = entry.id;
        self.user_sessions.insert(entry)?;
        Ok(id)
    }

    /// Stamp the logout time on a session-log row.
    pub fn log_user_logout(&self, session_log_id: Uuid) -> Result<(), StoreError> {
        self.user_sessions.update(session_log_id, |entry| {
            entry.logout_at = Some(Utc::now());
        })?;
        Ok(())
    }
}
