use crate::config::MirrorConfig;
use crate::errors::{MirrorError, Result};
use crate::models::{
    DatabaseNode, NewDatabase, NewSchema, NewTable, Permission, SchemaNode, SyncRun, TableNode,
};
use crate::utils::id::InternalId;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::sync::{Arc, Mutex, MutexGuard};

/// Repository over the mirrored catalog of one or more connectors.
///
/// Implementations only persist what they are told: the reconciler decides
/// existence against its own working set before calling `create_*`.
pub trait MirrorStore: Send + Sync {
    fn list_databases(&self, connector_id: &str) -> Result<Vec<DatabaseNode>>;
    fn list_schemas(&self, connector_id: &str) -> Result<Vec<SchemaNode>>;
    fn list_tables(&self, connector_id: &str) -> Result<Vec<TableNode>>;

    fn create_database(&self, connector_id: &str, new: &NewDatabase) -> Result<DatabaseNode>;
    fn create_schema(&self, connector_id: &str, new: &NewSchema) -> Result<SchemaNode>;
    fn create_table(&self, connector_id: &str, new: &NewTable) -> Result<TableNode>;

    fn touch_table(&self, node: &TableNode, timestamp: i64) -> Result<()>;

    fn destroy_database(&self, node: &DatabaseNode) -> Result<()>;
    fn destroy_schema(&self, node: &SchemaNode) -> Result<()>;
    fn destroy_table(&self, node: &TableNode) -> Result<()>;

    /// Permission editing entry point, used by access-control tooling and
    /// never by the reconciler. Selecting a node that is not mirrored yet
    /// creates it, with any missing ancestors created as `inherited`.
    fn set_permission(
        &self,
        connector_id: &str,
        internal_id: &str,
        permission: Permission,
    ) -> Result<()>;
}

pub struct Catalog {
    conn: Arc<Mutex<Connection>>,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn parse_permission(raw: String) -> rusqlite::Result<Permission> {
    raw.parse().map_err(|err: MirrorError| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
    })
}

fn database_from_row(row: &Row<'_>) -> rusqlite::Result<DatabaseNode> {
    Ok(DatabaseNode {
        connector_id: row.get(0)?,
        internal_id: row.get(1)?,
        name: row.get(2)?,
        permission: parse_permission(row.get(3)?)?,
        created_at: row.get(4)?,
    })
}

fn schema_from_row(row: &Row<'_>) -> rusqlite::Result<SchemaNode> {
    Ok(SchemaNode {
        connector_id: row.get(0)?,
        internal_id: row.get(1)?,
        name: row.get(2)?,
        database_name: row.get(3)?,
        permission: parse_permission(row.get(4)?)?,
        created_at: row.get(5)?,
    })
}

fn table_from_row(row: &Row<'_>) -> rusqlite::Result<TableNode> {
    Ok(TableNode {
        connector_id: row.get(0)?,
        internal_id: row.get(1)?,
        name: row.get(2)?,
        schema_name: row.get(3)?,
        database_name: row.get(4)?,
        permission: parse_permission(row.get(5)?)?,
        created_at: row.get(6)?,
        last_upserted_at: row.get(7)?,
    })
}

impl Catalog {
    pub fn new(config: &MirrorConfig) -> Result<Self> {
        if let Some(parent) = config.catalog_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&config.catalog_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MirrorError::Store("catalog connection lock poisoned".to_string()))
    }

    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS mirror_databases (
                connector_id TEXT NOT NULL,
                internal_id TEXT NOT NULL,
                name TEXT NOT NULL,
                permission TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (connector_id, internal_id)
            );
            CREATE TABLE IF NOT EXISTS mirror_schemas (
                connector_id TEXT NOT NULL,
                internal_id TEXT NOT NULL,
                name TEXT NOT NULL,
                database_name TEXT NOT NULL,
                permission TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (connector_id, internal_id)
            );
            CREATE TABLE IF NOT EXISTS mirror_tables (
                connector_id TEXT NOT NULL,
                internal_id TEXT NOT NULL,
                name TEXT NOT NULL,
                schema_name TEXT NOT NULL,
                database_name TEXT NOT NULL,
                permission TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_upserted_at INTEGER,
                PRIMARY KEY (connector_id, internal_id)
            );
            CREATE TABLE IF NOT EXISTS sync_runs (
                run_id TEXT PRIMARY KEY,
                connector_id TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                status TEXT,
                details TEXT
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn create_sync_run(&self, run_id: &str, connector_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_runs (run_id, connector_id, start_time, status) VALUES (?1, ?2, ?3, 'RUNNING')",
            params![run_id, connector_id, now_millis()],
        )?;
        Ok(())
    }

    pub fn update_sync_run_status(&self, run_id: &str, status: &str, details: &str) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE sync_runs SET status = ?1, details = ?2, end_time = ?3 WHERE run_id = ?4",
            params![status, details, now_millis(), run_id],
        )?;
        if updated == 0 {
            return Err(MirrorError::NotFound(format!("sync run {run_id}")));
        }
        Ok(())
    }

    /// Most recent runs first.
    pub fn list_sync_runs(&self, connector_id: &str, limit: usize) -> Result<Vec<SyncRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, connector_id, start_time, end_time, status, details FROM sync_runs
             WHERE connector_id = ?1 ORDER BY start_time DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![connector_id, limit as i64], |row| {
            Ok(SyncRun {
                run_id: row.get(0)?,
                connector_id: row.get(1)?,
                start_time: row.get(2)?,
                end_time: row.get(3)?,
                status: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                details: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn insert_database(conn: &Connection, connector_id: &str, new: &NewDatabase) -> Result<DatabaseNode> {
        let created_at = now_millis();
        conn.execute(
            "INSERT INTO mirror_databases (connector_id, internal_id, name, permission, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![connector_id, new.internal_id, new.name, new.permission.as_str(), created_at],
        )?;
        Ok(DatabaseNode {
            connector_id: connector_id.to_string(),
            internal_id: new.internal_id.clone(),
            name: new.name.clone(),
            permission: new.permission,
            created_at,
        })
    }

    fn insert_schema(conn: &Connection, connector_id: &str, new: &NewSchema) -> Result<SchemaNode> {
        let created_at = now_millis();
        conn.execute(
            "INSERT INTO mirror_schemas (connector_id, internal_id, name, database_name, permission, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                connector_id,
                new.internal_id,
                new.name,
                new.database_name,
                new.permission.as_str(),
                created_at
            ],
        )?;
        Ok(SchemaNode {
            connector_id: connector_id.to_string(),
            internal_id: new.internal_id.clone(),
            name: new.name.clone(),
            database_name: new.database_name.clone(),
            permission: new.permission,
            created_at,
        })
    }

    fn insert_table(conn: &Connection, connector_id: &str, new: &NewTable) -> Result<TableNode> {
        let created_at = now_millis();
        conn.execute(
            "INSERT INTO mirror_tables (connector_id, internal_id, name, schema_name, database_name, permission, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                connector_id,
                new.internal_id,
                new.name,
                new.schema_name,
                new.database_name,
                new.permission.as_str(),
                created_at
            ],
        )?;
        Ok(TableNode {
            connector_id: connector_id.to_string(),
            internal_id: new.internal_id.clone(),
            name: new.name.clone(),
            schema_name: new.schema_name.clone(),
            database_name: new.database_name.clone(),
            permission: new.permission,
            created_at,
            last_upserted_at: None,
        })
    }

    fn ensure_row(
        conn: &Connection,
        table: &str,
        connector_id: &str,
        internal_id: &str,
        insert: impl FnOnce(&Connection) -> Result<()>,
    ) -> Result<()> {
        let exists: Option<i64> = conn
            .query_row(
                &format!("SELECT 1 FROM {table} WHERE connector_id = ?1 AND internal_id = ?2"),
                params![connector_id, internal_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            insert(conn)?;
        }
        Ok(())
    }

    fn update_permission(
        conn: &Connection,
        table: &str,
        connector_id: &str,
        internal_id: &str,
        permission: Permission,
    ) -> Result<usize> {
        Ok(conn.execute(
            &format!(
                "UPDATE {table} SET permission = ?1 WHERE connector_id = ?2 AND internal_id = ?3"
            ),
            params![permission.as_str(), connector_id, internal_id],
        )?)
    }
}

impl MirrorStore for Catalog {
    fn list_databases(&self, connector_id: &str) -> Result<Vec<DatabaseNode>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT connector_id, internal_id, name, permission, created_at
             FROM mirror_databases WHERE connector_id = ?1 ORDER BY internal_id",
        )?;
        let rows = stmt.query_map(params![connector_id], database_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_schemas(&self, connector_id: &str) -> Result<Vec<SchemaNode>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT connector_id, internal_id, name, database_name, permission, created_at
             FROM mirror_schemas WHERE connector_id = ?1 ORDER BY internal_id",
        )?;
        let rows = stmt.query_map(params![connector_id], schema_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_tables(&self, connector_id: &str) -> Result<Vec<TableNode>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT connector_id, internal_id, name, schema_name, database_name, permission, created_at, last_upserted_at
             FROM mirror_tables WHERE connector_id = ?1 ORDER BY internal_id",
        )?;
        let rows = stmt.query_map(params![connector_id], table_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn create_database(&self, connector_id: &str, new: &NewDatabase) -> Result<DatabaseNode> {
        let conn = self.conn()?;
        Self::insert_database(&conn, connector_id, new)
    }

    fn create_schema(&self, connector_id: &str, new: &NewSchema) -> Result<SchemaNode> {
        let conn = self.conn()?;
        Self::insert_schema(&conn, connector_id, new)
    }

    fn create_table(&self, connector_id: &str, new: &NewTable) -> Result<TableNode> {
        let conn = self.conn()?;
        Self::insert_table(&conn, connector_id, new)
    }

    fn touch_table(&self, node: &TableNode, timestamp: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE mirror_tables SET last_upserted_at = ?1 WHERE connector_id = ?2 AND internal_id = ?3",
            params![timestamp, node.connector_id, node.internal_id],
        )?;
        Ok(())
    }

    fn destroy_database(&self, node: &DatabaseNode) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM mirror_databases WHERE connector_id = ?1 AND internal_id = ?2",
            params![node.connector_id, node.internal_id],
        )?;
        Ok(())
    }

    fn destroy_schema(&self, node: &SchemaNode) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM mirror_schemas WHERE connector_id = ?1 AND internal_id = ?2",
            params![node.connector_id, node.internal_id],
        )?;
        Ok(())
    }

    fn destroy_table(&self, node: &TableNode) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM mirror_tables WHERE connector_id = ?1 AND internal_id = ?2",
            params![node.connector_id, node.internal_id],
        )?;
        Ok(())
    }

    fn set_permission(
        &self,
        connector_id: &str,
        internal_id: &str,
        permission: Permission,
    ) -> Result<()> {
        let id = InternalId::parse(internal_id)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let table = match &id {
            InternalId::Database(_) => "mirror_databases",
            InternalId::Schema(_) => "mirror_schemas",
            InternalId::Table(_) => "mirror_tables",
        };
        let updated = Self::update_permission(&tx, table, connector_id, internal_id, permission)?;

        if updated == 0 {
            if permission == Permission::Inherited {
                return Err(MirrorError::NotFound(format!(
                    "{} {internal_id} for connector {connector_id}",
                    id.kind()
                )));
            }

            let database_id = match &id {
                InternalId::Database(db) => db.clone(),
                InternalId::Schema(schema) => schema.database_id(),
                InternalId::Table(t) => t.database_id(),
            };
            let database_permission = if matches!(id, InternalId::Database(_)) {
                permission
            } else {
                Permission::Inherited
            };
            Self::ensure_row(&tx, "mirror_databases", connector_id, database_id.database(), |c| {
                Self::insert_database(
                    c,
                    connector_id,
                    &NewDatabase {
                        internal_id: database_id.to_string(),
                        name: database_id.database().to_string(),
                        permission: database_permission,
                    },
                )
                .map(|_| ())
            })?;

            let schema_id = match &id {
                InternalId::Database(_) => None,
                InternalId::Schema(schema) => Some(schema.clone()),
                InternalId::Table(t) => Some(t.schema_id()),
            };
            if let Some(schema_id) = schema_id {
                let schema_key = schema_id.to_string();
                let schema_permission = if matches!(id, InternalId::Schema(_)) {
                    permission
                } else {
                    Permission::Inherited
                };
                Self::ensure_row(&tx, "mirror_schemas", connector_id, &schema_key, |c| {
                    Self::insert_schema(
                        c,
                        connector_id,
                        &NewSchema {
                            internal_id: schema_key.clone(),
                            name: schema_id.schema().to_string(),
                            database_name: schema_id.database().to_string(),
                            permission: schema_permission,
                        },
                    )
                    .map(|_| ())
                })?;
            }

            if let InternalId::Table(table_id) = &id {
                Self::insert_table(
                    &tx,
                    connector_id,
                    &NewTable {
                        internal_id: table_id.to_string(),
                        name: table_id.table().to_string(),
                        schema_name: table_id.schema().to_string(),
                        database_name: table_id.database().to_string(),
                        permission,
                    },
                )?;
            }
        }

        tx.commit()?;
        log::info!(
            "Set permission of {} {} to {} for connector {}",
            id.kind(),
            internal_id,
            permission,
            connector_id
        );
        Ok(())
    }
}
