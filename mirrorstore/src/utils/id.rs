//! Composite internal ids for mirrored catalog nodes.
//!
//! A node's internal id is its ancestor path joined with `.`:
//! `database`, `database.schema`, `database.schema.table`. The id is the only
//! way levels refer to one another, so every encode/decode goes through here.
//! Segments may not be empty and may not contain the separator; anything else
//! is rejected as malformed.

use std::fmt;

use crate::errors::{MirrorError, Result};
use crate::models::NodeKind;

pub const SEPARATOR: char = '.';

fn check_segment(full: &str, segment: &str, what: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(MirrorError::malformed(full, format!("empty {what} name")));
    }
    if segment.contains(SEPARATOR) {
        return Err(MirrorError::malformed(
            full,
            format!("{what} name '{segment}' contains '{SEPARATOR}'"),
        ));
    }
    Ok(())
}

fn split_exact<'a>(raw: &'a str, expected: usize, what: &str) -> Result<Vec<&'a str>> {
    let parts: Vec<&str> = raw.split(SEPARATOR).collect();
    if parts.len() != expected {
        return Err(MirrorError::malformed(
            raw,
            format!(
                "{what} id needs {expected} segment(s), found {}",
                parts.len()
            ),
        ));
    }
    Ok(parts)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatabaseId {
    database: String,
}

impl DatabaseId {
    pub fn new(database: impl Into<String>) -> Result<Self> {
        let database = database.into();
        check_segment(&database, &database, "database")?;
        Ok(Self { database })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Self::new(raw)
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn parents(&self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.database)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId {
    database: String,
    schema: String,
}

impl SchemaId {
    pub fn new(database: impl Into<String>, schema: impl Into<String>) -> Result<Self> {
        let database = database.into();
        let schema = schema.into();
        let full = format!("{database}{SEPARATOR}{schema}");
        check_segment(&full, &database, "database")?;
        check_segment(&full, &schema, "schema")?;
        Ok(Self { database, schema })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let parts = split_exact(raw, 2, "schema")?;
        check_segment(raw, parts[0], "database")?;
        check_segment(raw, parts[1], "schema")?;
        Ok(Self {
            database: parts[0].to_string(),
            schema: parts[1].to_string(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn database_id(&self) -> DatabaseId {
        DatabaseId {
            database: self.database.clone(),
        }
    }

    /// Self first, then the database.
    pub fn parents(&self) -> Vec<String> {
        vec![self.to_string(), self.database.clone()]
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.database, self.schema)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId {
    database: String,
    schema: String,
    table: String,
}

impl TableId {
    pub fn new(
        database: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self> {
        let database = database.into();
        let schema = schema.into();
        let table = table.into();
        let full = format!("{database}{SEPARATOR}{schema}{SEPARATOR}{table}");
        check_segment(&full, &database, "database")?;
        check_segment(&full, &schema, "schema")?;
        check_segment(&full, &table, "table")?;
        Ok(Self {
            database,
            schema,
            table,
        })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let parts = split_exact(raw, 3, "table")?;
        check_segment(raw, parts[0], "database")?;
        check_segment(raw, parts[1], "schema")?;
        check_segment(raw, parts[2], "table")?;
        Ok(Self {
            database: parts[0].to_string(),
            schema: parts[1].to_string(),
            table: parts[2].to_string(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema_id(&self) -> SchemaId {
        SchemaId {
            database: self.database.clone(),
            schema: self.schema.clone(),
        }
    }

    pub fn database_id(&self) -> DatabaseId {
        DatabaseId {
            database: self.database.clone(),
        }
    }

    /// Self first, then schema, then database.
    pub fn parents(&self) -> Vec<String> {
        vec![
            self.to_string(),
            self.schema_id().to_string(),
            self.database.clone(),
        ]
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.database, self.schema, self.table
        )
    }
}

/// An id of any level; the segment count decides which.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InternalId {
    Database(DatabaseId),
    Schema(SchemaId),
    Table(TableId),
}

impl InternalId {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split(SEPARATOR).count() {
            1 => DatabaseId::parse(raw).map(InternalId::Database),
            2 => SchemaId::parse(raw).map(InternalId::Schema),
            3 => TableId::parse(raw).map(InternalId::Table),
            n => Err(MirrorError::malformed(
                raw,
                format!("expected 1 to 3 segments, found {n}"),
            )),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            InternalId::Database(_) => NodeKind::Database,
            InternalId::Schema(_) => NodeKind::Schema,
            InternalId::Table(_) => NodeKind::Table,
        }
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InternalId::Database(id) => id.fmt(f),
            InternalId::Schema(id) => id.fmt(f),
            InternalId::Table(id) => id.fmt(f),
        }
    }
}
