use mirrorstore::models::{RemoteDatabase, RemoteSchema, RemoteTable, RemoteTree};

use crate::models::{CatalogSnapshot, WarehouseDatabase, WarehouseSchema, WarehouseTable};

pub fn build_remote_table(table: &WarehouseTable) -> RemoteTable {
    RemoteTable {
        name: table.name.clone(),
        database_name: table.database_name.clone(),
        schema_name: table.schema_name.clone(),
        description: table
            .description
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
    }
}

pub fn build_remote_schema(schema: &WarehouseSchema, tables: &[WarehouseTable]) -> RemoteSchema {
    RemoteSchema {
        name: schema.name.clone(),
        database_name: schema.database_name.clone(),
        tables: tables.iter().map(build_remote_table).collect(),
    }
}

pub fn build_remote_database(database: &WarehouseDatabase, schemas: Vec<RemoteSchema>) -> RemoteDatabase {
    RemoteDatabase {
        name: database.name.clone(),
        schemas,
    }
}

/// Flattens a tree back into the listing format stored in snapshot files.
pub fn flatten_tree(tree: &RemoteTree) -> CatalogSnapshot {
    let mut snapshot = CatalogSnapshot::default();
    for database in &tree.databases {
        snapshot.databases.push(WarehouseDatabase {
            name: database.name.clone(),
        });
        for schema in &database.schemas {
            snapshot.schemas.push(WarehouseSchema {
                name: schema.name.clone(),
                database_name: schema.database_name.clone(),
            });
            snapshot
                .tables
                .extend(schema.tables.iter().map(|table| WarehouseTable {
                    name: table.name.clone(),
                    database_name: table.database_name.clone(),
                    schema_name: table.schema_name.clone(),
                    description: table.description.clone(),
                }));
        }
    }
    snapshot
}
