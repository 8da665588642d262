//! Read-grant resolution over a mirror snapshot.
//!
//! Grants flow top-down: selecting a database grants every schema and table
//! beneath it, selecting a schema grants its tables. The resolver is built
//! once per sync from the nodes loaded at the start of the pass and never
//! touches the store again.

use std::collections::HashSet;

use crate::errors::Result;
use crate::models::{DatabaseNode, Permission, SchemaNode, TableNode};
use crate::utils::id::{SchemaId, TableId};

#[derive(Debug, Clone, Default)]
pub struct PermissionResolver {
    granted: HashSet<String>,
}

impl PermissionResolver {
    pub fn from_snapshot(
        databases: &[DatabaseNode],
        schemas: &[SchemaNode],
        tables: &[TableNode],
    ) -> Self {
        let granted = databases
            .iter()
            .filter(|db| db.permission == Permission::Selected)
            .map(|db| db.internal_id.clone())
            .chain(
                schemas
                    .iter()
                    .filter(|schema| schema.permission == Permission::Selected)
                    .map(|schema| schema.internal_id.clone()),
            )
            .chain(
                tables
                    .iter()
                    .filter(|table| table.permission == Permission::Selected)
                    .map(|table| table.internal_id.clone()),
            )
            .collect();
        Self { granted }
    }

    pub fn from_granted<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            granted: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn granted_ids(&self) -> &HashSet<String> {
        &self.granted
    }

    pub fn is_database_granted(&self, id: &str) -> bool {
        self.granted.contains(id)
    }

    pub fn is_schema_granted(&self, id: &str) -> Result<bool> {
        let schema = SchemaId::parse(id)?;
        Ok(self.granted.contains(schema.database()) || self.granted.contains(id))
    }

    pub fn is_table_granted(&self, id: &str) -> Result<bool> {
        let table = TableId::parse(id)?;
        let schema_id = table.schema_id().to_string();
        Ok(self.granted.contains(table.database())
            || self.granted.contains(&schema_id)
            || self.granted.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MirrorError;

    fn database(id: &str, permission: Permission) -> DatabaseNode {
        DatabaseNode {
            connector_id: "c1".into(),
            internal_id: id.into(),
            name: id.into(),
            permission,
            created_at: 0,
        }
    }

    fn schema(id: &str, permission: Permission) -> SchemaNode {
        let parsed = SchemaId::parse(id).unwrap();
        SchemaNode {
            connector_id: "c1".into(),
            internal_id: id.into(),
            name: parsed.schema().into(),
            database_name: parsed.database().into(),
            permission,
            created_at: 0,
        }
    }

    #[test]
    fn test_snapshot_collects_only_selected_ids() {
        let resolver = PermissionResolver::from_snapshot(
            &[database("d1", Permission::Selected), database("d2", Permission::Inherited)],
            &[schema("d2.s1", Permission::Selected), schema("d2.s2", Permission::Inherited)],
            &[],
        );
        let mut granted: Vec<_> = resolver.granted_ids().iter().cloned().collect();
        granted.sort();
        assert_eq!(granted, vec!["d1", "d2.s1"]);
    }

    #[test]
    fn test_database_grant_is_inherited_by_descendants() {
        let resolver = PermissionResolver::from_granted(["d1"]);
        assert!(resolver.is_database_granted("d1"));
        assert!(resolver.is_schema_granted("d1.any").unwrap());
        assert!(resolver.is_table_granted("d1.any.thing").unwrap());
        assert!(!resolver.is_table_granted("d2.any.thing").unwrap());
    }

    #[test]
    fn test_schema_grant_does_not_grant_database_or_siblings() {
        let resolver = PermissionResolver::from_granted(["d1.s1"]);
        assert!(!resolver.is_database_granted("d1"));
        assert!(resolver.is_schema_granted("d1.s1").unwrap());
        assert!(!resolver.is_schema_granted("d1.s2").unwrap());
        assert!(resolver.is_table_granted("d1.s1.t1").unwrap());
        assert!(!resolver.is_table_granted("d1.s2.t1").unwrap());
    }

    #[test]
    fn test_table_grant_is_leaf_only() {
        let resolver = PermissionResolver::from_granted(["d1.s1.t1"]);
        assert!(resolver.is_table_granted("d1.s1.t1").unwrap());
        assert!(!resolver.is_table_granted("d1.s1.t2").unwrap());
        assert!(!resolver.is_schema_granted("d1.s1").unwrap());
    }

    #[test]
    fn test_malformed_ids_are_errors() {
        let resolver = PermissionResolver::from_granted(["d1"]);
        assert!(matches!(
            resolver.is_schema_granted("d1"),
            Err(MirrorError::MalformedId { .. })
        ));
        assert!(matches!(
            resolver.is_table_granted("d1.s1"),
            Err(MirrorError::MalformedId { .. })
        ));
    }
}
