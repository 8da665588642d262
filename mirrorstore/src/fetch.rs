use crate::errors::Result;
use crate::models::{Connector, RemoteTree};
use async_trait::async_trait;

/// Produces a snapshot of a remote warehouse catalog for one connector.
#[async_trait]
pub trait RemoteTreeProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch_tree(&self, connector: &Connector) -> Result<RemoteTree>;
}

/// Serves a fixed tree, for snapshots loaded up front.
pub struct StaticTreeProvider {
    name: &'static str,
    tree: RemoteTree,
}

impl StaticTreeProvider {
    pub fn new(name: &'static str, tree: RemoteTree) -> Self {
        Self { name, tree }
    }
}

#[async_trait]
impl RemoteTreeProvider for StaticTreeProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch_tree(&self, _connector: &Connector) -> Result<RemoteTree> {
        Ok(self.tree.clone())
    }
}
