//! Shared fixtures for protection flow BDD scenarios.

use std::sync::Arc;
use std::time::Duration;

use bulwark::plugin::share::ShareSnapshotPlugin;
use bulwark::resource::SHARE_RESOURCE_TYPE;
use bulwark::test_support::{MemoryBankPlugin, ScriptedShareClient};
use bulwark::{
    Bank, Checkpoint, FlowReport, GraphExecutor, PluginRegistry, ProtectionFlow, Resource,
    StatusPoller,
};
use rstest::fixture;

#[derive(Clone, Debug, Default)]
pub struct FlowContext {
    pub service: ScriptedShareClient,
    pub store: MemoryBankPlugin,
    pub shares: Vec<Resource>,
    pub checkpoint_id: Option<String>,
    pub report: Option<FlowReport>,
}

impl FlowContext {
    pub fn bank(&self) -> Bank {
        Bank::new(self.store.clone())
    }

    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.checkpoint_id
            .as_ref()
            .map(|id| Checkpoint::new(self.bank(), id.clone()))
    }

    pub fn flow(&self) -> ProtectionFlow {
        let poller = StatusPoller::new(Duration::from_millis(1)).max_attempts(20);
        let mut registry = PluginRegistry::new();
        registry
            .register(Arc::new(ShareSnapshotPlugin::new(
                Arc::new(self.service.clone()),
                poller,
            )))
            .unwrap_or_else(|err| panic!("share plugin should register: {err}"));
        ProtectionFlow::new(Arc::new(registry), GraphExecutor::new())
    }
}

#[fixture]
pub fn flow_context() -> FlowContext {
    FlowContext::default()
}

pub fn share(id: &str) -> Resource {
    Resource::new(SHARE_RESOURCE_TYPE, id, id)
}
