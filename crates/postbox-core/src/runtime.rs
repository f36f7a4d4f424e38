use std::sync::Arc;

use anyhow::Result;

use crate::config::CoreConfig;
use crate::managers::{
    managed_autoexpire_story_operations, managed_autoremove_message_operations, AutoremoveMode,
    ManagerContext, ManagerHandle, NetworkTimeSource,
};
use crate::seed::SeedConfiguration;
use crate::stats::SharedTransactionStats;
use crate::store::Postbox;

/// A postbox together with its background managers.
pub struct CoreRuntime {
    postbox: Postbox,
    managers: Vec<ManagerHandle>,
}

impl CoreRuntime {
    /// Open the store from `config` and start the managers. Must be called
    /// from within a Tokio runtime.
    pub fn start(
        config: CoreConfig,
        seed: SeedConfiguration,
        time_source: Arc<dyn NetworkTimeSource>,
    ) -> Result<Self> {
        let postbox = Postbox::open(&config, seed)?;
        Ok(Self::with_postbox(postbox, &config, time_source))
    }

    pub fn with_postbox(
        postbox: Postbox,
        config: &CoreConfig,
        time_source: Arc<dyn NetworkTimeSource>,
    ) -> Self {
        let context = ManagerContext::from_config(postbox.clone(), time_source, config);

        let managers = vec![
            managed_autoremove_message_operations(
                context
                    .clone()
                    .with_span(tracing::info_span!("manager", name = "autoremove")),
                AutoremoveMode::Remove,
            ),
            managed_autoremove_message_operations(
                context
                    .clone()
                    .with_span(tracing::info_span!("manager", name = "autoclear")),
                AutoremoveMode::Clear,
            ),
            managed_autoexpire_story_operations(
                context.with_span(tracing::info_span!("manager", name = "autoexpire_stories")),
                config.story_expiration_slack_secs,
            ),
        ];
        tracing::info!("Started {} managers", managers.len());

        Self { postbox, managers }
    }

    pub fn postbox(&self) -> Postbox {
        self.postbox.clone()
    }

    pub fn stats(&self) -> SharedTransactionStats {
        self.postbox.stats()
    }

    pub fn managers(&self) -> &[ManagerHandle] {
        &self.managers
    }

    /// Stop every manager. The store itself closes when the last
    /// [`Postbox`] handle is dropped.
    pub fn shutdown(&mut self) {
        for manager in self.managers.drain(..) {
            manager.dispose();
        }
    }
}

impl Drop for CoreRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::FixedTimeOffset;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = tempdir().unwrap();
        let config = CoreConfig::new(dir.path());
        let mut runtime = CoreRuntime::start(
            config,
            SeedConfiguration::messenger_default(),
            Arc::new(FixedTimeOffset::new(0.0)),
        )
        .unwrap();

        let names: Vec<_> = runtime.managers().iter().map(ManagerHandle::name).collect();
        assert_eq!(names, vec!["autoremove", "autoclear", "autoexpire_stories"]);

        let count = runtime
            .postbox()
            .transaction(|txn| txn.message_count())
            .await
            .unwrap();
        assert_eq!(count, 0);

        runtime.shutdown();
        assert!(runtime.managers().is_empty());
    }
}
