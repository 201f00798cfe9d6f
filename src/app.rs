// src/app.rs

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use source_plugin::SourcePlugin;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    config::Config,
    notifier::{dispatcher::Dispatcher, targets_from_config, NotifierTarget},
    router::{table::RouteTable, EventRouter},
    source::{host::PluginHost, scheduler::Scheduler, webhook_source::WebhookSource},
    webhook::WebhookBridge,
};

static GENERATION: AtomicU64 = AtomicU64::new(0);

/// Everything one configuration generation runs on. A new configuration
/// means a new `App`, never a patched one.
pub struct App {
    pub table: Arc<RouteTable>,
    pub dispatcher: Arc<Dispatcher>,
    pub router: Arc<EventRouter>,
    pub host: Arc<PluginHost>,
    pub scheduler: Arc<Scheduler>,
    pub bridge: Arc<WebhookBridge>,
    router_drain: CancellationToken,
    router_task: JoinHandle<()>,
}

impl App {
    /// Wire up notifiers from `config.communications`, register the built-in
    /// webhook source plus `plugins`, and start every plugin instance.
    pub async fn bootstrap(
        config: &Config,
        plugins: Vec<Arc<dyn SourcePlugin>>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let targets = targets_from_config(config)?;
        Self::bootstrap_with_targets(config, plugins, targets, cancel).await
    }

    pub async fn bootstrap_with_targets(
        config: &Config,
        plugins: Vec<Arc<dyn SourcePlugin>>,
        targets: Vec<NotifierTarget>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let generation = GENERATION.fetch_add(1, Ordering::SeqCst) + 1;
        let table = Arc::new(RouteTable::build(config, generation).context("cannot build route table")?);

        let dispatcher = Dispatcher::start(targets, cancel.child_token());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let router = Arc::new(EventRouter::new(table.clone(), dispatcher.clone()));
        let router_drain = CancellationToken::new();
        let router_task = tokio::spawn(router.clone().run(events_rx, cancel.child_token(), router_drain.clone()));

        let host = Arc::new(PluginHost::new(events_tx, cancel.child_token()));
        host.register(Arc::new(WebhookSource));
        for plugin in plugins {
            host.register(plugin);
        }

        let scheduler = Arc::new(Scheduler::new(config.sources.clone(), host.clone()));
        let started = scheduler
            .schedule_all(config)
            .await
            .context("cannot start source plugins")?;
        let bridge = Arc::new(WebhookBridge::new(scheduler.clone(), host.clone()));

        info!(
            generation,
            routes = table.len(),
            notifiers = dispatcher.target_count(),
            instances = started,
            "kubecast bootstrapped"
        );

        Ok(Self {
            table,
            dispatcher,
            router,
            host,
            scheduler,
            bridge,
            router_drain,
            router_task,
        })
    }

    /// Stop sources, let the router finish, then flush notifier queues.
    pub async fn shutdown(self) {
        self.host.shutdown().await;
        self.router_drain.cancel();
        if let Err(err) = self.router_task.await {
            error!(error = %err, "event router ended abnormally");
        }
        self.dispatcher.close().await;
        info!("kubecast stopped");
    }
}
