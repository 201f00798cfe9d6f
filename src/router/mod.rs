// src/router/mod.rs

pub mod constraint;
pub mod diff;
pub mod matcher;
pub mod table;
pub mod update;

use std::sync::Arc;

use source_plugin::{Event, EventKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    notifier::dispatcher::Dispatcher,
    router::{
        constraint::RegexCache,
        matcher::{match_routes, MatchError},
        table::{Route, RouteTable},
        update::qualify_update,
    },
    source::scheduler::SourceBindingKey,
};

/// An event together with the plugin instance that produced it.
#[derive(Debug, Clone)]
pub struct SourceEvent {
    pub instance: SourceBindingKey,
    /// Sources the event is attributed to: the instance's bindings for
    /// streamed events, the posted source for external ones.
    pub sources: Vec<String>,
    pub event: Event,
}

/// Matches every incoming event against one route table generation and
/// hands the qualified sources to the dispatcher.
pub struct EventRouter {
    table: Arc<RouteTable>,
    cache: RegexCache,
    dispatcher: Arc<Dispatcher>,
}

impl EventRouter {
    pub fn new(table: Arc<RouteTable>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            table,
            cache: RegexCache::new(),
            dispatcher,
        }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Sources `event` qualifies for, limited to `sources` of the emitting
    /// instance. Diff text of update events is appended to the messages.
    pub fn qualify(&self, event: &mut Event, sources: &[String]) -> Vec<String> {
        if !event.is_resource_event() {
            return sources.to_vec();
        }

        let routes = self
            .table
            .routes(&event.resource_type, event.kind)
            .iter()
            .filter(|r: &&Route| sources.contains(&r.source));

        let (qualified, error) = if event.kind == EventKind::Update {
            let outcome = qualify_update(event, routes, &self.cache);
            event.messages.extend(outcome.diffs);
            (outcome.sources, outcome.error)
        } else {
            match_routes(event, routes, &self.cache).into_parts()
        };

        if let Some(err) = error {
            log_match_error(event, &err);
        }
        qualified
    }

    /// Qualify and dispatch one event to the channels whose bindings started
    /// the emitting instance. Returns the number of targets enqueued.
    pub fn route(&self, source_event: SourceEvent) -> usize {
        let SourceEvent { instance, sources, mut event } = source_event;
        let qualified = self.qualify(&mut event, &sources);
        if qualified.is_empty() {
            debug!(
                plugin = %instance.plugin,
                resource = %event.resource_type,
                kind = %event.kind,
                "event qualified for no source"
            );
            return 0;
        }
        self.dispatcher.dispatch(&event, &instance, &qualified)
    }

    /// Consume events until `cancel` fires or every producer is gone.
    /// Firing `drain` instead routes whatever is already buffered first.
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<SourceEvent>,
        cancel: CancellationToken,
        drain: CancellationToken,
    ) {
        info!(generation = self.table.generation(), routes = self.table.len(), "event router started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(source_event) => {
                        self.route(source_event);
                    }
                    None => break,
                },
                _ = drain.cancelled() => {
                    rx.close();
                    while let Some(source_event) = rx.recv().await {
                        self.route(source_event);
                    }
                    break;
                }
            }
        }
        info!("event router stopped");
    }
}

fn log_match_error(event: &Event, err: &MatchError) {
    warn!(
        resource = %event.resource_type,
        kind = %event.kind,
        skipped = err.len(),
        error = %err,
        "some routes were skipped while matching"
    );
}
