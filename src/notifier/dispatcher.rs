// src/notifier/dispatcher.rs

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use source_plugin::Event;
use thiserror::Error;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::{message::GenericMessage, notifier::NotifierTarget, source::scheduler::SourceBindingKey};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("notifier `{notifier}` failed: {reason}")]
    Delivery { notifier: String, reason: String },
    #[error("notifier `{0}` panicked while delivering")]
    Panicked(String),
}

struct Delivery {
    message: Arc<GenericMessage>,
    channels: Vec<String>,
}

struct Worker {
    target: NotifierTarget,
    tx: mpsc::UnboundedSender<Delivery>,
}

/// Fans qualified events out to notifier targets.
///
/// Every target owns one unbounded queue drained by one worker task, so a
/// slow or failing target never holds up the others and deliveries to the
/// same target keep their enqueue order.
pub struct Dispatcher {
    workers: Vec<Worker>,
    drain: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn one worker per target. Cancelling `cancel` abandons whatever is
    /// still queued; a delivery already in flight runs to completion.
    pub fn start(targets: Vec<NotifierTarget>, cancel: CancellationToken) -> Arc<Self> {
        let drain = CancellationToken::new();
        let mut workers = Vec::with_capacity(targets.len());
        let mut handles = Vec::with_capacity(targets.len());

        for target in targets {
            let (tx, rx) = mpsc::unbounded_channel();
            handles.push(tokio::spawn(run_worker(
                target.clone(),
                rx,
                cancel.clone(),
                drain.clone(),
            )));
            workers.push(Worker { target, tx });
        }
        debug!(workers = workers.len(), "dispatcher started");

        Arc::new(Self {
            workers,
            drain,
            handles: Mutex::new(handles),
        })
    }

    /// Enqueue `event`, emitted by `instance`, for every target with a
    /// channel whose binding started that instance and covers one of
    /// `qualified`. Never waits for delivery. Returns the number of targets
    /// enqueued.
    pub fn dispatch(&self, event: &Event, instance: &SourceBindingKey, qualified: &[String]) -> usize {
        if qualified.is_empty() {
            return 0;
        }
        let message = Arc::new(GenericMessage::from_event(event, qualified));
        let mut enqueued = 0;

        for worker in &self.workers {
            let channels = worker.target.bound_channels(instance, qualified);
            if channels.is_empty() {
                continue;
            }
            let delivery = Delivery { message: message.clone(), channels };
            match worker.tx.send(delivery) {
                Ok(()) => enqueued += 1,
                Err(_) => warn!(notifier = %worker.target.name(), "dispatcher closed, event dropped"),
            }
        }
        trace!(id = %message.id, enqueued, "event dispatched");
        enqueued
    }

    pub fn target_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting deliveries, flush every queue and wait for the workers.
    pub async fn close(&self) {
        self.drain.cancel();
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "notifier worker ended abnormally");
            }
        }
    }
}

async fn run_worker(
    target: NotifierTarget,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    cancel: CancellationToken,
    drain: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(notifier = %target.name(), queued = rx.len(), "cancelled, abandoning queued deliveries");
                break;
            }
            next = rx.recv() => match next {
                Some(delivery) => deliver(&target, delivery).await,
                None => break,
            },
            _ = drain.cancelled() => {
                rx.close();
                while let Some(delivery) = rx.recv().await {
                    deliver(&target, delivery).await;
                }
                break;
            }
        }
    }
    trace!(notifier = %target.name(), "worker stopped");
}

async fn deliver(target: &NotifierTarget, delivery: Delivery) {
    let name = target.name().to_string();
    let outcome = AssertUnwindSafe(target.deliver(&delivery.message, &delivery.channels))
        .catch_unwind()
        .await;

    let err = match outcome {
        Ok(Ok(())) => {
            trace!(notifier = %name, id = %delivery.message.id, "delivered");
            return;
        }
        Ok(Err(err)) => DispatchError::Delivery { notifier: name.clone(), reason: format!("{err:#}") },
        Err(_) => DispatchError::Panicked(name.clone()),
    };
    error!(notifier = %name, channels = ?delivery.channels, error = %err, "delivery failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ChannelBinding,
        notifier::test_util::RecordingNotifier,
    };

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn mock(sources: &[&str]) -> SourceBindingKey {
        SourceBindingKey::new("mock", &names(sources))
    }

    fn binding(channel: &str, sources: &[&str]) -> ChannelBinding {
        ChannelBinding {
            channel: channel.into(),
            sources: names(sources),
            instances: vec![mock(sources)],
        }
    }

    fn bot(notifier: &Arc<RecordingNotifier>, sources: &[&str]) -> NotifierTarget {
        NotifierTarget::Bot {
            bot: notifier.clone(),
            channels: vec![binding("main", sources)],
        }
    }

    fn sink(notifier: &Arc<RecordingNotifier>, sources: &[&str]) -> NotifierTarget {
        NotifierTarget::Sink {
            sink: notifier.clone(),
            binding: binding(&notifier.name, sources),
        }
    }

    fn event(reason: &str) -> Event {
        Event::default().with_reason(reason)
    }

    #[tokio::test]
    async fn only_bound_targets_receive() {
        let a = Arc::new(RecordingNotifier::named("a"));
        let b = Arc::new(RecordingNotifier::named("b"));
        let dispatcher = Dispatcher::start(vec![bot(&a, &["s1"]), sink(&b, &["s2"])], CancellationToken::new());

        assert_eq!(dispatcher.dispatch(&event("one"), &mock(&["s1"]), &names(&["s1"])), 1);
        assert_eq!(dispatcher.dispatch(&event("none"), &mock(&["s1"]), &[]), 0);
        dispatcher.close().await;

        assert_eq!(a.deliveries(), vec![("one".to_string(), vec!["main".to_string()])]);
        assert!(b.deliveries().is_empty());
    }

    #[tokio::test]
    async fn failing_and_panicking_targets_are_isolated() {
        let ok = Arc::new(RecordingNotifier::named("ok"));
        let failing = Arc::new(RecordingNotifier { fail: true, ..RecordingNotifier::named("failing") });
        let panicking = Arc::new(RecordingNotifier { panic: true, ..RecordingNotifier::named("panicking") });
        let dispatcher = Dispatcher::start(
            vec![sink(&failing, &["s"]), sink(&panicking, &["s"]), sink(&ok, &["s"])],
            CancellationToken::new(),
        );

        assert_eq!(dispatcher.dispatch(&event("first"), &mock(&["s"]), &names(&["s"])), 3);
        assert_eq!(dispatcher.dispatch(&event("second"), &mock(&["s"]), &names(&["s"])), 3);
        dispatcher.close().await;

        let titles: Vec<_> = ok.deliveries().into_iter().map(|(t, _)| t).collect();
        assert_eq!(titles, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn per_target_order_is_preserved() {
        let target = Arc::new(RecordingNotifier::named("ordered"));
        let dispatcher = Dispatcher::start(vec![sink(&target, &["s"])], CancellationToken::new());
        for i in 0..50 {
            dispatcher.dispatch(&event(&format!("e{i}")), &mock(&["s"]), &names(&["s"]));
        }
        dispatcher.close().await;

        let titles: Vec<_> = target.deliveries().into_iter().map(|(t, _)| t).collect();
        let expected: Vec<_> = (0..50).map(|i| format!("e{i}")).collect();
        assert_eq!(titles, expected);
    }

    #[tokio::test]
    async fn dispatch_after_close_is_dropped() {
        let target = Arc::new(RecordingNotifier::named("late"));
        let dispatcher = Dispatcher::start(vec![sink(&target, &["s"])], CancellationToken::new());
        dispatcher.close().await;
        assert_eq!(dispatcher.dispatch(&event("late"), &mock(&["s"]), &names(&["s"])), 0);
        assert!(target.deliveries().is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_workers() {
        let cancel = CancellationToken::new();
        let target = Arc::new(RecordingNotifier::named("cancelled"));
        let dispatcher = Dispatcher::start(vec![sink(&target, &["s"])], cancel.clone());
        cancel.cancel();
        dispatcher.close().await;
        assert_eq!(dispatcher.dispatch(&event("after"), &mock(&["s"]), &names(&["s"])), 0);
    }

    #[tokio::test]
    async fn differently_ordered_bindings_get_their_own_instances_only() {
        let log = Arc::new(RecordingNotifier::named("log"));
        let audit = Arc::new(RecordingNotifier::named("audit"));
        let dispatcher = Dispatcher::start(
            vec![sink(&log, &["a", "b"]), sink(&audit, &["b", "a"])],
            CancellationToken::new(),
        );

        assert_eq!(dispatcher.dispatch(&event("from-ab"), &mock(&["a", "b"]), &names(&["a", "b"])), 1);
        assert_eq!(dispatcher.dispatch(&event("from-ba"), &mock(&["b", "a"]), &names(&["b", "a"])), 1);
        dispatcher.close().await;

        assert_eq!(log.deliveries(), vec![("from-ab".to_string(), vec!["log".to_string()])]);
        assert_eq!(audit.deliveries(), vec![("from-ba".to_string(), vec!["audit".to_string()])]);
    }
}
