use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

#[cfg(feature = "metrics")]
use {crate::metric_names, metrics::gauge};
use {
    relaybot_channels::{Backend, inbound_queue},
    relaybot_routing::{RoutingTable, Target},
    tokio::task::JoinSet,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    Result, SupervisorError,
    router::{Destinations, route_messages},
};

/// Runtime tuning for [`Supervisor`].
#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    /// Capacity of each backend's inbound queue.
    pub queue_capacity: usize,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}

/// Owns every configured backend and the routing table, and runs the relay.
pub struct Supervisor {
    backends: Vec<Arc<dyn Backend>>,
    table: RoutingTable,
    options: SupervisorOptions,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field(
                "backends",
                &self.backends.iter().map(|b| b.name()).collect::<Vec<_>>(),
            )
            .field("routes", &self.table.len())
            .field("options", &self.options)
            .finish()
    }
}

impl Supervisor {
    /// Backends are connected in the order given. Fails when two backends
    /// share a name or a route references a backend that is not present.
    pub fn new(
        backends: Vec<Arc<dyn Backend>>,
        table: RoutingTable,
        options: SupervisorOptions,
    ) -> Result<Self> {
        let mut names = BTreeSet::new();
        for backend in &backends {
            if !names.insert(backend.name()) {
                return Err(SupervisorError::DuplicateBackend(backend.name().to_string()));
            }
        }
        table.check_backends(names.iter().copied())?;

        Ok(Self {
            backends,
            table,
            options,
        })
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    /// Connect and join every backend, then relay until shutdown.
    ///
    /// Any connect or join failure aborts startup after disconnecting the
    /// backends that were already connected. Once running, the first read
    /// failure stops every other read task and is returned. When `cancel`
    /// fires, returns [`SupervisorError::Cancelled`] after all read and
    /// routing tasks have finished.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        self.connect_all(&cancel).await?;
        self.join_all(&cancel).await?;
        self.run(cancel).await
    }

    async fn connect_all(&self, cancel: &CancellationToken) -> Result<()> {
        for (index, backend) in self.backends.iter().enumerate() {
            info!(backend = backend.name(), "connecting backend");
            let outcome = tokio::select! {
                _ = cancel.cancelled() => None,
                outcome = backend.connect() => Some(outcome),
            };

            match outcome {
                Some(Ok(())) => info!(backend = backend.name(), "backend connected"),
                Some(Err(source)) => {
                    error!(backend = backend.name(), error = %source, "backend failed to connect");
                    self.release(&self.backends[..index]).await;
                    return Err(SupervisorError::Connect {
                        backend: backend.name().to_string(),
                        source,
                    });
                },
                None => {
                    self.release(&self.backends[..=index]).await;
                    return Err(SupervisorError::Cancelled);
                },
            }
        }
        Ok(())
    }

    async fn join_all(&self, cancel: &CancellationToken) -> Result<()> {
        for backend in &self.backends {
            if cancel.is_cancelled() {
                self.release(&self.backends).await;
                return Err(SupervisorError::Cancelled);
            }

            let targets: Vec<Target> = self.table.joined_targets(backend.name()).into_iter().collect();
            debug!(backend = backend.name(), count = targets.len(), "setting targets");
            if let Err(source) = backend.set_targets(targets).await {
                error!(backend = backend.name(), error = %source, "backend failed to join targets");
                self.release(&self.backends).await;
                return Err(SupervisorError::Join {
                    backend: backend.name().to_string(),
                    source,
                });
            }
        }
        Ok(())
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        // Cancelling this stops every task without touching the caller's token.
        let group = cancel.child_token();
        let destinations: Arc<Destinations> = Arc::new(
            self.backends
                .iter()
                .map(|b| (b.name().to_string(), Arc::clone(b)))
                .collect::<BTreeMap<_, _>>(),
        );

        let mut readers = JoinSet::new();
        let mut routers = JoinSet::new();
        for backend in &self.backends {
            let (tx, rx) = inbound_queue(self.options.queue_capacity);

            routers.spawn(route_messages(
                backend.name().to_string(),
                rx,
                self.table.clone(),
                Arc::clone(&destinations),
                group.clone(),
            ));

            let reader = Arc::clone(backend);
            let token = group.clone();
            readers.spawn(async move {
                debug!(backend = reader.name(), "starting read");
                let outcome = reader.read(token, tx).await;
                (reader.name().to_string(), outcome)
            });
        }

        #[cfg(feature = "metrics")]
        gauge!(metric_names::BACKENDS_ACTIVE).set(self.backends.len() as f64);
        info!(backends = self.backends.len(), routes = self.table.len(), "relay running");

        let mut first_error = None;
        while let Some(joined) = readers.join_next().await {
            let failure = match joined {
                Ok((backend, Ok(()))) => {
                    info!(backend = %backend, "finished reading");
                    None
                },
                Ok((backend, Err(e))) if e.is_cancelled() => {
                    debug!(backend = %backend, "read cancelled");
                    None
                },
                // Shutdown was requested: whatever the read loop tripped over
                // while winding down is not a fault.
                Ok((backend, Err(e))) if cancel.is_cancelled() => {
                    debug!(backend = %backend, error = %e, "read ended during shutdown");
                    None
                },
                Ok((backend, Err(source))) => {
                    error!(backend = %backend, error = %source, "read failed");
                    Some(SupervisorError::Read { backend, source })
                },
                Err(e) => {
                    error!(error = %e, "read task failed");
                    Some(SupervisorError::Task(e.to_string()))
                },
            };

            #[cfg(feature = "metrics")]
            gauge!(metric_names::BACKENDS_ACTIVE).decrement(1.0);

            if let Some(failure) = failure
                && first_error.is_none()
            {
                first_error = Some(failure);
                group.cancel();
            }
        }

        group.cancel();
        while let Some(joined) = routers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "routing task failed");
            }
        }

        match first_error {
            Some(e) => Err(e),
            None if cancel.is_cancelled() => {
                info!("relay stopped");
                Err(SupervisorError::Cancelled)
            },
            None => Ok(()),
        }
    }

    async fn release(&self, backends: &[Arc<dyn Backend>]) {
        for backend in backends {
            match backend.disconnect().await {
                Ok(()) => debug!(backend = backend.name(), "backend released"),
                Err(e) => warn!(backend = backend.name(), error = %e, "failed to release backend"),
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::{Call, MockBackend},
        relaybot_routing::RouteEdge,
        rstest::rstest,
        std::{cmp::Ordering, time::Duration},
        tokio::task::JoinHandle,
    };

    fn edge(from: (&str, &str), to: (&str, &str)) -> RouteEdge {
        RouteEdge::new(Target::new(from.0, from.1), Target::new(to.0, to.1))
    }

    fn supervisor(backends: &[&Arc<MockBackend>], edges: Vec<RouteEdge>) -> Arc<Supervisor> {
        let backends = backends
            .iter()
            .map(|b| Arc::clone(*b) as Arc<dyn Backend>)
            .collect();
        Arc::new(Supervisor::new(backends, RoutingTable::new(edges), SupervisorOptions::default()).unwrap())
    }

    fn spawn(sup: &Arc<Supervisor>, cancel: &CancellationToken) -> JoinHandle<Result<()>> {
        let sup = Arc::clone(sup);
        let cancel = cancel.clone();
        tokio::spawn(async move { sup.start(cancel).await })
    }

    async fn finish(handle: JoinHandle<Result<()>>) -> Result<()> {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("start did not return in time")
            .unwrap()
    }

    #[tokio::test]
    async fn relays_irc_to_matrix() {
        let irc = MockBackend::new("irc1").says("#general", "alice", "hello").build();
        let matrix = MockBackend::new("matrix1").build();
        let sup = supervisor(&[&irc, &matrix], vec![edge(("irc1", "#general"), ("matrix1", "!room:x"))]);

        let cancel = CancellationToken::new();
        let handle = spawn(&sup, &cancel);

        let writes = matrix.wait_for_writes(1).await;
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].destination, Some(Target::new("matrix1", "!room:x")));
        assert_eq!(writes[0].render(), "(alice@irc1) hello");
        assert!(irc.writes().is_empty());

        cancel.cancel();
        assert!(finish(handle).await.unwrap_err().is_cancelled());
        assert_eq!(matrix.writes().len(), 1);
    }

    #[tokio::test]
    async fn sets_joined_targets_per_backend() {
        let irc = MockBackend::new("irc1").build();
        let matrix = MockBackend::new("matrix1").build();
        let sup = supervisor(&[&irc, &matrix], vec![
            edge(("irc1", "#general"), ("matrix1", "!room:x")),
            edge(("matrix1", "!room:x"), ("irc1", "#general")),
            edge(("matrix1", "!other:x"), ("irc1", "#general")),
        ]);

        let cancel = CancellationToken::new();
        let handle = spawn(&sup, &cancel);
        irc.wait_for_call(&Call::Read).await;
        matrix.wait_for_call(&Call::Read).await;

        assert_eq!(irc.calls()[..2], [
            Call::Connect,
            Call::SetTargets(vec![Target::new("irc1", "#general")]),
        ]);
        assert!(matrix.has_call(&Call::SetTargets(vec![
            Target::new("matrix1", "!other:x"),
            Target::new("matrix1", "!room:x"),
        ])));

        cancel.cancel();
        finish(handle).await.unwrap_err();
    }

    #[tokio::test]
    async fn fans_out_to_every_matching_edge() {
        let irc = MockBackend::new("irc1").says("#a", "alice", "hi").build();
        let matrix = MockBackend::new("matrix1").build();
        let sup = supervisor(&[&irc, &matrix], vec![
            edge(("irc1", "#a"), ("matrix1", "!x:h")),
            edge(("irc1", "#b"), ("matrix1", "!never:h")),
            edge(("irc1", "#a"), ("matrix1", "!y:h")),
            edge(("irc1", "#a"), ("irc1", "#c")),
        ]);

        let cancel = CancellationToken::new();
        let handle = spawn(&sup, &cancel);

        let matrix_writes = matrix.wait_for_writes(2).await;
        let irc_writes = irc.wait_for_writes(1).await;
        let rooms: Vec<_> = matrix_writes
            .iter()
            .map(|m| m.destination.as_ref().unwrap().room.as_str())
            .collect();
        assert_eq!(rooms, vec!["!x:h", "!y:h"]);
        assert_eq!(irc_writes[0].destination, Some(Target::new("irc1", "#c")));
        assert!(
            matrix_writes
                .iter()
                .chain(&irc_writes)
                .all(|m| m.render() == "(alice@irc1) hi")
        );

        cancel.cancel();
        finish(handle).await.unwrap_err();
        assert_eq!(matrix.writes().len(), 2);
        assert_eq!(irc.writes().len(), 1);
    }

    #[tokio::test]
    async fn preserves_order_per_source() {
        let irc = MockBackend::new("irc1")
            .says("#a", "alice", "one")
            .says("#a", "bob", "two")
            .says("#a", "alice", "three")
            .build();
        let matrix = MockBackend::new("matrix1").build();
        let sup = supervisor(&[&irc, &matrix], vec![edge(("irc1", "#a"), ("matrix1", "!x:h"))]);

        let cancel = CancellationToken::new();
        let handle = spawn(&sup, &cancel);

        let texts: Vec<_> = matrix
            .wait_for_writes(3)
            .await
            .iter()
            .map(|m| m.payload.text.clone())
            .collect();
        assert_eq!(texts, vec!["one", "two", "three"]);

        cancel.cancel();
        finish(handle).await.unwrap_err();
    }

    #[tokio::test]
    async fn write_failure_does_not_stop_routing() {
        let irc = MockBackend::new("irc1")
            .says("#a", "alice", "first")
            .says("#a", "alice", "second")
            .build();
        let matrix = MockBackend::new("matrix1").failing_write_to("!bad:h").build();
        let sup = supervisor(&[&irc, &matrix], vec![
            edge(("irc1", "#a"), ("matrix1", "!bad:h")),
            edge(("irc1", "#a"), ("matrix1", "!good:h")),
        ]);

        let cancel = CancellationToken::new();
        let handle = spawn(&sup, &cancel);

        let writes = matrix.wait_for_writes(4).await;
        let good: Vec<_> = writes
            .iter()
            .filter(|m| m.destination == Some(Target::new("matrix1", "!good:h")))
            .map(|m| m.payload.text.as_str())
            .collect();
        assert_eq!(good, vec!["first", "second"]);

        cancel.cancel();
        assert!(finish(handle).await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn second_connect_failure_aborts_and_releases_first() {
        let first = MockBackend::new("a").build();
        let second = MockBackend::new("b").failing_connect().build();
        let third = MockBackend::new("c").build();
        let sup = supervisor(&[&first, &second, &third], vec![edge(("a", "#x"), ("c", "#y"))]);

        let err = sup.start(CancellationToken::new()).await.unwrap_err();
        match &err {
            SupervisorError::Connect { backend, source } => {
                assert_eq!(backend, "b");
                assert!(matches!(source, relaybot_channels::Error::Connect { .. }));
            },
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.backend(), Some("b"));

        assert_eq!(first.calls(), vec![Call::Connect, Call::Disconnect]);
        assert_eq!(second.calls(), vec![Call::Connect]);
        assert!(third.calls().is_empty());
    }

    #[rstest]
    #[case::first(0)]
    #[case::second(1)]
    #[case::last(2)]
    #[tokio::test]
    async fn connect_failure_releases_only_earlier_backends(#[case] failing: usize) {
        let backends: Vec<_> = ["a", "b", "c"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let mock = MockBackend::new(name);
                let mock = if i == failing { mock.failing_connect() } else { mock };
                mock.build()
            })
            .collect();
        let refs: Vec<_> = backends.iter().collect();
        let sup = supervisor(&refs, Vec::new());

        let err = sup.start(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.backend(), Some(backends[failing].name()));

        for (i, backend) in backends.iter().enumerate() {
            let expected = match i.cmp(&failing) {
                Ordering::Less => vec![Call::Connect, Call::Disconnect],
                Ordering::Equal => vec![Call::Connect],
                Ordering::Greater => Vec::new(),
            };
            assert_eq!(backend.calls(), expected, "backend {}", backend.name());
        }
    }

    #[tokio::test]
    async fn join_failure_aborts_and_releases_all() {
        let first = MockBackend::new("a").build();
        let second = MockBackend::new("b").failing_join().build();
        let sup = supervisor(&[&first, &second], vec![edge(("a", "#x"), ("b", "#y"))]);

        let err = sup.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Join { ref backend, .. } if backend == "b"));

        for backend in [&first, &second] {
            assert!(backend.has_call(&Call::Disconnect));
            assert!(!backend.has_call(&Call::Read));
        }
    }

    #[tokio::test]
    async fn cancellation_stops_every_task_promptly() {
        let backends: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|name| MockBackend::new(name).build())
            .collect();
        let refs: Vec<_> = backends.iter().collect();
        let sup = supervisor(&refs, vec![
            edge(("a", "#x"), ("b", "#y")),
            edge(("b", "#y"), ("c", "#z")),
        ]);

        let cancel = CancellationToken::new();
        let handle = spawn(&sup, &cancel);
        for backend in &backends {
            backend.wait_for_call(&Call::Read).await;
        }

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("start must return promptly after cancellation")
            .unwrap();
        assert!(matches!(result, Err(SupervisorError::Cancelled)));
        for backend in &backends {
            assert!(backend.has_call(&Call::ReadReturned));
        }
    }

    #[tokio::test]
    async fn cancellation_during_connect_releases_backend() {
        let first = MockBackend::new("a").build();
        let stuck = MockBackend::new("b").hanging_connect().build();
        let sup = supervisor(&[&first, &stuck], Vec::new());

        let cancel = CancellationToken::new();
        let handle = spawn(&sup, &cancel);
        stuck.wait_for_call(&Call::Connect).await;

        cancel.cancel();
        assert!(finish(handle).await.unwrap_err().is_cancelled());
        assert!(first.has_call(&Call::Disconnect));
        assert!(stuck.has_call(&Call::Disconnect));
    }

    #[tokio::test]
    async fn first_read_error_cancels_the_rest() {
        let broken = MockBackend::new("irc1").failing_read("connection reset").build();
        let healthy = MockBackend::new("matrix1").build();
        let sup = supervisor(&[&broken, &healthy], vec![edge(("irc1", "#a"), ("matrix1", "!x:h"))]);

        let cancel = CancellationToken::new();
        let err = finish(spawn(&sup, &cancel)).await.unwrap_err();

        match err {
            SupervisorError::Read { backend, source } => {
                assert_eq!(backend, "irc1");
                assert!(source.to_string().contains("connection reset"));
            },
            other => panic!("unexpected error: {other}"),
        }
        assert!(healthy.has_call(&Call::ReadReturned));
        assert!(!cancel.is_cancelled(), "caller's token must stay untouched");
    }

    #[tokio::test]
    async fn messages_dequeued_before_a_failure_are_still_routed() {
        let broken = MockBackend::new("irc1")
            .says("#a", "alice", "last words")
            .failing_read("gone")
            .build();
        let matrix = MockBackend::new("matrix1").build();
        let sup = supervisor(&[&broken, &matrix], vec![edge(("irc1", "#a"), ("matrix1", "!x:h"))]);

        let err = sup.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Read { ref backend, .. } if backend == "irc1"));
        let writes = matrix.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].render(), "(alice@irc1) last words");
    }

    #[tokio::test]
    async fn cancellation_under_traffic_is_not_a_fault() {
        let irc = MockBackend::new("irc1").flooding("#a").build();
        let matrix = MockBackend::new("matrix1").build();
        let backends = vec![
            Arc::clone(&irc) as Arc<dyn Backend>,
            Arc::clone(&matrix) as Arc<dyn Backend>,
        ];
        let table = RoutingTable::new(vec![edge(("irc1", "#a"), ("matrix1", "!x:h"))]);
        let sup = Arc::new(Supervisor::new(backends, table, SupervisorOptions { queue_capacity: 4 }).unwrap());

        let cancel = CancellationToken::new();
        let handle = spawn(&sup, &cancel);
        matrix.wait_for_writes(8).await;

        cancel.cancel();
        let err = finish(handle).await.unwrap_err();
        assert!(err.is_cancelled(), "{err:?}");
        assert!(irc.has_call(&Call::ReadReturned));
    }

    #[test]
    fn rejects_duplicate_backend_names() {
        let a = Arc::new(MockBackend::new("dup")) as Arc<dyn Backend>;
        let b = Arc::new(MockBackend::new("dup")) as Arc<dyn Backend>;
        let err = Supervisor::new(vec![a, b], RoutingTable::default(), SupervisorOptions::default())
            .unwrap_err();
        assert!(matches!(err, SupervisorError::DuplicateBackend(ref name) if name == "dup"));
    }

    #[test]
    fn rejects_routes_to_unknown_backends() {
        let a = Arc::new(MockBackend::new("irc1")) as Arc<dyn Backend>;
        let table = RoutingTable::new(vec![edge(("irc1", "#a"), ("matrix9", "!x:h"))]);
        let err = Supervisor::new(vec![a], table, SupervisorOptions::default()).unwrap_err();
        assert!(matches!(err, SupervisorError::Routing(_)));
        assert!(err.to_string().contains("matrix9"));
    }

    #[test]
    fn exposes_configuration() {
        let a = Arc::new(MockBackend::new("irc1")) as Arc<dyn Backend>;
        let b = Arc::new(MockBackend::new("matrix1")) as Arc<dyn Backend>;
        let table = RoutingTable::new(vec![edge(("irc1", "#a"), ("matrix1", "!x:h"))]);
        let sup = Supervisor::new(vec![a, b], table, SupervisorOptions::default()).unwrap();
        assert_eq!(sup.backend_names(), vec!["irc1", "matrix1"]);
        assert_eq!(sup.routing_table().len(), 1);
        assert!(format!("{sup:?}").contains("matrix1"));
    }
}
