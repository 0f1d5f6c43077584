//! Poll-based reconciliation: emulating push on top of read.
//!
//! The store only answers reads, so each client runs small polling tasks
//! that publish snapshots into `tokio::sync::watch` channels. Consumers see
//! "latest observed state" and nothing else; a real subscription backend
//! could feed the same channels without touching the coordinator. Dedup is
//! by store version, so a tick without a remote write publishes nothing.
//!
//! Correctness never depends on the interval values, only on eventual
//! delivery; the defaults are short enough that approval and completion feel
//! immediate to a human.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::coordinator::{CoordinatorError, Phase, SessionCoordinator};
use crate::module::ModuleKind;
use crate::session::PracticeSession;
use crate::store::{SessionFilter, SessionStore, StoreError};

/// Polling cadences. Discovery is a coarse background refresh; the session
/// interval is the fine one used only while a client is actively waiting on
/// a peer action.
#[derive(Debug, Clone, Copy)]
pub struct PollingConfig {
    pub session_interval: Duration,
    pub discovery_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            session_interval: Duration::from_secs(2),
            discovery_interval: Duration::from_secs(10),
        }
    }
}

/// A live feed of one session's snapshots. Dropping it stops the poller;
/// the channel also closes if the store reports the session gone (swept).
pub struct SessionWatch {
    rx: watch::Receiver<PracticeSession>,
    handle: JoinHandle<()>,
}

impl SessionWatch {
    pub fn receiver(&self) -> watch::Receiver<PracticeSession> {
        self.rx.clone()
    }
}

impl Drop for SessionWatch {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawns a poller for `seed`'s session. `seed` is the snapshot the caller
/// already holds; it becomes the channel's initial value so consumers never
/// start blind.
pub fn watch_session(
    store: Arc<dyn SessionStore>,
    seed: PracticeSession,
    interval: Duration,
) -> SessionWatch {
    let (tx, rx) = watch::channel(seed.clone());
    let session_id = seed.id;
    let mut last_version = seed.version;

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if tx.is_closed() {
                break;
            }
            match store.get(session_id).await {
                Ok(snapshot) => {
                    if snapshot.version != last_version {
                        last_version = snapshot.version;
                        if tx.send(snapshot).is_err() {
                            break;
                        }
                    }
                }
                Err(StoreError::NotFound(_)) => {
                    debug!(%session_id, "session gone from store, ending watch");
                    break;
                }
                Err(e) => {
                    // Transient store trouble: keep polling, the next tick
                    // may succeed. Eventual delivery is all we promise.
                    warn!(%session_id, error = %e, "session poll failed");
                }
            }
        }
    });

    SessionWatch { rx, handle }
}

/// A coarse background feed of open sessions for one module's discovery
/// screen.
pub struct DiscoveryFeed {
    rx: watch::Receiver<Vec<PracticeSession>>,
    handle: JoinHandle<()>,
}

impl DiscoveryFeed {
    pub fn receiver(&self) -> watch::Receiver<Vec<PracticeSession>> {
        self.rx.clone()
    }
}

impl Drop for DiscoveryFeed {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn watch_discovery(
    store: Arc<dyn SessionStore>,
    module: ModuleKind,
    interval: Duration,
) -> DiscoveryFeed {
    let (tx, rx) = watch::channel(Vec::new());
    let filter = SessionFilter::open(module);
    let mut last_seen: Vec<(uuid::Uuid, i64)> = Vec::new();

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if tx.is_closed() {
                break;
            }
            match store.query(&filter).await {
                Ok(sessions) => {
                    let seen: Vec<(uuid::Uuid, i64)> =
                        sessions.iter().map(|s| (s.id, s.version)).collect();
                    if seen != last_seen {
                        last_seen = seen;
                        if tx.send(sessions).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(module = %module, error = %e, "discovery poll failed");
                }
            }
        }
    });

    DiscoveryFeed { rx, handle }
}

/// Feeds snapshots into the coordinator until its phase moves on from the
/// phase it entered with, then returns the new phase.
///
/// Also returns (with the unchanged phase) if the feed closes: the session
/// disappeared from the store, which the caller handles like abandonment.
pub async fn drive(
    coordinator: &mut SessionCoordinator,
    rx: &mut watch::Receiver<PracticeSession>,
) -> Result<Phase, CoordinatorError> {
    let entry = coordinator.phase().clone();

    // The channel may already hold a snapshot newer than the caller's.
    let current = rx.borrow_and_update().clone();
    coordinator.observe(&current)?;

    while *coordinator.phase() == entry {
        if rx.changed().await.is_err() {
            debug!("session feed closed while waiting");
            break;
        }
        let snapshot = rx.borrow_and_update().clone();
        coordinator.observe(&snapshot)?;
    }
    Ok(coordinator.phase().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::MockAnalysisClient;
    use crate::arbiter::JoinArbiter;
    use crate::feedback::FeedbackAggregator;
    use crate::module::ModuleKind;
    use crate::room::{MockRoomService, RoomArtifacts};
    use crate::session::{Identity, NewSession};
    use crate::store::MemoryStore;
    use serde_json::{Value, json};
    use tokio::time::timeout;

    const FAST: Duration = Duration::from_millis(10);
    const WITHIN: Duration = Duration::from_millis(500);

    fn new_session(module: ModuleKind) -> NewSession {
        NewSession {
            module_type: module,
            creator_email: "a@x.com".into(),
            creator_name: "Ada".into(),
            creator_role: "seller".into(),
            max_participants: 2,
            context: Value::Null,
            scenario: Value::Null,
        }
    }

    fn coordinator(
        module: ModuleKind,
        email: &str,
        store: Arc<MemoryStore>,
    ) -> SessionCoordinator {
        let mut room = MockRoomService::new();
        room.expect_run()
            .returning(|_, _| Ok(RoomArtifacts::default()));
        SessionCoordinator::new(
            module.profile(),
            Identity::new(email, email),
            store,
            Arc::new(MockAnalysisClient),
            Arc::new(room),
        )
    }

    #[tokio::test]
    async fn approval_is_observed_within_a_poll() {
        let store = Arc::new(MemoryStore::new());
        let mut creator = coordinator(ModuleKind::SalesCall, "a@x.com", store.clone());
        let mut joiner = coordinator(ModuleKind::SalesCall, "b@x.com", store.clone());

        let session = creator
            .create_session(Value::Null, Value::Null, 2)
            .await
            .unwrap();
        joiner.discover().await.unwrap();
        joiner.join(session.id).await.unwrap();

        let seed = store.get(session.id).await.unwrap();
        let watch = watch_session(store.clone(), seed, FAST);
        let mut rx = watch.receiver();

        let approver = {
            let store = store.clone();
            let id = session.id;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                JoinArbiter::new(store).approve(id, "b@x.com").await.unwrap();
            })
        };

        let phase = timeout(WITHIN, drive(&mut joiner, &mut rx))
            .await
            .expect("approval not observed in time")
            .unwrap();
        assert!(matches!(phase, Phase::InSession { .. }));
        approver.await.unwrap();
    }

    #[tokio::test]
    async fn rejection_is_observed_within_a_poll() {
        let store = Arc::new(MemoryStore::new());
        let mut creator = coordinator(ModuleKind::SalesCall, "a@x.com", store.clone());
        let mut joiner = coordinator(ModuleKind::SalesCall, "b@x.com", store.clone());

        let session = creator
            .create_session(Value::Null, Value::Null, 2)
            .await
            .unwrap();
        joiner.discover().await.unwrap();
        joiner.join(session.id).await.unwrap();

        let seed = store.get(session.id).await.unwrap();
        let watch = watch_session(store.clone(), seed, FAST);
        let mut rx = watch.receiver();

        let rejecter = {
            let store = store.clone();
            let id = session.id;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                JoinArbiter::new(store).reject(id, "b@x.com").await.unwrap();
            })
        };

        let phase = timeout(WITHIN, drive(&mut joiner, &mut rx))
            .await
            .expect("rejection not observed in time")
            .unwrap();
        assert_eq!(phase, Phase::Abandoned);
        rejecter.await.unwrap();
    }

    #[tokio::test]
    async fn completion_is_observed_within_a_poll() {
        let store = Arc::new(MemoryStore::new());
        let mut creator = coordinator(ModuleKind::Interview, "a@x.com", store.clone());
        let mut joiner = coordinator(ModuleKind::Interview, "b@x.com", store.clone());

        let session = creator
            .create_session(Value::Null, Value::Null, 2)
            .await
            .unwrap();
        joiner.discover().await.unwrap();
        joiner.join(session.id).await.unwrap();
        let active = store.get(session.id).await.unwrap();
        creator.observe(&active).unwrap();

        creator.run_room().await.unwrap();
        creator.submit_feedback().await.unwrap();
        assert!(matches!(creator.phase(), Phase::AwaitingPeerFeedback { .. }));

        let seed = store.get(session.id).await.unwrap();
        let watch = watch_session(store.clone(), seed, FAST);
        let mut rx = watch.receiver();

        let peer = {
            let store = store.clone();
            let id = session.id;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                FeedbackAggregator::new(store)
                    .submit(id, "b@x.com", json!({"score": 70}))
                    .await
                    .unwrap();
            })
        };

        let phase = timeout(WITHIN, drive(&mut creator, &mut rx))
            .await
            .expect("completion not observed in time")
            .unwrap();
        assert!(matches!(phase, Phase::SessionComplete { .. }));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn watch_publishes_nothing_without_remote_writes() {
        let store = Arc::new(MemoryStore::new());
        let session = store.create(new_session(ModuleKind::SalesCall)).await.unwrap();

        let watch = watch_session(store.clone(), session, FAST);
        let mut rx = watch.receiver();
        rx.borrow_and_update();

        let outcome = timeout(Duration::from_millis(100), rx.changed()).await;
        assert!(outcome.is_err(), "expected no publication on idle session");
    }

    #[tokio::test]
    async fn watch_closes_when_the_session_is_swept() {
        let store = Arc::new(MemoryStore::new());
        let session = store.create(new_session(ModuleKind::SalesCall)).await.unwrap();

        let watch = watch_session(store.clone(), session.clone(), FAST);
        let mut rx = watch.receiver();
        rx.borrow_and_update();

        // Sweep everything, regardless of age.
        store.purge_stale(chrono::Utc::now() + chrono::Duration::hours(1)).await;

        let outcome = timeout(WITHIN, rx.changed()).await.expect("watch did not close");
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn discovery_feed_sees_new_open_sessions() {
        let store = Arc::new(MemoryStore::new());
        let feed = watch_discovery(store.clone(), ModuleKind::SalesCall, FAST);
        let mut rx = feed.receiver();
        rx.borrow_and_update();

        let session = store.create(new_session(ModuleKind::SalesCall)).await.unwrap();
        // A session of another module must not show up.
        store.create(new_session(ModuleKind::Interview)).await.unwrap();

        timeout(WITHIN, rx.changed())
            .await
            .expect("discovery did not refresh")
            .unwrap();
        let open = rx.borrow_and_update().clone();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, session.id);
    }
}
