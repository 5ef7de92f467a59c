//! The session registry: which battles are resident, and loading the rest.
//!
//! The registry is the only place that creates or removes resident
//! sessions. It holds one short-lived lock over a directory with two maps:
//!
//! ```text
//!   resident: SessionId → Arc<BattleSession>     (hydrated, serving)
//!   loading:  SessionId → shared pending load    (hydration in flight)
//! ```
//!
//! A lookup for a cold session starts exactly one hydration task and
//! records its shared result under `loading`. Every other lookup for the
//! same id, while the task runs, waits on that same shared result. The
//! directory lock is only held to read or update the maps, never while
//! storage I/O runs, so a slow load never blocks lookups of other sessions.
//!
//! The hydration task itself moves the entry from `loading` to `resident`
//! (on success) or just drops it (on failure) under a single lock
//! acquisition. Failures are therefore never cached: the next lookup starts
//! a fresh load.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use geobattle_protocol::{SessionId, SessionView};
use geobattle_store::BattleStore;
use geobattle_transport::Connection;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{BattleSession, LoadError, RegistryConfig, RegistryError, SessionLoader};

type LoadResult<C> = Result<Arc<BattleSession<C>>, Arc<LoadError>>;
type PendingLoad<C> = Shared<BoxFuture<'static, LoadResult<C>>>;

struct Directory<C> {
    resident: HashMap<SessionId, Arc<BattleSession<C>>>,
    loading: HashMap<SessionId, PendingLoad<C>>,
}

struct Inner<S, C> {
    loader: SessionLoader<S>,
    max_resident: usize,
    directory: Mutex<Directory<C>>,
}

/// Process-wide map of resident battle sessions.
///
/// Cheap to clone: clones share the same directory. Construct one per
/// server (or per test) and hand clones to connection tasks.
pub struct SessionRegistry<S, C> {
    inner: Arc<Inner<S, C>>,
}

impl<S, C> Clone for SessionRegistry<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: BattleStore, C: Connection> SessionRegistry<S, C> {
    /// Creates an empty registry loading from `store`.
    pub fn new(store: Arc<S>, config: RegistryConfig) -> Self {
        let loader = SessionLoader::new(store, config.ruleset)
            .with_reconnect_policy(config.reconnect_policy);
        Self {
            inner: Arc::new(Inner {
                loader,
                max_resident: config.max_resident_sessions,
                directory: Mutex::new(Directory {
                    resident: HashMap::new(),
                    loading: HashMap::new(),
                }),
            }),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        self.inner.loader.store()
    }

    // -----------------------------------------------------------------------
    // GetOrLoad
    // -----------------------------------------------------------------------

    /// Returns the resident session for `session_id`, hydrating it first if
    /// it is cold.
    ///
    /// At most one hydration per id is in flight at any time; concurrent
    /// callers share its outcome, so they all get the same instance or the
    /// same error. A failed load registers nothing. A cold lookup beyond
    /// the configured capacity fails with [`RegistryError::AtCapacity`].
    ///
    /// Hydration runs on its own task: if this future is dropped, the load
    /// still completes and the session becomes resident.
    pub async fn get_or_load(
        &self,
        session_id: SessionId,
    ) -> Result<Arc<BattleSession<C>>, RegistryError> {
        let pending = {
            let mut dir = self.inner.directory.lock().await;

            let closing = match dir.resident.get(&session_id) {
                Some(session) if !session.is_closed() => return Ok(Arc::clone(session)),
                Some(_) => true,
                None => false,
            };
            // Eviction has started on this instance; a fresh one replaces it.
            if closing {
                dir.resident.remove(&session_id);
            }

            if let Some(pending) = dir.loading.get(&session_id) {
                debug!(%session_id, "joining in-flight session load");
                pending.clone()
            } else {
                let occupied = dir.resident.len() + dir.loading.len();
                if occupied >= self.inner.max_resident {
                    warn!(%session_id, limit = self.inner.max_resident, "session registry at capacity");
                    return Err(RegistryError::AtCapacity {
                        limit: self.inner.max_resident,
                    });
                }
                let pending = self.start_load(session_id);
                dir.loading.insert(session_id, pending.clone());
                pending
            }
        };

        pending.await.map_err(RegistryError::LoadFailure)
    }

    /// Spawns the hydration task for `session_id` and wraps its handle in a
    /// shareable future. Called with the directory lock held; the task only
    /// takes the lock once storage I/O is done.
    fn start_load(&self, session_id: SessionId) -> PendingLoad<C> {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let result = inner.loader.load::<C>(session_id).await;

            let mut dir = inner.directory.lock().await;
            dir.loading.remove(&session_id);
            match result {
                Ok(session) => {
                    let session = Arc::new(session);
                    dir.resident.insert(session_id, Arc::clone(&session));
                    Ok(session)
                }
                Err(e) => {
                    warn!(%session_id, error = %e, "session load failed");
                    Err(Arc::new(e))
                }
            }
        });

        let weak: Weak<Inner<S, C>> = Arc::downgrade(&self.inner);
        async move {
            match task.await {
                Ok(result) => result,
                Err(join_err) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.directory.lock().await.loading.remove(&session_id);
                    }
                    warn!(%session_id, error = %join_err, "session load task did not complete");
                    Err(Arc::new(LoadError::Interrupted {
                        session_id,
                        reason: join_err.to_string(),
                    }))
                }
            }
        }
        .boxed()
        .shared()
    }

    // -----------------------------------------------------------------------
    // Evict
    // -----------------------------------------------------------------------

    /// Closes every live connection of `session_id`, then removes it.
    ///
    /// Returns `true` if this call removed the resident session. Evicting a
    /// session that is not resident (absent, or still loading) is a no-op.
    ///
    /// `false` does not always mean nothing happened: if a concurrent
    /// lookup replaced the instance while its connections were being
    /// closed, those connections stay closed, the fresh instance is left
    /// alone, and this returns `false`.
    pub async fn evict(&self, session_id: SessionId) -> bool {
        let session = {
            let dir = self.inner.directory.lock().await;
            dir.resident.get(&session_id).cloned()
        };
        let Some(session) = session else {
            return false;
        };

        let closed = session.close_all().await;
        let removed = self.remove_instance(&session).await;
        if removed {
            info!(%session_id, connections_closed = closed, "session evicted");
        }
        removed
    }

    /// Evicts every resident session that has had no connections for at
    /// least `grace`. Returns the evicted ids.
    pub async fn evict_idle(&self, grace: Duration) -> Vec<SessionId> {
        let candidates: Vec<Arc<BattleSession<C>>> = {
            let dir = self.inner.directory.lock().await;
            dir.resident.values().cloned().collect()
        };

        let mut evicted = Vec::new();
        for session in candidates {
            if session.close_if_idle(grace).await && self.remove_instance(&session).await {
                info!(session_id = %session.id(), "idle session evicted");
                evicted.push(session.id());
            }
        }
        evicted
    }

    /// Removes `session` from the resident map if it is still the entry
    /// registered under its id.
    async fn remove_instance(&self, session: &Arc<BattleSession<C>>) -> bool {
        let mut dir = self.inner.directory.lock().await;
        let id = session.id();
        let same = dir
            .resident
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, session));
        if same {
            dir.resident.remove(&id);
        }
        same
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// The resident session for `session_id`, without hydrating.
    pub async fn get(&self, session_id: SessionId) -> Option<Arc<BattleSession<C>>> {
        let dir = self.inner.directory.lock().await;
        dir.resident
            .get(&session_id)
            .filter(|s| !s.is_closed())
            .cloned()
    }

    /// A read-only view of a resident session.
    pub async fn snapshot(&self, session_id: SessionId) -> Option<SessionView> {
        let session = self.get(session_id).await?;
        Some(session.snapshot().await)
    }

    pub async fn resident_count(&self) -> usize {
        self.inner.directory.lock().await.resident.len()
    }

    pub async fn loading_count(&self) -> usize {
        self.inner.directory.lock().await.loading.len()
    }

    pub async fn resident_ids(&self) -> Vec<SessionId> {
        let dir = self.inner.directory.lock().await;
        let mut ids: Vec<_> = dir.resident.keys().copied().collect();
        ids.sort();
        ids
    }
}
