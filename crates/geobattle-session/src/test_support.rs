//! Shared fixtures for the unit tests of this crate.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use geobattle_protocol::{PlayerId, SessionId, SessionStatus};
use geobattle_store::{MemoryStore, SessionRecord};
use geobattle_transport::{Connection, ConnectionId};

/// A connection that records what happens to it instead of doing I/O.
#[derive(Debug)]
pub struct MockConnection {
    id: ConnectionId,
    close_calls: AtomicUsize,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl MockConnection {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(id),
            close_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.close_calls() > 0
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

impl Connection for MockConnection {
    type Error = io::Error;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }
        self.sent.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(None)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// A duel with players A (attacker) and B (defender) and no snapshots.
pub fn duel() -> (SessionId, PlayerId, PlayerId, SessionRecord) {
    let sid = SessionId::new_v4();
    let a = PlayerId::new_v4();
    let b = PlayerId::new_v4();
    let record = SessionRecord::new("duel", SessionStatus::InProgress)
        .with_player(a, "attacker")
        .with_player(b, "defender");
    (sid, a, b, record)
}

/// A store seeded with [`duel`].
pub fn duel_store() -> (Arc<MemoryStore>, SessionId, PlayerId, PlayerId) {
    let (sid, a, b, record) = duel();
    let store = Arc::new(MemoryStore::new().with_session(sid, record));
    (store, sid, a, b)
}
