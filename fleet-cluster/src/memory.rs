use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use fleet_core::command_result::CommandResult;
use fleet_core::server_info::{ServerEnvelope, ServerInfo};

use crate::coordination::{CoordinationClient, CoordinationEvent, Discovery, EventSink, Probe};
use crate::keys::EtcdKeys;

struct Entry {
    value: Vec<u8>,
    owner: Option<u64>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_alive(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

struct Session {
    server_id: Option<String>,
    watching: bool,
    events: EventSink,
}

#[derive(Default)]
struct StoreInner {
    entries: BTreeMap<String, Entry>,
    sessions: HashMap<u64, Session>,
    next_session: u64,
}

/// In-process coordination store shared by any number of [`MemoryCoordination`] clients.
///
/// Uses the etcd key layout for members, mailboxes and results.
pub struct MemoryStore {
    keys: EtcdKeys,
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Self::with_root("/fleet")
    }

    pub fn with_root(root: &str) -> Arc<Self> {
        Arc::new(Self {
            keys: EtcdKeys::new(root),
            inner: Mutex::new(StoreInner::default()),
        })
    }

    pub fn keys(&self) -> &EtcdKeys {
        &self.keys
    }

    /// Operator write, e.g. a command into a mailbox.
    pub fn put(&self, key: &str, value: impl Into<String>) {
        let value = value.into().into_bytes();
        self.put_entry(key, Entry { value, owner: None, expires_at: None });
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let inner = self.inner.lock();
        let now = Instant::now();
        inner.entries.get(key)
            .filter(|entry| entry.is_alive(now))
            .map(|entry| String::from_utf8_lossy(&entry.value).into_owned())
    }

    pub fn remove(&self, key: &str) -> bool {
        let removed = self.inner.lock().entries.remove(key).is_some();
        if removed {
            self.notify(key, false);
        }
        removed
    }

    pub fn member_count(&self) -> usize {
        let inner = self.inner.lock();
        let now = Instant::now();
        inner.entries.iter()
            .filter(|(key, entry)| self.keys.is_member(key) && entry.is_alive(now))
            .count()
    }

    /// Tells every watching session that membership changed without changing any entry.
    pub fn notify_members(&self) {
        let sinks = self.inner.lock().sessions.values()
            .filter(|session| session.watching)
            .map(|session| session.events.clone())
            .collect::<Vec<_>>();
        for events in sinks {
            events.emit(CoordinationEvent::MembersChanged);
        }
    }

    fn put_entry(&self, key: &str, entry: Entry) {
        let has_payload = !entry.value.is_empty();
        self.inner.lock().entries.insert(key.to_string(), entry);
        self.notify(key, has_payload);
    }

    fn notify(&self, key: &str, has_payload: bool) {
        let targets = {
            let inner = self.inner.lock();
            if self.keys.is_member(key) {
                inner.sessions.values()
                    .filter(|session| session.watching)
                    .map(|session| (session.events.clone(), CoordinationEvent::MembersChanged))
                    .collect::<Vec<_>>()
            } else if has_payload {
                inner.sessions.values()
                    .filter(|session| session.watching)
                    .filter(|session| {
                        session.server_id.as_ref().is_some_and(|id| self.keys.is_mailbox_of(key, id))
                    })
                    .map(|session| (session.events.clone(), CoordinationEvent::CommandChanged))
                    .collect()
            } else {
                vec![]
            }
        };
        for (events, event) in targets {
            events.emit(event);
        }
    }

    fn open_session(&self, watching: bool, events: EventSink) -> u64 {
        let mut inner = self.inner.lock();
        inner.next_session += 1;
        let id = inner.next_session;
        inner.sessions.insert(id, Session { server_id: None, watching, events });
        id
    }

    /// Removes the session and its ephemeral entries. Returns the session's sink if it existed.
    fn close_session(&self, session: u64) -> Option<EventSink> {
        let (closed, removed_keys) = {
            let mut inner = self.inner.lock();
            let closed = inner.sessions.remove(&session);
            let removed_keys = inner.entries.iter()
                .filter(|(_, entry)| entry.owner == Some(session))
                .map(|(key, _)| key.clone())
                .collect::<Vec<_>>();
            for key in &removed_keys {
                inner.entries.remove(key);
            }
            (closed, removed_keys)
        };
        for key in removed_keys {
            self.notify(&key, false);
        }
        closed.map(|session| session.events)
    }

    fn bind_session(&self, session: u64, server_id: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let session = inner.sessions.get_mut(&session).ok_or_else(|| anyhow!("memory session {} expired", session))?;
        session.server_id = Some(server_id.to_string());
        Ok(())
    }

    /// Removes the mailbox and returns its command, if any.
    fn take(&self, key: &str) -> Option<String> {
        let entry = self.inner.lock().entries.remove(key)?;
        (!entry.value.is_empty()).then(|| String::from_utf8_lossy(&entry.value).into_owned())
    }

    fn ensure_mailbox(&self, key: &str, session: u64) {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(key) {
            inner.entries.insert(key.to_string(), Entry { value: vec![], owner: Some(session), expires_at: None });
        }
    }

    fn live_members(&self, prune: bool) -> Vec<(String, Vec<u8>)> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        if prune {
            inner.entries.retain(|key, entry| !self.keys.is_member(key) || entry.is_alive(now));
        }
        inner.entries.iter()
            .filter(|(key, entry)| self.keys.is_member(key) && entry.is_alive(now))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }
}

/// What the next `connect` of a [`MemoryCoordination`] does.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectFault {
    None,
    Refuse,
    /// Never completes, so only the caller's timeout ends the attempt.
    Hang,
}

struct ClientState {
    session: Option<u64>,
    connect_fault: ConnectFault,
    failing_reads: HashSet<String>,
    hang_ping: bool,
    lose_registration: bool,
    connects: usize,
}

/// A [`CoordinationClient`] over a [`MemoryStore`], with fault injection for tests.
///
/// Clones share the same session and faults, so a test can keep one clone while the monitor
/// owns another.
#[derive(Clone)]
pub struct MemoryCoordination {
    store: Arc<MemoryStore>,
    discovery: Discovery,
    expire: Duration,
    probe: Option<Probe>,
    state: Arc<Mutex<ClientState>>,
}

impl MemoryCoordination {
    /// Watch discovery with ephemeral members, like the etcd backend.
    pub fn watching(store: Arc<MemoryStore>) -> Self {
        Self::new(store, Discovery::Watch, Duration::from_secs(10))
    }

    /// Poll discovery where members expire `expire` after their last refresh, like the Redis
    /// backend.
    pub fn polling(store: Arc<MemoryStore>, period: Duration, expire: Duration) -> Self {
        Self::new(store, Discovery::Poll { period }, expire)
    }

    fn new(store: Arc<MemoryStore>, discovery: Discovery, expire: Duration) -> Self {
        let state = ClientState {
            session: None,
            connect_fault: ConnectFault::None,
            failing_reads: HashSet::new(),
            hang_ping: false,
            lose_registration: false,
            connects: 0,
        };
        Self {
            store,
            discovery,
            expire,
            probe: None,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_probe(mut self, probe: Probe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn set_connect_fault(&self, fault: ConnectFault) {
        self.state.lock().connect_fault = fault;
    }

    pub fn fail_reads_of(&self, key: impl Into<String>) {
        self.state.lock().failing_reads.insert(key.into());
    }

    pub fn clear_read_faults(&self) {
        self.state.lock().failing_reads.clear();
    }

    pub fn hang_ping(&self, hang: bool) {
        self.state.lock().hang_ping = hang;
    }

    /// The next `register` drops the session right before it returns `Ok`.
    pub fn lose_next_registration(&self) {
        self.state.lock().lose_registration = true;
    }

    /// Connect attempts seen so far, refused and hanging ones included.
    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().session.is_some()
    }

    /// Expires the current session as if the backend lost it.
    pub fn drop_session(&self) {
        let session = self.state.lock().session.take();
        if let Some(session) = session {
            if let Some(events) = self.store.close_session(session) {
                events.emit(CoordinationEvent::Disconnected("memory session dropped".to_string()));
            }
        }
    }

    fn session(&self) -> anyhow::Result<u64> {
        self.state.lock().session.ok_or_else(|| anyhow!("memory client is not connected"))
    }
}

#[async_trait]
impl CoordinationClient for MemoryCoordination {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn discovery(&self) -> Discovery {
        self.discovery
    }

    fn session_timeout(&self) -> Duration {
        self.expire
    }

    fn probe(&self) -> Option<Probe> {
        self.probe
    }

    async fn connect(&self, events: EventSink) -> anyhow::Result<()> {
        let (fault, previous) = {
            let mut state = self.state.lock();
            state.connects += 1;
            (state.connect_fault, state.session.take())
        };
        if let Some(previous) = previous {
            self.store.close_session(previous);
        }
        match fault {
            ConnectFault::None => {}
            ConnectFault::Refuse => bail!("memory backend refused the connection"),
            ConnectFault::Hang => futures::future::pending::<()>().await,
        }
        let watching = matches!(self.discovery, Discovery::Watch);
        let session = self.store.open_session(watching, events);
        self.state.lock().session = Some(session);
        debug!("memory session {} opened", session);
        Ok(())
    }

    async fn register(&self, info: &ServerInfo) -> anyhow::Result<()> {
        let session = self.session()?;
        self.store.bind_session(session, &info.id)?;
        let keys = self.store.keys();
        self.store.ensure_mailbox(&keys.mailbox(&info.id), session);
        if let Discovery::Watch = self.discovery {
            let value = serde_json::to_vec(&ServerEnvelope { server_info: info.clone() })?;
            let member = keys.member(&info.server_type, &info.id);
            self.store.put_entry(&member, Entry { value, owner: Some(session), expires_at: None });
        }
        let lose = std::mem::take(&mut self.state.lock().lose_registration);
        if lose {
            self.drop_session();
        }
        Ok(())
    }

    async fn list_members(&self) -> anyhow::Result<Vec<String>> {
        self.session()?;
        Ok(self.store.live_members(false).into_iter().map(|(key, _)| key).collect())
    }

    async fn read_member(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        self.session()?;
        if self.state.lock().failing_reads.contains(key) {
            bail!("injected read failure of {}", key);
        }
        self.store.live_members(false)
            .into_iter()
            .find(|(member, _)| member == key)
            .map(|(_, value)| value)
            .ok_or_else(|| anyhow!("member {} not found", key))
    }

    async fn refresh_members(&self, info: &ServerInfo) -> anyhow::Result<Vec<Vec<u8>>> {
        let session = self.session()?;
        let value = serde_json::to_vec(info)?;
        let member = self.store.keys().member(&info.server_type, &info.id);
        let entry = Entry {
            value,
            owner: Some(session),
            expires_at: Some(Instant::now() + self.expire),
        };
        self.store.put_entry(&member, entry);
        Ok(self.store.live_members(true).into_iter().map(|(_, value)| value).collect())
    }

    async fn take_command(&self, server_id: &str) -> anyhow::Result<Option<String>> {
        let session = self.session()?;
        let mailbox = self.store.keys().mailbox(server_id);
        let command = self.store.take(&mailbox);
        self.store.ensure_mailbox(&mailbox, session);
        Ok(command)
    }

    async fn write_result(&self, server_id: &str, result: &CommandResult) -> anyhow::Result<()> {
        let session = self.session()?;
        let key = self.store.keys().result(server_id, result.tag.as_deref());
        let value = result.payload.clone().into_bytes();
        self.store.put_entry(&key, Entry { value, owner: Some(session), expires_at: None });
        Ok(())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let hang = self.state.lock().hang_ping;
        if hang {
            futures::future::pending::<()>().await;
        }
        self.session()?;
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        let session = self.state.lock().session.take();
        if let Some(session) = session {
            self.store.close_session(session);
        }
        Ok(())
    }
}
