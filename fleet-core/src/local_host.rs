use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::ensure;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::info;
use typed_builder::TypedBuilder;

use crate::cron::Cron;
use crate::host::{Components, Host};
use crate::server_info::{ClusterView, ServerInfo};
use crate::setting::Setting;

/// A self-contained [`Host`] keeping its settings, crons and cluster view in memory.
///
/// `stop` only raises a signal that [`stopped`](LocalHost::stopped) waits for. `kill` exits the
/// process unless the host was built with `exit_on_kill(false)`, in which case it is recorded.
#[derive(TypedBuilder)]
pub struct LocalHost {
    info: ServerInfo,
    #[builder(setter(into))]
    env: String,
    #[builder(default = false)]
    frontend: bool,
    #[builder(default)]
    components: Components,
    #[builder(default = true)]
    exit_on_kill: bool,
    #[builder(default, setter(skip))]
    settings: RwLock<BTreeMap<String, Setting>>,
    #[builder(default, setter(skip))]
    servers: RwLock<Arc<ClusterView>>,
    #[builder(default, setter(skip))]
    crons: Mutex<Vec<Cron>>,
    #[builder(default, setter(skip))]
    stop_signal: Notify,
    #[builder(default, setter(skip))]
    stop_requested: AtomicBool,
    #[builder(default, setter(skip))]
    killed: AtomicBool,
    #[builder(default, setter(skip))]
    view_updates: AtomicUsize,
}

impl LocalHost {
    pub fn crons(&self) -> Vec<Cron> {
        self.crons.lock().clone()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Number of views received through `replace_servers`.
    pub fn view_updates(&self) -> usize {
        self.view_updates.load(Ordering::SeqCst)
    }

    pub async fn stopped(&self) {
        let notified = self.stop_signal.notified();
        if self.stop_requested() {
            return;
        }
        notified.await;
    }
}

impl Host for LocalHost {
    fn server_id(&self) -> &str {
        &self.info.id
    }

    fn server_type(&self) -> &str {
        &self.info.server_type
    }

    fn env(&self) -> &str {
        &self.env
    }

    fn cur_server(&self) -> ServerInfo {
        self.info.clone()
    }

    fn server_by_id(&self, id: &str) -> Option<ServerInfo> {
        if id == self.info.id {
            return Some(self.cur_server());
        }
        self.servers.read().get(id).cloned()
    }

    fn servers(&self) -> Arc<ClusterView> {
        self.servers.read().clone()
    }

    fn replace_servers(&self, view: Arc<ClusterView>) {
        *self.servers.write() = view;
        self.view_updates.fetch_add(1, Ordering::SeqCst);
    }

    fn set(&self, key: &str, value: Setting) {
        self.settings.write().insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<Setting> {
        self.settings.read().get(key).cloned()
    }

    fn enable(&self, key: &str) {
        self.set(key, Setting::from(true));
    }

    fn disable(&self, key: &str) {
        self.set(key, Setting::from(false));
    }

    fn add_crons(&self, crons: Vec<Cron>) -> anyhow::Result<()> {
        for cron in &crons {
            ensure!(cron.time.is_some() && cron.action.is_some(), "{} needs both time and action", cron);
        }
        let mut registry = self.crons.lock();
        for cron in crons {
            registry.retain(|c| c.id != cron.id);
            info!("{} add {}", self.info.id, cron);
            registry.push(cron);
        }
        Ok(())
    }

    fn remove_crons(&self, crons: Vec<Cron>) -> anyhow::Result<()> {
        let mut registry = self.crons.lock();
        for cron in crons {
            registry.retain(|c| c.id != cron.id);
        }
        Ok(())
    }

    fn is_frontend(&self) -> bool {
        self.frontend
    }

    fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.stop_signal.notify_waiters();
    }

    fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        if self.exit_on_kill {
            std::process::exit(0)
        }
    }

    fn settings(&self) -> Vec<(String, Setting)> {
        self.settings.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn components(&self) -> Components {
        self.components.clone()
    }
}
