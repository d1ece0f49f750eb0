use std::any::type_name;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use fleet_core::error::MonitorError;
use fleet_core::ext::option_ext::OptionExt;
use fleet_core::host::Host;
use fleet_core::server_info::{ClusterView, ServerInfo};
use fleet_core::timer::{schedule_once, schedule_with_fixed_delay, ScheduleKey};

use crate::command::CommandChannel;
use crate::config::settings::MonitorSettings;
use crate::coordination::{CoordinationClient, Discovery, EventSink};
use crate::monitor::command_poll::CommandPoll;
use crate::monitor::connect_result::ConnectResult;
use crate::monitor::connect_timeout::ConnectTimeout;
use crate::monitor::coordination_event::CoordinationEventWrap;
use crate::monitor::probe::ProbeTick;
use crate::monitor::reconnect::{Reconnect, ReconnectAttempt};
use crate::monitor::refresh_topology::{PollTick, RefreshTopology};
use crate::monitor::session::{CoordinationSession, SessionState};
use crate::monitor::start::Start;
use crate::monitor::stop::Stop;

mod command_poll;
mod connect_result;
mod connect_timeout;
mod coordination_event;
mod probe;
mod reconnect;
mod refresh_topology;
pub mod session;
mod start;
mod stop;
mod topology_collected;

#[async_trait]
pub(crate) trait MonitorMessage: Send + 'static {
    async fn handle(self: Box<Self>, monitor: &mut MonitorDaemon) -> anyhow::Result<()>;

    fn name(&self) -> &'static str {
        type_name::<Self>()
    }
}

#[derive(Clone)]
pub(crate) struct MonitorRef {
    sender: mpsc::UnboundedSender<Box<dyn MonitorMessage>>,
}

impl MonitorRef {
    /// Returns `false` once the monitor has shut down.
    pub(crate) fn cast<M>(&self, message: M) -> bool where M: MonitorMessage {
        self.sender.send(Box::new(message)).is_ok()
    }
}

/// Timers owned by one monitor. Every key is cancelled on the path that makes it obsolete.
#[derive(Default)]
struct Timers {
    attempt: Option<AbortHandle>,
    connect_timeout: Option<ScheduleKey>,
    reconnect: Option<ScheduleKey>,
    refresh: Option<ScheduleKey>,
    probe: Option<ScheduleKey>,
    probe_timeout: Option<ScheduleKey>,
}

impl Timers {
    fn cancel_attempt(&mut self) {
        self.attempt.take().into_foreach(|handle| handle.abort());
        self.connect_timeout.take().into_foreach(ScheduleKey::cancel);
    }

    fn cancel_session(&mut self) {
        self.refresh.take().into_foreach(ScheduleKey::cancel);
        self.probe.take().into_foreach(ScheduleKey::cancel);
        self.probe_timeout.take().into_foreach(ScheduleKey::cancel);
    }

    fn cancel_all(&mut self) {
        self.cancel_attempt();
        self.reconnect.take().into_foreach(ScheduleKey::cancel);
        self.cancel_session();
    }
}

/// Owner task of one [`ClusterMonitor`]. Holds the session state machine and runs every
/// transition; backend I/O happens in spawned tasks that report back as messages tagged with
/// the epoch they were started in.
pub(crate) struct MonitorDaemon {
    server_id: String,
    settings: MonitorSettings,
    host: Arc<dyn Host>,
    client: Arc<dyn CoordinationClient>,
    channel: CommandChannel,
    myself: MonitorRef,
    session: watch::Sender<CoordinationSession>,
    view: Arc<ArcSwap<ClusterView>>,
    /// Bumped whenever a connect attempt starts or a session is abandoned. Completions and
    /// events carrying an older epoch are ignored.
    epoch: u64,
    round: u64,
    published_round: u64,
    timers: Timers,
    start_reply: Option<oneshot::Sender<Result<(), MonitorError>>>,
    /// A session loss reported while the current attempt was still registering.
    lost_during_attempt: Option<String>,
    closed: bool,
}

impl MonitorDaemon {
    async fn run(mut self, mut mailbox: mpsc::UnboundedReceiver<Box<dyn MonitorMessage>>) {
        while let Some(message) = mailbox.recv().await {
            let name = message.name();
            if let Err(error) = message.handle(&mut self).await {
                error!("{} handle {} failed: {:#}", self.server_id, name, error);
            }
            if self.closed {
                break;
            }
        }
        self.timers.cancel_all();
        debug!("{} cluster monitor stopped", self.server_id);
    }

    fn state(&self) -> SessionState {
        self.session.borrow().state
    }

    fn retry_count(&self) -> usize {
        self.session.borrow().retry_count
    }

    fn transition(&mut self, state: SessionState) {
        let previous = self.state();
        if previous != state {
            info!("{} session {} -> {}", self.server_id, previous, state);
            self.session.send_modify(|session| session.state = state);
        }
    }

    fn set_retry_count(&self, retry_count: usize) {
        self.session.send_modify(|session| session.retry_count = retry_count);
    }

    fn is_current(&self, epoch: u64) -> bool {
        epoch == self.epoch
    }

    fn connected_in(&self, epoch: u64) -> bool {
        self.is_current(epoch) && self.state() == SessionState::Connected
    }

    fn backend(&self) -> &'static str {
        self.client.backend()
    }

    fn reply_start(&mut self, result: Result<(), MonitorError>) {
        self.start_reply.take().into_foreach(|reply| reply.send(result));
    }

    fn events(&self) -> EventSink {
        let myself = self.myself.clone();
        let epoch = self.epoch;
        EventSink::new(move |event| {
            myself.cast(CoordinationEventWrap { epoch, event });
        })
    }

    /// Connects and registers in a spawned task bounded by the connect timeout.
    fn begin_attempt(&mut self) {
        self.timers.cancel_attempt();
        self.epoch += 1;
        self.lost_during_attempt = None;
        let epoch = self.epoch;
        let client = self.client.clone();
        let info = self.host.cur_server().with_current_pid();
        let events = self.events();
        let myself = self.myself.clone();
        debug!("{} connect to {} in epoch {}", self.server_id, self.backend(), epoch);
        let attempt = tokio::spawn(async move {
            let result = async {
                client.connect(events).await?;
                client.register(&info).await
            }.await;
            myself.cast(ConnectResult { epoch, result: result.map_err(|error| format!("{:#}", error)) });
        });
        self.timers.attempt = Some(attempt.abort_handle());
        let myself = self.myself.clone();
        let key = schedule_once(self.settings.connect_timeout.to_std_duration(), move || {
            myself.cast(ConnectTimeout { epoch });
        });
        self.timers.connect_timeout = Some(key);
    }

    fn on_connected(&mut self) {
        self.transition(SessionState::Connected);
        self.set_retry_count(0);
        self.reply_start(Ok(()));
        info!("{} registered to {} as {}", self.server_id, self.backend(), self.host.cur_server());
        let epoch = self.epoch;
        match self.client.discovery() {
            Discovery::Watch => {
                self.myself.cast(RefreshTopology { epoch });
                self.myself.cast(CommandPoll { epoch });
            }
            Discovery::Poll { period } => {
                let myself = self.myself.clone();
                let key = schedule_with_fixed_delay(None, period, move || {
                    myself.cast(PollTick { epoch });
                });
                self.timers.refresh = Some(key);
            }
        }
        if let Some(probe) = self.client.probe() {
            let myself = self.myself.clone();
            let key = schedule_with_fixed_delay(Some(probe.interval), probe.interval, move || {
                myself.cast(ProbeTick { epoch });
            });
            self.timers.probe = Some(key);
        }
    }

    /// A connect attempt failed or timed out.
    async fn on_attempt_failed(&mut self, error: MonitorError) {
        match self.state() {
            SessionState::Connecting => {
                error!("{} start failed: {}", self.server_id, error);
                self.transition(SessionState::ConnectFailed);
                self.reply_start(Err(error));
                self.release_session().await;
            }
            SessionState::Reconnecting => {
                let retry_count = self.retry_count();
                if retry_count < self.settings.reconnect_times {
                    let delay = self.settings.reconnect_delay.to_std_duration();
                    warn!("{} reconnect attempt {} failed: {}, retry in {:?}", self.server_id, retry_count, error, delay);
                    let myself = self.myself.clone();
                    let epoch = self.epoch;
                    let key = schedule_once(delay, move || {
                        myself.cast(ReconnectAttempt { epoch });
                    });
                    self.timers.reconnect = Some(key);
                } else {
                    let exhausted = MonitorError::ReconnectExhausted(self.server_id.clone(), retry_count);
                    error!("{}, last error: {}", exhausted, error);
                    self.transition(SessionState::ConnectFailed);
                    self.release_session().await;
                }
            }
            _ => {}
        }
    }

    /// Abandons the current session and starts a bounded reconnection sequence.
    async fn begin_reconnect(&mut self, reason: &str) {
        warn!("{} reconnect to {}: {}", self.server_id, self.backend(), reason);
        self.timers.cancel_all();
        self.epoch += 1;
        self.transition(SessionState::Reconnecting);
        self.set_retry_count(0);
        if self.settings.reconnect_times == 0 {
            let exhausted = MonitorError::ReconnectExhausted(self.server_id.clone(), 0);
            error!("{}", exhausted);
            self.transition(SessionState::ConnectFailed);
            self.release_session().await;
        } else {
            self.reconnect_attempt();
        }
    }

    fn reconnect_attempt(&mut self) {
        self.set_retry_count(self.retry_count() + 1);
        info!("{} reconnect attempt {}/{}", self.server_id, self.retry_count(), self.settings.reconnect_times);
        self.begin_attempt();
    }

    /// Disconnects from the backend, bounded by the connect timeout so a dead backend can't
    /// stall the owner task.
    async fn release_session(&self) {
        let timeout = self.settings.connect_timeout.to_std_duration();
        match tokio::time::timeout(timeout, self.client.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!("{} disconnect from {} failed: {:#}", self.server_id, self.backend(), error),
            Err(_) => warn!("{} disconnect from {} timed out", self.server_id, self.backend()),
        }
    }

    /// Terminal shutdown: nothing is retried and the owner task exits after this message.
    async fn close(&mut self) {
        self.timers.cancel_all();
        self.epoch += 1;
        self.transition(SessionState::Closed);
        self.reply_start(Err(MonitorError::Closed(self.server_id.clone())));
        self.release_session().await;
        self.closed = true;
    }

    fn publish(&mut self, servers: Vec<ServerInfo>) {
        let view = Arc::new(ClusterView::from_iter(servers));
        debug!("{} publish {}", self.server_id, view);
        self.view.store(view.clone());
        self.host.replace_servers(view);
    }

    fn next_round(&mut self) -> u64 {
        self.round += 1;
        self.round
    }
}

/// Keeps one process registered with a coordination backend, republishes the cluster view to
/// the host and dispatches administrative commands sent to it.
///
/// Every monitor owns a task of its own; dropping the monitor stops it.
pub struct ClusterMonitor {
    server_id: String,
    myself: MonitorRef,
    session: watch::Receiver<CoordinationSession>,
    view: Arc<ArcSwap<ClusterView>>,
}

impl ClusterMonitor {
    /// Must be called within a tokio runtime.
    pub fn new(settings: MonitorSettings, host: Arc<dyn Host>, client: Arc<dyn CoordinationClient>) -> Self {
        let server_id = host.server_id().to_string();
        let (sender, mailbox) = mpsc::unbounded_channel();
        let myself = MonitorRef { sender };
        let (session_tx, session_rx) = watch::channel(CoordinationSession::new(client.session_timeout()));
        let view = Arc::new(ArcSwap::from_pointee(ClusterView::empty()));
        let daemon = MonitorDaemon {
            server_id: server_id.clone(),
            settings,
            channel: CommandChannel::new(host.clone(), client.clone()),
            host,
            client,
            myself: myself.clone(),
            session: session_tx,
            view: view.clone(),
            epoch: 0,
            round: 0,
            published_round: 0,
            timers: Timers::default(),
            start_reply: None,
            lost_during_attempt: None,
            closed: false,
        };
        tokio::spawn(daemon.run(mailbox));
        Self {
            server_id,
            myself,
            session: session_rx,
            view,
        }
    }

    /// Connects, registers and starts discovery. Fails when the first connect attempt fails;
    /// the initial start is not retried.
    pub async fn start(&self) -> anyhow::Result<()> {
        let (reply, response) = oneshot::channel();
        if !self.myself.cast(Start { reply }) {
            return Err(MonitorError::Closed(self.server_id.clone()).into());
        }
        response.await.map_err(|_| MonitorError::Closed(self.server_id.clone()))??;
        Ok(())
    }

    /// Cancels all timers and releases the backend session. Calling it again is a no-op.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let (reply, response) = oneshot::channel();
        if self.myself.cast(Stop { reply: Some(reply) }) {
            let _ = response.await;
        }
        Ok(())
    }

    /// Starts a reconnection sequence. Rejected while a connect sequence is in flight.
    pub async fn reconnect(&self) -> anyhow::Result<()> {
        let (reply, response) = oneshot::channel();
        if !self.myself.cast(Reconnect { reply }) {
            return Err(MonitorError::Closed(self.server_id.clone()).into());
        }
        response.await.map_err(|_| MonitorError::Closed(self.server_id.clone()))??;
        Ok(())
    }

    pub fn session(&self) -> CoordinationSession {
        *self.session.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinationSession> {
        self.session.clone()
    }

    /// Waits until the session satisfies `predicate`, at most `timeout`.
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> anyhow::Result<CoordinationSession>
        where
            F: FnMut(&CoordinationSession) -> bool,
    {
        let mut session = self.session.clone();
        let waited = tokio::time::timeout(timeout, session.wait_for(predicate)).await;
        match waited {
            Ok(Ok(session)) => Ok(*session),
            Ok(Err(_)) => Err(MonitorError::Closed(self.server_id.clone()).into()),
            Err(_) => {
                let current = *self.session.borrow();
                Err(anyhow::anyhow!("{} session still {} after {:?}", self.server_id, current, timeout))
            }
        }
    }

    /// The last published cluster view.
    pub fn view(&self) -> Arc<ClusterView> {
        self.view.load_full()
    }
}

impl Drop for ClusterMonitor {
    fn drop(&mut self) {
        self.myself.cast(Stop { reply: None });
    }
}
