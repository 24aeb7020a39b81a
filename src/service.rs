use crate::activity::{ActivityKind, ActivitySink, ActivitySource, Subscription};
use crate::auth::{AuthProvider, Navigator};
use crate::config::{ListenerFailurePolicy, MonitorConfig};
use crate::error::MonitorError;
use crate::models::{ExpiryReason, MonitorSnapshot, MonitorState, Session};
use crate::monitor::{IdleStateMachine, Transition};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Idle session monitor for one signed-in session at a time
///
/// Observes user activity and logs the session out after the configured
/// idle budget, showing a countdown warning before it does. The state
/// machine runs on its own tokio task; this handle forwards UI commands
/// and publishes snapshots for the warning dialog.
pub struct IdleMonitor {
    config: MonitorConfig,
    auth: Arc<dyn AuthProvider>,
    navigator: Arc<dyn Navigator>,
    activity: Arc<dyn ActivitySource>,
    snapshots: watch::Sender<MonitorSnapshot>,
    running: Option<Running>,
    /// Session admitted without listeners under `ProceedUnprotected`
    unprotected: Option<Session>,
}

enum Command {
    Restart,
    Extend,
    Reject,
}

struct Running {
    session: Session,
    commands: mpsc::UnboundedSender<Command>,
    activity: ActivitySink,
    task: JoinHandle<()>,
    _subscription: Subscription,
}

impl IdleMonitor {
    /// Create a monitor with its collaborators
    pub fn new(
        config: MonitorConfig,
        auth: Arc<dyn AuthProvider>,
        navigator: Arc<dyn Navigator>,
        activity: Arc<dyn ActivitySource>,
    ) -> Result<Self, MonitorError> {
        config.validate()?;
        let (snapshots, _) = watch::channel(MonitorSnapshot::default());

        Ok(Self {
            config,
            auth,
            navigator,
            activity,
            snapshots,
            running: None,
            unprotected: None,
        })
    }

    /// Begin observing `session`.
    ///
    /// Calling this again for the session already being observed restarts
    /// the idle clock. A different session replaces the current one. Must be
    /// called from within a tokio runtime.
    pub fn start(&mut self, session: Session) -> Result<(), MonitorError> {
        if session.is_expired() {
            return Err(MonitorError::SessionExpired);
        }

        if let Some(running) = &self.running {
            if running.session.id == session.id && !running.task.is_finished() {
                running
                    .commands
                    .send(Command::Restart)
                    .map_err(|_| MonitorError::NotRunning)?;
                debug!("Restarted idle clock for session {}", session.id);
                return Ok(());
            }
        }

        {
            let current = self.snapshots.borrow();
            if current.is_expired() && current.session_id == Some(session.id) {
                return Err(MonitorError::SessionExpired);
            }
        }

        self.stop();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| MonitorError::Runtime(e.to_string()))?;

        let (sink, activity_rx) = ActivitySink::channel();
        let subscription = match Subscription::attach(
            self.activity.clone(),
            &self.config.activity_events,
            sink.clone(),
        ) {
            Ok(subscription) => subscription,
            Err(e) => return self.listener_failure(session, e),
        };

        let now = Instant::now();
        let mut machine = IdleStateMachine::new(self.config.clone());
        machine.start(now)?;
        self.snapshots
            .send_replace(machine.snapshot(now, Some(session.id)));

        info!(
            "Idle monitor started for session {} (user {}), logout after {}s idle",
            session.id,
            session.username,
            self.config.idle_budget.as_secs()
        );

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            machine,
            session: session.clone(),
            auth: self.auth.clone(),
            navigator: self.navigator.clone(),
            login_route: self.config.login_route.clone(),
            commands: commands_rx,
            activity: activity_rx,
            snapshots: self.snapshots.clone(),
        };
        let task = runtime.spawn(worker.run());

        self.running = Some(Running {
            session,
            commands,
            activity: sink,
            task,
            _subscription: subscription,
        });

        Ok(())
    }

    /// Forward one qualifying activity event
    pub fn record_activity(&self, kind: ActivityKind) -> Result<(), MonitorError> {
        let running = self.running.as_ref().ok_or(MonitorError::NotRunning)?;
        if running.activity.notify(kind) {
            Ok(())
        } else {
            Err(MonitorError::NotRunning)
        }
    }

    /// Dismiss the warning and restart the idle clock
    pub fn extend_session(&self) -> Result<(), MonitorError> {
        if self.snapshots.borrow().is_expired() {
            return Err(MonitorError::SessionExpired);
        }
        let running = self.running.as_ref().ok_or(MonitorError::NotRunning)?;
        running
            .commands
            .send(Command::Extend)
            .map_err(|_| MonitorError::NotRunning)
    }

    /// The backend refused the session token (HTTP 401). Logs out now,
    /// whether or not the session is idle-monitored.
    pub fn session_rejected(&self) {
        let session = match (&self.running, &self.unprotected) {
            (Some(running), _) => {
                warn!("Backend rejected session {}", running.session.id);
                if running.commands.send(Command::Reject).is_ok() {
                    return;
                }
                &running.session
            }
            (None, Some(session)) => {
                warn!("Backend rejected unmonitored session {}", session.id);
                session
            }
            (None, None) => {
                debug!("Backend rejection with no session observed");
                return;
            }
        };

        self.force_logout(session, ExpiryReason::ServerRejected);
    }

    /// Detach listeners and cancel all timers. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let session_id = match (self.running.take(), self.unprotected.take()) {
            (Some(running), _) => {
                running.task.abort();
                running.session.id
            }
            (None, Some(session)) => session.id,
            (None, None) => return,
        };

        self.snapshots.send_if_modified(|current| {
            if current.is_expired() {
                return false;
            }
            *current = MonitorSnapshot::default();
            true
        });

        info!("Idle monitor stopped for session {}", session_id);
    }

    /// Current state for the warning dialog
    pub fn snapshot(&self) -> MonitorSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Subscribe to state changes
    pub fn watch(&self) -> watch::Receiver<MonitorSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    fn listener_failure(&mut self, session: Session, err: MonitorError) -> Result<(), MonitorError> {
        match self.config.listener_failure {
            ListenerFailurePolicy::FailClosed => {
                warn!("Refusing to start session {} unprotected: {}", session.id, err);
                Err(err)
            }
            ListenerFailurePolicy::ProceedUnprotected => {
                warn!(
                    "Session {} continues without idle protection: {}",
                    session.id, err
                );
                self.snapshots.send_replace(MonitorSnapshot {
                    session_id: Some(session.id),
                    ..MonitorSnapshot::default()
                });
                self.unprotected = Some(session);
                Ok(())
            }
        }
    }

    /// Expire `session` without a worker: no running task, or the task is gone
    fn force_logout(&self, session: &Session, reason: ExpiryReason) {
        {
            let current = self.snapshots.borrow();
            if current.is_expired() && current.session_id == Some(session.id) {
                return;
            }
        }

        info!(
            "Session {} for user {} expired: {}",
            session.id, session.username, reason
        );
        logout_quietly(self.auth.as_ref(), session);

        self.snapshots.send_replace(MonitorSnapshot {
            state: MonitorState::Expired,
            session_id: Some(session.id),
            remaining_secs: Some(0),
            expiry_reason: Some(reason),
            ..MonitorSnapshot::default()
        });
        self.navigator.navigate(&self.config.login_route);
    }
}

impl Drop for IdleMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Task that owns the state machine while a session is observed
struct Worker {
    machine: IdleStateMachine,
    session: Session,
    auth: Arc<dyn AuthProvider>,
    navigator: Arc<dyn Navigator>,
    login_route: String,
    commands: mpsc::UnboundedReceiver<Command>,
    activity: mpsc::UnboundedReceiver<ActivityKind>,
    snapshots: watch::Sender<MonitorSnapshot>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let wake = self.machine.next_wake();

            let transitions = tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(kind) = self.activity.recv() => {
                    debug!("Activity: {}", kind);
                    vec![self.machine.record_activity(Instant::now())]
                }
                _ = sleep_until(wake) => self.machine.poll(Instant::now()),
            };

            let expired = transitions.iter().find_map(|transition| match transition {
                Transition::Expired(reason) => Some(*reason),
                _ => None,
            });

            if let Some(reason) = expired {
                self.expire(reason);
                break;
            }

            if transitions
                .iter()
                .any(|transition| *transition != Transition::ActivityIgnored)
            {
                self.publish();
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> Vec<Transition> {
        let now = Instant::now();
        let result = match command {
            Command::Restart => self.machine.start(now),
            Command::Extend => self.machine.extend(now),
            Command::Reject => {
                return self
                    .machine
                    .expire(ExpiryReason::ServerRejected)
                    .into_iter()
                    .collect();
            }
        };

        match result {
            Ok(transition) => vec![transition],
            Err(e) => {
                debug!("Command ignored for session {}: {}", self.session.id, e);
                Vec::new()
            }
        }
    }

    /// Log out once, publish the terminal state, then leave the
    /// authenticated area whether or not logout succeeded.
    fn expire(&mut self, reason: ExpiryReason) {
        info!(
            "Session {} for user {} expired: {}",
            self.session.id, self.session.username, reason
        );

        logout_quietly(self.auth.as_ref(), &self.session);

        self.publish();
        self.navigator.navigate(&self.login_route);
    }

    fn publish(&self) {
        let snapshot = self.machine.snapshot(Instant::now(), Some(self.session.id));
        self.snapshots.send_if_modified(|current| {
            let changed = current.state != snapshot.state
                || current.remaining_secs != snapshot.remaining_secs
                || current.session_id != snapshot.session_id
                || current.logout_at != snapshot.logout_at;
            *current = snapshot;
            changed
        });
    }
}

/// Call the provider once. An error or a panic is logged and swallowed so the
/// caller can still leave the authenticated area.
fn logout_quietly(auth: &dyn AuthProvider, session: &Session) {
    match panic::catch_unwind(AssertUnwindSafe(|| auth.logout(session))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Logout failed for session {}: {}", session.id, e),
        Err(_) => warn!("Logout panicked for session {}", session.id),
    }
}

async fn sleep_until(wake: Option<Instant>) {
    match wake {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
