//! Keeps a session's playback view in step with the remote player.
//!
//! The service only supports polling. The [`PlaybackStateSynchronizer`]
//! therefore:
//! * polls every [`Config::poll_interval`](crate::config::Config) for each
//!   watched session
//! * polls once more, after [`Config::command_settle`](crate::config::Config),
//!   following every transport command, because the remote player applies a
//!   command some time after acknowledging it
//!
//! Results are published per session through a [`watch`] channel. Views are
//! ordered by the instant their read was issued: a view read before the one
//! already published is dropped, so a slow poll cannot overwrite the result
//! of a faster, later one.
//!
//! # Lifecycle
//!
//! Each watched session owns one background task, started with
//! [`start`](PlaybackStateSynchronizer::start) and cancelled with
//! [`stop`](PlaybackStateSynchronizer::stop). A poll that completes after its
//! session was stopped is discarded. A session whose credentials can no
//! longer be resolved ends itself the same way. Dropping the synchronizer
//! stops all tasks.

use std::{collections::HashMap, sync::Arc, time::SystemTime};

use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{self, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    authority::TokenAuthority,
    config::Config,
    credentials::{Clock, SessionId},
    error::{Error, ErrorKind, Result},
    gateway::AuthenticatedGateway,
    playback::{Command, PlaybackView},
    session::SessionStore,
};

/// Outcome of the most recent poll.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PollStatus {
    /// Nothing has been read yet.
    #[default]
    Pending,

    /// The last poll succeeded.
    Ok,

    /// Polls have been failing since the last success; the view is stale.
    Failed(ErrorKind),

    /// The session is no longer polled.
    Stopped,
}

/// What subscribers of a session see.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// `None` while nothing is playing.
    pub view: Option<PlaybackView>,

    /// When the read behind `view` was issued.
    pub read_at: Option<SystemTime>,

    pub status: PollStatus,
}

type Sessions = HashMap<SessionId, Session>;

struct Session {
    views: Arc<watch::Sender<Snapshot>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Session {
    fn is_polling(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Whether anything still polls or listens to the session.
    fn is_live(&self) -> bool {
        self.is_polling() || self.views.receiver_count() > 0
    }
}

pub struct PlaybackStateSynchronizer {
    gateway: Arc<AuthenticatedGateway>,
    authority: Arc<TokenAuthority>,
    clock: Arc<dyn Clock>,

    poll_interval: Duration,
    settle: Duration,

    sessions: Arc<Mutex<Sessions>>,

    /// Parent of all session tokens.
    shutdown: CancellationToken,
}

impl PlaybackStateSynchronizer {
    #[must_use]
    pub fn new(
        gateway: Arc<AuthenticatedGateway>,
        authority: Arc<TokenAuthority>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        Self {
            gateway,
            authority,
            clock,
            poll_interval: config.poll_interval,
            settle: config.command_settle,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Reads the current playback once.
    ///
    /// Returns `None` when nothing is playing.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the read fails; see
    /// [`AuthenticatedGateway::call_with`].
    pub async fn poll(&self, access: &str) -> Result<Option<PlaybackView>> {
        read(&self.gateway, self.clock.as_ref(), access)
            .await
            .map(|(_, view)| view)
    }

    /// Re-polls after `command` was accepted, once the remote player has had
    /// time to apply it.
    ///
    /// The result is published to `session` if it is being watched. If the
    /// session is stopped meanwhile, the result is discarded and `Ok(None)`
    /// returned.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the read fails.
    pub async fn after_command(
        &self,
        session: SessionId,
        access: &str,
        command: &Command,
    ) -> Result<Option<PlaybackView>> {
        let watched = self.watched(session).await;
        let cancel = watched
            .as_ref()
            .map_or_else(|| self.shutdown.child_token(), |(_, cancel)| cancel.clone());

        let result = tokio::select! {
            () = cancel.cancelled() => {
                trace!("[{session}] stopped; skipping poll after {command}");
                return Ok(None);
            }
            result = async {
                time::sleep(self.settle).await;
                debug!("[{session}] polling after {command}");
                read(&self.gateway, self.clock.as_ref(), access).await
            } => result,
        };

        if cancel.is_cancelled() {
            trace!("[{session}] stopped; discarding poll after {command}");
            return Ok(None);
        }

        if let Some((views, _)) = watched {
            publish(&views, session, result.as_ref().cloned());
        }

        result.map(|(_, view)| view)
    }

    /// Starts polling `session` in the background.
    ///
    /// Credentials are loaded from `store` on every tick, resolved, and
    /// refreshed pairs are handed back to it. Polling stops by itself once
    /// the session's credentials can no longer be resolved.
    ///
    /// Starting a session that is already polled only subscribes again.
    pub async fn start(
        &self,
        session: SessionId,
        store: Arc<dyn SessionStore>,
    ) -> watch::Receiver<Snapshot> {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, entry| entry.is_live());
        let entry = sessions
            .entry(session)
            .or_insert_with(|| self.new_session());

        if !entry.is_polling() {
            info!("[{session}] watching playback");
            let poller = Poller {
                session,
                store,
                gateway: Arc::clone(&self.gateway),
                authority: Arc::clone(&self.authority),
                clock: Arc::clone(&self.clock),
                views: Arc::clone(&entry.views),
                sessions: Arc::clone(&self.sessions),
                poll_interval: self.poll_interval,
            };
            entry.task = Some(tokio::spawn(poller.run(entry.cancel.clone())));
        }

        entry.views.subscribe()
    }

    /// Stops polling `session` and discards results still in flight.
    ///
    /// Subscribers see [`PollStatus::Stopped`] before their channel closes.
    pub async fn stop(&self, session: SessionId) {
        let removed = self.sessions.lock().await.remove(&session);
        if let Some(entry) = removed {
            entry.cancel.cancel();
            entry.views.send_modify(|snapshot| snapshot.status = PollStatus::Stopped);
            info!("[{session}] stopped watching playback");
        }
    }

    /// Subscribes to `session` without starting a poll task.
    ///
    /// Only command follow-ups are published until [`start`](Self::start)
    /// is called. The session is forgotten once all its receivers are
    /// dropped.
    pub async fn subscribe(&self, session: SessionId) -> watch::Receiver<Snapshot> {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, entry| entry.is_live());
        sessions
            .entry(session)
            .or_insert_with(|| self.new_session())
            .views
            .subscribe()
    }

    /// Whether `session` has a running poll task.
    pub async fn is_polling(&self, session: SessionId) -> bool {
        self.sessions
            .lock()
            .await
            .get(&session)
            .is_some_and(Session::is_polling)
    }

    fn new_session(&self) -> Session {
        let (views, _) = watch::channel(Snapshot::default());
        Session {
            views: Arc::new(views),
            cancel: self.shutdown.child_token(),
            task: None,
        }
    }

    async fn watched(
        &self,
        session: SessionId,
    ) -> Option<(Arc<watch::Sender<Snapshot>>, CancellationToken)> {
        self.sessions
            .lock()
            .await
            .get(&session)
            .map(|entry| (Arc::clone(&entry.views), entry.cancel.clone()))
    }
}

impl Drop for PlaybackStateSynchronizer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// State of one background poll task.
struct Poller {
    session: SessionId,
    store: Arc<dyn SessionStore>,
    gateway: Arc<AuthenticatedGateway>,
    authority: Arc<TokenAuthority>,
    clock: Arc<dyn Clock>,
    views: Arc<watch::Sender<Snapshot>>,
    sessions: Arc<Mutex<Sessions>>,
    poll_interval: Duration,
}

impl Poller {
    async fn run(self, cancel: CancellationToken) {
        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let access = tokio::select! {
                () = cancel.cancelled() => break,
                access = self.access() => access,
            };

            let access = match access {
                Ok(Some(access)) => access,
                Ok(None) => {
                    self.retire(&cancel).await;
                    info!("[{}] credentials expired; stopped watching playback", self.session);
                    self.views.send_modify(|snapshot| snapshot.status = PollStatus::Stopped);
                    break;
                }
                Err(e) => {
                    publish(&self.views, self.session, Err(&e));
                    continue;
                }
            };

            let result = tokio::select! {
                () = cancel.cancelled() => break,
                result = read(&self.gateway, self.clock.as_ref(), &access) => result,
            };

            if cancel.is_cancelled() {
                break;
            }

            publish(&self.views, self.session, result.as_ref().cloned());
        }

        trace!("[{}] poll task finished", self.session);
    }

    /// Ends the session as [`stop`](PlaybackStateSynchronizer::stop) would.
    ///
    /// Command follow-ups still in flight are discarded, and later ones are
    /// no longer published.
    async fn retire(&self, cancel: &CancellationToken) {
        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(&self.session)
            .is_some_and(|entry| Arc::ptr_eq(&entry.views, &self.views))
        {
            sessions.remove(&self.session);
        }
        cancel.cancel();
    }

    /// Loads, resolves and persists the session's credentials.
    ///
    /// Returns `None` once they can no longer be resolved.
    async fn access(&self) -> Result<Option<String>> {
        let pair = self.store.load(self.session)?;
        let Ok(resolved) = self.authority.resolve(pair.as_ref()).await else {
            return Ok(None);
        };

        resolved.persist(self.store.as_ref(), self.session)?;
        Ok(Some(resolved.access))
    }
}

/// Reads playback, stamped with the instant the read was issued.
async fn read(
    gateway: &AuthenticatedGateway,
    clock: &dyn Clock,
    access: &str,
) -> Result<(SystemTime, Option<PlaybackView>)> {
    let read_at = clock.now();
    let view = gateway.playback_view(access, read_at).await?;
    Ok((read_at, view))
}

/// Publishes the outcome of a read.
///
/// Views older than the published one are dropped. A failure keeps the last
/// view and is reported only once per streak of failures.
fn publish(
    views: &watch::Sender<Snapshot>,
    session: SessionId,
    result: std::result::Result<(SystemTime, Option<PlaybackView>), &Error>,
) {
    views.send_if_modified(|snapshot| match result {
        Ok((read_at, view)) => {
            if snapshot.read_at.is_some_and(|last| last > read_at) {
                trace!("[{session}] dropping playback state read before the current one");
                return false;
            }

            if let PollStatus::Failed(_) = snapshot.status {
                info!("[{session}] playback state available again");
            }

            snapshot.view = view;
            snapshot.read_at = Some(read_at);
            snapshot.status = PollStatus::Ok;
            true
        }
        Err(e) => {
            if let PollStatus::Failed(_) = snapshot.status {
                debug!("[{session}] polling playback state still failing: {e}");
                return false;
            }

            warn!("[{session}] polling playback state failed: {e}");
            snapshot.status = PollStatus::Failed(e.kind);
            true
        }
    });
}
