//! Session Runner
//!
//! Drives a [`HostSession`] at its fixed tick period. The session is moved
//! into a single tokio task that owns it outright; ticks and operator
//! requests are handled one at a time by that task, so no two mutations ever
//! overlap. The operator talks to it through a [`SessionHandle`].

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use crate::game::simulation::SimulationFactory;
use crate::network::transport::TransportFactory;
use crate::session::observable::SessionObserver;
use crate::session::state::{HostSession, SessionError, TickOutcome, Toggle};

/// Pending operator requests before senders wait.
const COMMAND_QUEUE: usize = 16;

/// Operator requests, each with a reply channel.
#[derive(Debug)]
enum SessionCommand {
    Start(oneshot::Sender<Result<(), SessionError>>),
    Stop(oneshot::Sender<Result<(), SessionError>>),
    StartOrStop(oneshot::Sender<Result<Toggle, SessionError>>),
    Shutdown(oneshot::Sender<()>),
}

/// Operator-side handle onto a running session loop.
///
/// Dropping the handle without [`return_to_menu`](Self::return_to_menu) still
/// shuts the session down once the loop notices.
#[derive(Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    observer: Arc<SessionObserver>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Move `session` into its own task and start ticking immediately.
    pub fn spawn<F, S>(session: HostSession<F, S>) -> Self
    where
        F: TransportFactory + 'static,
        F::Transport: 'static,
        S: SimulationFactory<F::Transport> + 'static,
        S::Simulation: 'static,
    {
        let observer = session.observer();
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let task = tokio::spawn(run_session_loop(session, command_rx));

        Self {
            commands,
            observer,
            task,
        }
    }

    /// Read-only view of the session.
    pub fn observer(&self) -> Arc<SessionObserver> {
        self.observer.clone()
    }

    /// Start a match.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::Start).await?
    }

    /// Stop the running match.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::Stop).await?
    }

    /// Start if waiting, stop if running.
    pub async fn start_or_stop(&self) -> Result<Toggle, SessionError> {
        self.request(SessionCommand::StartOrStop).await?
    }

    /// Shut the session down and wait until the loop has exited.
    ///
    /// Any tick already in progress finishes first. Once this returns no
    /// further tick runs.
    pub async fn return_to_menu(self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(SessionCommand::Shutdown(reply)).await.is_ok() {
            let _ = done.await;
        }

        if let Err(e) = self.task.await {
            error!("Session loop ended abnormally: {}", e);
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SessionError::Terminated)?;
        response.await.map_err(|_| SessionError::Terminated)
    }
}

/// The session loop. Owns the session until shutdown.
#[instrument(skip_all, fields(tick_ms = session.tick_period().as_millis() as u64))]
async fn run_session_loop<F, S>(
    mut session: HostSession<F, S>,
    mut commands: mpsc::Receiver<SessionCommand>,
) where
    F: TransportFactory,
    S: SimulationFactory<F::Transport>,
{
    let mut ticker = interval(session.tick_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Session loop started");

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => {
                match command {
                    Some(SessionCommand::Start(reply)) => {
                        let _ = reply.send(session.start());
                    }
                    Some(SessionCommand::Stop(reply)) => {
                        let _ = reply.send(session.stop());
                    }
                    Some(SessionCommand::StartOrStop(reply)) => {
                        let _ = reply.send(session.start_or_stop());
                    }
                    Some(SessionCommand::Shutdown(reply)) => {
                        session.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        info!("Operator handle dropped, shutting down");
                        session.shutdown();
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                match session.tick() {
                    TickOutcome::Advanced { remaining_ticks } if remaining_ticks % 10 == 0 => {
                        debug!("{} ticks remaining", remaining_ticks);
                    }
                    TickOutcome::MatchOver => info!("Match ran out of time"),
                    TickOutcome::PlayersChanged { connected } => {
                        info!("{} players in the waiting room", connected);
                    }
                    _ => {}
                }
            }
        }
    }

    info!("Session loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::simulation::ArenaMatchFactory;
    use crate::network::protocol::ServerMessage;
    use crate::session::testing::{ScriptFactory, ScriptHandle};
    use std::time::Duration;

    const PERIOD: Duration = Duration::from_millis(100);

    fn spawn_session(match_ticks: u32) -> (SessionHandle, ScriptHandle) {
        let factory = ScriptFactory::default();
        let script = factory.script.clone();
        let session =
            HostSession::new(factory, ArenaMatchFactory::new(match_ticks), PERIOD).unwrap();
        (SessionHandle::spawn(session), script)
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ticks_on_period() {
        let (handle, script) = spawn_session(50);

        tokio::time::sleep(Duration::from_millis(450)).await;
        // First tick fires immediately, then every period.
        let sent = script.lock().sent.len();
        assert!((4..=6).contains(&sent), "unexpected tick count {}", sent);
        assert!(script
            .messages()
            .iter()
            .all(|m| *m == ServerMessage::KeepAlive));

        handle.return_to_menu().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_room_reports_players() {
        let (handle, script) = spawn_session(50);
        let observer = handle.observer();

        script.set_connected(2);
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(observer.connected_players(), 2);
        assert!(script
            .messages()
            .contains(&ServerMessage::Waiting { connected: 2 }));

        handle.return_to_menu().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_no_players_through_handle() {
        let (handle, _script) = spawn_session(50);

        let result = handle.start().await;
        assert!(matches!(result, Err(SessionError::NoPlayers)));
        assert!(!handle.observer().running());

        handle.return_to_menu().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_runs_to_completion() {
        let (handle, script) = spawn_session(5);
        let observer = handle.observer();

        script.set_connected(2);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(handle.start_or_stop().await.unwrap(), Toggle::Started);
        assert!(observer.running());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!observer.running());
        assert_eq!(observer.connected_players(), 0);
        assert_eq!(script.stop_count(), 1);

        handle.return_to_menu().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_return_to_menu_while_running_stops_ticks() {
        let (handle, script) = spawn_session(1_000);
        let observer = handle.observer();

        script.set_connected(2);
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        handle.return_to_menu().await;
        assert!(!observer.running());
        assert_eq!(script.stop_count(), 1);
        assert_eq!(
            script.messages().last(),
            Some(&ServerMessage::Stop { final_connected: 2 })
        );

        let sent = script.lock().sent.len();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(script.lock().sent.len(), sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_shuts_down() {
        let (handle, script) = spawn_session(50);
        drop(handle);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let script = script.lock();
        assert_eq!(script.disconnected.len(), 1);
        let sent = script.sent.len();
        assert!(sent <= 1, "loop kept ticking: {} sends", sent);
    }
}
