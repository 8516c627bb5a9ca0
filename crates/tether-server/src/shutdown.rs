//! Process shutdown: one cancellation token for every long-lived task, and
//! a bounded wait for the registered ones to drain.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

struct Tracked {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// Shared by the control server, the controller, the relay and the
/// credential push worker.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<Tracked>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Track a task that exits once the token is cancelled.
    pub fn register(&self, name: &'static str, handle: JoinHandle<()>) {
        debug!(task = name, "tracking task for shutdown");
        self.tasks.lock().push(Tracked { name, handle });
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token and wait up to `timeout` for every registered task.
    /// Returns the names of tasks that had to be aborted.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) -> Vec<&'static str> {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.token.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        info!(
            task_count = tasks.len(),
            timeout_ms = timeout.as_millis() as u64,
            "draining tasks"
        );

        let deadline = tokio::time::Instant::now() + timeout;
        let mut aborted = Vec::new();
        for Tracked { name, mut handle } in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!(task = name, "task stopped"),
                Ok(Err(e)) => warn!(task = name, error = %e, "task ended abnormally"),
                Err(_) => {
                    warn!(task = name, "task did not stop in time, aborting");
                    handle.abort();
                    aborted.push(name);
                }
            }
        }
        aborted
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use secrecy::SecretString;
    use tether_core::protocol::ProtocolClient;
    use tether_credentials::CredentialSync;
    use tether_link::mock::MockProtocol;
    use tether_link::{ConnectionController, LinkState, RetryPolicy};
    use tether_store::{CredentialCache, Database};

    use crate::server::{start, AppState, ServerConfig};

    #[tokio::test]
    async fn stops_push_worker_and_control_server() {
        let coord = ShutdownCoordinator::new();
        let sync = CredentialSync::new(CredentialCache::new(Database::in_memory().unwrap()), None);
        coord.register("credential_push", sync.spawn_push_worker(coord.token()));

        let client: Arc<dyn ProtocolClient> = Arc::new(MockProtocol::new());
        let controller = ConnectionController::new(
            LinkState::new(),
            client,
            sync,
            RetryPolicy::default(),
            coord.token(),
        );
        let state = AppState::new(controller, "edge-1", SecretString::from("s"));
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        };
        let server = start(&config, state, coord.token()).await.unwrap();
        coord.register("control_server", server.task);
        assert_eq!(coord.task_count(), 2);

        let aborted = coord.graceful_shutdown(Some(Duration::from_secs(5))).await;
        assert!(aborted.is_empty(), "aborted: {aborted:?}");
        assert!(coord.is_shutting_down());
        assert_eq!(coord.task_count(), 0);
        assert!(tokio::net::TcpStream::connect(server.addr).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn aborts_tasks_that_ignore_cancellation() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        coord.register(
            "relay",
            tokio::spawn(async move { token.cancelled().await }),
        );
        coord.register(
            "stuck",
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(300)).await;
            }),
        );

        let aborted = coord
            .graceful_shutdown(Some(Duration::from_millis(100)))
            .await;
        assert_eq!(aborted, vec!["stuck"]);
    }
}
