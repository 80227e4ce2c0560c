//! Asynchronous start/stop state machine around one external server.
//!
//! [`ServiceController::start`] and [`ServiceController::stop`] only kick off
//! background work and return right away. Callers observe the outcome with
//! [`ServiceController::await_running`] and
//! [`ServiceController::await_terminated`], which resolve once the target
//! state is reached or raise the recorded failure when the service ends up
//! `FAILED`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use tempfile::TempDir;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, warn};

use super::profile::{DependencyLink, Endpoint, ServiceProfile};
use super::server::{EmbeddedServer, ServerProcess};
use super::LifecycleState;
use crate::error::{HarnessError, LifecycleError, ServerError, ShutdownFault};
use crate::support::{DirSupplier, PortSupplier, RandomPortSupplier, TempDirSupplier};

/// Port and directory sources for one controller.
#[derive(Clone)]
pub struct ServiceResources {
    host: String,
    ports: Arc<dyn PortSupplier>,
    dirs: Arc<dyn DirSupplier>,
}

impl ServiceResources {
    pub fn new() -> Self {
        Self {
            host: "localhost".to_string(),
            ports: Arc::new(RandomPortSupplier),
            dirs: Arc::new(TempDirSupplier::system()),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_ports(mut self, ports: impl PortSupplier + 'static) -> Self {
        self.ports = Arc::new(ports);
        self
    }

    pub fn with_dirs(mut self, dirs: impl DirSupplier + 'static) -> Self {
        self.dirs = Arc::new(dirs);
        self
    }
}

impl Default for ServiceResources {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceResources")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

/// Failure recorded when a service lands in `FAILED`.
#[derive(Debug, Clone)]
struct Failure {
    during: LifecycleState,
    error: Arc<ServerError>,
}

struct Shared<S: EmbeddedServer> {
    name: String,
    server: S,
    profile: ServiceProfile,
    resources: ServiceResources,
    state: watch::Sender<LifecycleState>,
    endpoint: Arc<OnceLock<Endpoint>>,
    failure: Mutex<Option<Failure>>,
    process: tokio::sync::Mutex<Option<S::Process>>,
    directories: Mutex<Vec<TempDir>>,
    faults: Mutex<Vec<ShutdownFault>>,
    stop_requested: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Wait until `predicate` holds and return the observed state.
async fn settle(
    rx: &mut watch::Receiver<LifecycleState>,
    predicate: impl FnMut(&LifecycleState) -> bool,
) -> Option<LifecycleState> {
    rx.wait_for(predicate).await.ok().map(|state| *state)
}

impl<S: EmbeddedServer> Shared<S> {
    /// Atomically move `from → to`. Returns false if the current state is
    /// not `from`.
    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        debug_assert!(from.can_transition_to(to), "{from} -> {to}");
        let moved = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if moved {
            debug!("Service {} transitioned {from} -> {to}", self.name);
        }
        moved
    }

    fn fail(&self, during: LifecycleState, error: ServerError) {
        error!("Service {} failed while {during}: {error}", self.name);
        *lock(&self.failure) = Some(Failure {
            during,
            error: Arc::new(error),
        });
        self.transition(during, LifecycleState::Failed);
    }

    fn failure_error(&self) -> HarnessError {
        match lock(&self.failure).clone() {
            Some(Failure {
                during: LifecycleState::Stopping,
                error,
            }) => HarnessError::Shutdown {
                service: self.name.clone(),
                source: error,
            },
            Some(Failure { error, .. }) => HarnessError::Bootstrap {
                service: self.name.clone(),
                source: error,
            },
            None => HarnessError::Bootstrap {
                service: self.name.clone(),
                source: Arc::new(ServerError::startup("failure was not recorded")),
            },
        }
    }

    /// Acquire port and directories, build properties, launch the server.
    ///
    /// Acquired directories are pushed into `dirs` even when a later step
    /// fails, so they stay owned by the handle until disposal.
    async fn launch(
        &self,
        dirs: &mut Vec<TempDir>,
    ) -> Result<(Endpoint, S::Process), ServerError> {
        let port = self
            .resources
            .ports
            .acquire()
            .map_err(|e| ServerError::io(format!("acquiring a port for {}", self.name), e))?;
        for prefix in self.profile.dir_prefixes() {
            let dir = self.resources.dirs.acquire(prefix).map_err(|e| {
                ServerError::io(format!("creating the {prefix} directory"), e)
            })?;
            dirs.push(dir);
        }
        let paths: Vec<PathBuf> = dirs.iter().map(|dir| dir.path().to_path_buf()).collect();
        let endpoint = Endpoint::new(self.resources.host.clone(), port);
        let properties = self.profile.server_properties(&endpoint, &paths)?;
        debug!("Launching {} with {} properties", self.name, properties.len());
        let process = self.server.launch(&properties).await?;
        Ok((endpoint, process))
    }

    async fn bootstrap(self: Arc<Self>) {
        let worker = Arc::clone(&self);
        let launched = tokio::spawn(
            async move {
                let mut dirs = Vec::new();
                let result = worker.launch(&mut dirs).await;
                (dirs, result)
            }
            .in_current_span(),
        )
        .await;

        match launched {
            Ok((dirs, Ok((endpoint, process)))) => {
                lock(&self.directories).extend(dirs);
                *self.process.lock().await = Some(process);
                let _ = self.endpoint.set(endpoint.clone());
                self.transition(LifecycleState::Starting, LifecycleState::Running);
                info!("Service {} running at {endpoint}", self.name);
            }
            Ok((dirs, Err(error))) => {
                lock(&self.directories).extend(dirs);
                self.fail(LifecycleState::Starting, error);
            }
            Err(join_error) => {
                self.fail(
                    LifecycleState::Starting,
                    ServerError::Startup {
                        message: "launch task aborted".to_string(),
                        source: Some(Box::new(join_error)),
                    },
                );
            }
        }
    }

    async fn shut_down(self: Arc<Self>) {
        let mut rx = self.state.subscribe();
        let settled = settle(&mut rx, |state| state.is_settled()).await;
        if settled != Some(LifecycleState::Running) {
            debug!(
                "Service {} has nothing to stop (state {:?})",
                self.name, settled
            );
            return;
        }
        if !self.transition(LifecycleState::Running, LifecycleState::Stopping) {
            return;
        }

        let process = self.process.lock().await.take();
        let Some(mut process) = process else {
            self.transition(LifecycleState::Stopping, LifecycleState::Terminated);
            return;
        };

        let joined =
            tokio::spawn(async move { process.shutdown().await }.in_current_span()).await;
        match joined {
            Ok(outcome) => {
                for (component, error) in outcome.into_failures() {
                    error!(
                        "Error while shutting down {} component {component}: {error}",
                        self.name
                    );
                    lock(&self.faults).push(ShutdownFault {
                        service: self.name.clone(),
                        component,
                        message: error.to_string(),
                    });
                }
                self.transition(LifecycleState::Stopping, LifecycleState::Terminated);
                info!("Service {} terminated", self.name);
            }
            Err(join_error) => {
                self.fail(
                    LifecycleState::Stopping,
                    ServerError::Shutdown {
                        message: "shutdown task aborted".to_string(),
                        source: Some(Box::new(join_error)),
                    },
                );
            }
        }
    }
}

/// Handle to one managed external service.
///
/// Owns the service's port, its temporary directories and the running
/// process. Directories are removed by [`Self::close`] (or on drop), never
/// shared with another handle.
pub struct ServiceController<S: EmbeddedServer> {
    shared: Arc<Shared<S>>,
}

impl<S: EmbeddedServer> ServiceController<S> {
    pub fn new(server: S, profile: ServiceProfile, resources: ServiceResources) -> Self {
        let (state, _) = watch::channel(LifecycleState::New);
        Self {
            shared: Arc::new(Shared {
                name: profile.name().to_string(),
                server,
                profile,
                resources,
                state,
                endpoint: Arc::new(OnceLock::new()),
                failure: Mutex::new(None),
                process: tokio::sync::Mutex::new(None),
                directories: Mutex::new(Vec::new()),
                faults: Mutex::new(Vec::new()),
                stop_requested: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> LifecycleState {
        *self.shared.state.borrow()
    }

    /// Receiver that observes every state change of this handle.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.shared.state.subscribe()
    }

    /// Bound endpoint. `None` until the service has reached `RUNNING`.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.shared.endpoint.get().cloned()
    }

    /// `host:port` of the running service.
    pub fn bind_address(&self) -> Option<String> {
        self.endpoint().map(|endpoint| endpoint.to_string())
    }

    /// Directories currently owned by this handle.
    pub fn directories(&self) -> Vec<PathBuf> {
        lock(&self.shared.directories)
            .iter()
            .map(|dir| dir.path().to_path_buf())
            .collect()
    }

    /// Faults swallowed during shutdown and directory cleanup.
    pub fn shutdown_faults(&self) -> Vec<ShutdownFault> {
        lock(&self.shared.faults).clone()
    }

    /// Link a dependent service uses to reach this one.
    pub fn dependency_link(&self) -> DependencyLink {
        DependencyLink::new(
            self.shared.name.clone(),
            self.shared.state.subscribe(),
            Arc::clone(&self.shared.endpoint),
        )
    }

    /// Begin startup in the background: `NEW → STARTING`.
    ///
    /// Returns before the service is running. A handle can be started once;
    /// any later call is a usage error.
    pub fn start(&self) -> Result<(), LifecycleError> {
        let runtime = Handle::try_current().map_err(|_| LifecycleError::NoRuntime {
            service: self.shared.name.clone(),
        })?;
        if !self
            .shared
            .transition(LifecycleState::New, LifecycleState::Starting)
        {
            return Err(LifecycleError::AlreadyStarted {
                service: self.shared.name.clone(),
                state: self.state(),
            });
        }
        info!("Starting service {}", self.shared.name);
        runtime.spawn(Arc::clone(&self.shared).bootstrap().in_current_span());
        Ok(())
    }

    /// Begin a graceful shutdown in the background.
    ///
    /// Idempotent: only the first call has an effect. A handle still in
    /// `NEW` moves straight to `TERMINATED`; a handle that is starting is
    /// stopped once startup settles; a failed handle stays `FAILED`.
    pub fn stop(&self) -> Result<(), LifecycleError> {
        if self.shared.stop_requested.swap(true, Ordering::SeqCst) {
            debug!("Stop of {} already requested", self.shared.name);
            return Ok(());
        }
        if self
            .shared
            .transition(LifecycleState::New, LifecycleState::Terminated)
        {
            return Ok(());
        }
        let Ok(runtime) = Handle::try_current() else {
            self.shared.stop_requested.store(false, Ordering::SeqCst);
            return Err(LifecycleError::NoRuntime {
                service: self.shared.name.clone(),
            });
        };
        info!("Stopping service {}", self.shared.name);
        runtime.spawn(Arc::clone(&self.shared).shut_down().in_current_span());
        Ok(())
    }

    /// Resolve once the service is `RUNNING` and return its endpoint.
    ///
    /// Blocks without a timeout. Raises the recorded failure if the service
    /// lands in `FAILED` instead.
    pub async fn await_running(&self) -> Result<Endpoint, HarnessError> {
        let mut rx = self.shared.state.subscribe();
        if *rx.borrow() == LifecycleState::New {
            return Err(LifecycleError::NotStarted {
                service: self.shared.name.clone(),
            }
            .into());
        }
        match settle(&mut rx, |state| state.is_settled()).await {
            Some(LifecycleState::Running) => self.endpoint().ok_or_else(|| {
                HarnessError::Bootstrap {
                    service: self.shared.name.clone(),
                    source: Arc::new(ServerError::startup("endpoint missing after startup")),
                }
            }),
            Some(LifecycleState::Failed) => Err(self.shared.failure_error()),
            Some(state) => Err(LifecycleError::NotRunning {
                service: self.shared.name.clone(),
                state,
            }
            .into()),
            None => Err(LifecycleError::NotStarted {
                service: self.shared.name.clone(),
            }
            .into()),
        }
    }

    /// [`Self::await_running`] bounded by `limit`.
    pub async fn await_running_for(&self, limit: Duration) -> Result<Endpoint, HarnessError> {
        tokio::time::timeout(limit, self.await_running())
            .await
            .map_err(|_| HarnessError::Timeout {
                service: self.shared.name.clone(),
                target: LifecycleState::Running,
                waited: limit,
            })?
    }

    /// Resolve once the service is `TERMINATED`.
    ///
    /// Raises the recorded failure if the service is or becomes `FAILED`.
    pub async fn await_terminated(&self) -> Result<(), HarnessError> {
        let mut rx = self.shared.state.subscribe();
        match settle(&mut rx, |state| state.is_terminal()).await {
            Some(LifecycleState::Terminated) => Ok(()),
            Some(_) => Err(self.shared.failure_error()),
            None => Err(LifecycleError::NotStarted {
                service: self.shared.name.clone(),
            }
            .into()),
        }
    }

    /// [`Self::await_terminated`] bounded by `limit`.
    pub async fn await_terminated_for(&self, limit: Duration) -> Result<(), HarnessError> {
        tokio::time::timeout(limit, self.await_terminated())
            .await
            .map_err(|_| HarnessError::Timeout {
                service: self.shared.name.clone(),
                target: LifecycleState::Terminated,
                waited: limit,
            })?
    }

    /// Stop (if needed), wait for a terminal state, then delete the owned
    /// directories and drop the process reference.
    ///
    /// Never fails: anything that goes wrong is logged and kept in
    /// [`Self::shutdown_faults`].
    pub async fn close(&self) {
        if let Err(e) = self.stop() {
            warn!("Could not stop {}: {e}", self.shared.name);
        }
        if let Err(e) = self.await_terminated().await {
            debug!("Service {} closed after failure: {e}", self.shared.name);
        }
        self.shared.process.lock().await.take();

        let dirs = std::mem::take(&mut *lock(&self.shared.directories));
        for dir in dirs {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("Failed to remove directory {}: {e}", path.display());
                lock(&self.shared.faults).push(ShutdownFault {
                    service: self.shared.name.clone(),
                    component: "directories".to_string(),
                    message: format!("{}: {e}", path.display()),
                });
            } else {
                debug!("Removed directory {}", path.display());
            }
        }
    }
}

impl<S: EmbeddedServer> std::fmt::Debug for ServiceController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceController")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("endpoint", &self.endpoint())
            .finish()
    }
}
