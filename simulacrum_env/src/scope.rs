//! Structured concurrency for simulations.
//!
//! A [`TaskScope`] owns every task spawned into it and every child scope
//! created from it. Halting a scope halts its members in reverse order of
//! registration, so resources acquired last are released first:
//!
//! ```text
//! simulation (root)
//!  ├── [0] task "simulation"
//!  └── [1] scope "resources"          halted first
//!       ├── [0] scope "service:auth0" halted last
//!       │    ├── task "listener"
//!       │    └── task "connection" ...
//!       ├── [1] scope "service:api"
//!       └── [2] task "effects"        aborted first
//! ```
//!
//! Tasks that fail (return `Err`) when spawned with
//! [`TaskScope::spawn_linked`] report a [`Fault`] to the root of the tree.
//! The owner of the root decides what a fault means; scopes never halt
//! themselves.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn, Instrument};

use crate::error::EnvError;

/// Lifecycle of a scope. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// Accepting new tasks
    Running,

    /// Halt in progress, new tasks are refused
    Halting,

    /// Every member has been released
    Halted,
}

/// A failure reported by a linked task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Name of the scope the task belonged to
    pub scope: String,

    /// Name of the failed task
    pub task: String,

    /// Rendered error
    pub message: String,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}: {}", self.scope, self.task, self.message)
    }
}

/// Receiving end of the fault channel of a scope tree.
pub type FaultReceiver = mpsc::UnboundedReceiver<Fault>;

enum Member {
    Task { name: String, handle: JoinHandle<()> },
    Scope(Arc<TaskScope>),
}

impl Member {
    fn is_finished(&self) -> bool {
        match self {
            Member::Task { handle, .. } => handle.is_finished(),
            Member::Scope(scope) => scope.state() == ScopeState::Halted,
        }
    }
}

/// A node in the task tree.
pub struct TaskScope {
    /// Scope name (for logging and faults)
    name: String,

    /// Current lifecycle state
    state: watch::Sender<ScopeState>,

    /// Tasks and child scopes in registration order
    members: Mutex<Vec<Member>>,

    /// Fault channel shared by the whole tree
    faults: mpsc::UnboundedSender<Fault>,

    /// Receiver for faults, only present on the root until taken
    fault_rx: Mutex<Option<FaultReceiver>>,

    /// Serializes concurrent halts
    halt_lock: tokio::sync::Mutex<()>,
}

impl TaskScope {
    /// Creates a new root scope.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let (faults, fault_rx) = mpsc::unbounded_channel();
        Arc::new(Self::with_channel(name.into(), faults, Some(fault_rx)))
    }

    fn with_channel(
        name: String,
        faults: mpsc::UnboundedSender<Fault>,
        fault_rx: Option<FaultReceiver>,
    ) -> Self {
        let (state, _) = watch::channel(ScopeState::Running);
        Self {
            name,
            state,
            members: Mutex::new(Vec::new()),
            faults,
            fault_rx: Mutex::new(fault_rx),
            halt_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Creates a child scope that is halted together with this one.
    ///
    /// A child created on a scope that is no longer running starts out
    /// halted and refuses every task.
    pub fn child(&self, name: impl Into<String>) -> Arc<TaskScope> {
        let child = Arc::new(Self::with_channel(name.into(), self.faults.clone(), None));

        let mut members = self.lock_members();
        if self.state() == ScopeState::Running {
            members.retain(|m| !m.is_finished());
            members.push(Member::Scope(Arc::clone(&child)));
        } else {
            child.state.send_replace(ScopeState::Halted);
        }
        child
    }

    /// Returns the scope name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ScopeState {
        *self.state.borrow()
    }

    /// Returns true while the scope accepts new work.
    pub fn is_running(&self) -> bool {
        self.state() == ScopeState::Running
    }

    /// Takes the fault receiver. Only the root has one, and only once.
    pub fn take_faults(&self) -> Option<FaultReceiver> {
        self.fault_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Spawns a task owned by this scope.
    ///
    /// The task inherits the caller's tracing span.
    pub fn spawn<F>(&self, name: impl Into<String>, future: F) -> Result<(), EnvError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let mut members = self.lock_members();
        if self.state() != ScopeState::Running {
            return Err(EnvError::ScopeHalted(self.name.clone()));
        }

        members.retain(|m| !m.is_finished());
        trace!(scope = %self.name, task = %name, "spawning task");
        let handle = tokio::spawn(future.in_current_span());
        members.push(Member::Task { name, handle });
        Ok(())
    }

    /// Spawns a task whose failure is reported as a [`Fault`].
    pub fn spawn_linked<F, E>(&self, name: impl Into<String>, future: F) -> Result<(), EnvError>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let name = name.into();
        let faults = self.faults.clone();
        let scope = self.name.clone();
        let task = name.clone();

        self.spawn(name, async move {
            if let Err(err) = future.await {
                let fault = Fault {
                    scope,
                    task,
                    message: err.to_string(),
                };
                debug!(%fault, "linked task failed");
                // The root may already be gone during teardown.
                let _ = faults.send(fault);
            }
        })
    }

    /// Runs a future as a separate task of this scope and waits for its output.
    ///
    /// A panic or cancellation of the task surfaces as
    /// [`EnvError::TaskAborted`] instead of unwinding into the caller.
    pub async fn run<F, T>(&self, name: impl Into<String>, future: F) -> Result<T, EnvError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let name = name.into();
        let (tx, rx) = oneshot::channel();
        self.spawn(name.clone(), async move {
            let _ = tx.send(future.await);
        })?;
        rx.await.map_err(|_| EnvError::aborted(name))
    }

    /// Halts the scope: refuses new work, then releases every member in
    /// reverse order, waiting for each one to finish.
    ///
    /// Concurrent calls wait for each other; calling it on a halted scope
    /// returns immediately. Dropping the returned future leaves unreleased
    /// members in place for the next call.
    pub fn halt(&self) -> BoxFuture<'_, ()> {
        async move {
            let _guard = self.halt_lock.lock().await;
            if self.state() == ScopeState::Halted {
                return;
            }

            {
                let _members = self.lock_members();
                self.state.send_replace(ScopeState::Halting);
            }
            debug!(scope = %self.name, "halting scope");

            while let Some(member) = self.pop_member() {
                // Put back if this halt is dropped before the member is released.
                let mut releasing = Releasing {
                    scope: self,
                    member: Some(member),
                };
                match releasing.member.as_mut() {
                    Some(Member::Task { name, handle }) => {
                        handle.abort();
                        match handle.await {
                            Err(err) if err.is_panic() => {
                                warn!(scope = %self.name, task = %name, "task panicked");
                            }
                            _ => trace!(scope = %self.name, task = %name, "task released"),
                        }
                    }
                    Some(Member::Scope(child)) => child.halt().await,
                    None => {}
                }
                releasing.member = None;
            }

            self.state.send_replace(ScopeState::Halted);
            debug!(scope = %self.name, "scope halted");
        }
        .boxed()
    }

    /// Waits until the scope has been halted.
    pub async fn halted(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|state| *state == ScopeState::Halted).await;
    }

    fn pop_member(&self) -> Option<Member> {
        self.lock_members().pop()
    }

    fn lock_members(&self) -> MutexGuard<'_, Vec<Member>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A member taken off the list for release.
struct Releasing<'a> {
    scope: &'a TaskScope,
    member: Option<Member>,
}

impl Drop for Releasing<'_> {
    fn drop(&mut self) {
        if let Some(member) = self.member.take() {
            self.scope.lock_members().push(member);
        }
    }
}

impl std::fmt::Debug for TaskScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScope")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("members", &self.lock_members().len())
            .finish()
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        let members = self.members.get_mut().unwrap_or_else(PoisonError::into_inner);
        for member in members.drain(..) {
            if let Member::Task { handle, .. } = member {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Records its name into a shared log when dropped.
    struct DropLog(&'static str, Arc<Mutex<Vec<&'static str>>>);

    impl Drop for DropLog {
        fn drop(&mut self) {
            self.1.lock().unwrap().push(self.0);
        }
    }

    fn parked(guard: DropLog) -> impl Future<Output = ()> + Send + 'static {
        async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        }
    }

    #[tokio::test]
    async fn test_halt_releases_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let root = TaskScope::new("root");

        root.spawn("first", parked(DropLog("first", log.clone()))).unwrap();
        let child = root.child("child");
        child.spawn("inner", parked(DropLog("inner", log.clone()))).unwrap();
        root.spawn("last", parked(DropLog("last", log.clone()))).unwrap();

        root.halt().await;

        assert_eq!(*log.lock().unwrap(), vec!["last", "inner", "first"]);
        assert_eq!(root.state(), ScopeState::Halted);
        assert_eq!(child.state(), ScopeState::Halted);
    }

    #[tokio::test]
    async fn test_halted_scope_refuses_work() {
        let root = TaskScope::new("root");
        root.halt().await;

        assert!(matches!(
            root.spawn("late", async {}),
            Err(EnvError::ScopeHalted(_))
        ));

        let child = root.child("late-child");
        assert_eq!(child.state(), ScopeState::Halted);
    }

    #[tokio::test]
    async fn test_run_returns_output() {
        let root = TaskScope::new("root");
        let value = root.run("answer", async { 42 }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_run_isolates_panics() {
        let root = TaskScope::new("root");
        let result: Result<(), _> = root
            .run("boom", async { panic!("handler blew up") })
            .await;

        assert!(matches!(result, Err(EnvError::TaskAborted(name)) if name == "boom"));
        assert!(root.is_running());
    }

    #[tokio::test]
    async fn test_linked_failure_reports_fault() {
        let root = TaskScope::new("root");
        let mut faults = root.take_faults().unwrap();
        assert!(root.take_faults().is_none());

        let child = root.child("service:api");
        child
            .spawn_linked("listener", async { Err::<(), _>("socket closed") })
            .unwrap();

        let fault = tokio::time::timeout(Duration::from_secs(1), faults.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fault.scope, "service:api");
        assert_eq!(fault.task, "listener");
        assert_eq!(fault.message, "socket closed");
    }

    #[tokio::test]
    async fn test_concurrent_halts_wait_for_each_other() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let root = TaskScope::new("root");
        root.spawn("a", parked(DropLog("a", log.clone()))).unwrap();
        root.spawn("b", parked(DropLog("b", log.clone()))).unwrap();

        tokio::join!(root.halt(), root.halt());

        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(root.state(), ScopeState::Halted);
        root.halted().await;
    }

    /// Blocks its worker thread for a while when dropped.
    struct SlowDrop(Duration);

    impl Drop for SlowDrop {
        fn drop(&mut self) {
            std::thread::sleep(self.0);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interrupted_halt_resumes() {
        use crate::listener::Listener;
        use crate::types::Protocol;
        use tokio::net::TcpStream;

        let log = Arc::new(Mutex::new(Vec::new()));
        let resources = TaskScope::new("resources");
        let service = resources.child("service:api");

        let listener = Listener::bind(Protocol::Http, None, None).await.unwrap();
        let port = listener.address().port;
        let own = Arc::clone(&service);
        service
            .spawn("listener", async move {
                let _listener = listener;
                let _own = own;
                std::future::pending::<()>().await;
            })
            .unwrap();
        service
            .spawn("slow", async move {
                let _slow = SlowDrop(Duration::from_millis(300));
                std::future::pending::<()>().await;
            })
            .unwrap();
        resources.spawn("tail", parked(DropLog("tail", log.clone()))).unwrap();

        let first = tokio::time::timeout(Duration::from_millis(50), resources.halt()).await;
        assert!(first.is_err());
        assert_ne!(resources.state(), ScopeState::Halted);

        resources.halt().await;

        assert_eq!(resources.state(), ScopeState::Halted);
        assert_eq!(service.state(), ScopeState::Halted);
        assert_eq!(*log.lock().unwrap(), vec!["tail"]);
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn test_finished_tasks_are_pruned() {
        let root = TaskScope::new("root");
        for _ in 0..10 {
            root.run("quick", async {}).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        root.spawn("tail", async {}).unwrap();

        assert_eq!(root.lock_members().len(), 1);
    }
}
