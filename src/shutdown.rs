use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Default)]
struct GroupState {
    outstanding: usize,
    quit: bool,
}

/// A group of spawned tasks that share a single 'quit' signal.
///
/// Tasks are started through [ShutdownGroup::go], which refuses new tasks once [ShutdownGroup::quit]
///  was called. Tasks are expected to check [ShutdownGroup::is_quit] regularly (e.g. after a read
///  timeout) and return when it is set. [ShutdownGroup::wait] resolves once quit was signalled and
///  all accepted tasks returned.
///
/// Cloning is cheap, clones refer to the same group.
#[derive(Clone)]
pub struct ShutdownGroup {
    state: Arc<watch::Sender<GroupState>>,
}

impl Default for ShutdownGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownGroup {
    pub fn new() -> ShutdownGroup {
        ShutdownGroup {
            state: Arc::new(watch::Sender::new(GroupState::default())),
        }
    }

    /// Spawns `f` as a member of the group, returning `false` without spawning it if the group
    ///  was already told to quit.
    pub fn go<F>(&self, f: F) -> bool
    where F: Future<Output = ()> + Send + 'static
    {
        let accepted = self.state.send_if_modified(|s| {
            if s.quit {
                return false;
            }
            s.outstanding += 1;
            true
        });
        if !accepted {
            debug!("group is quitting, not starting a new task");
            return false;
        }

        let guard = OutstandingGuard { state: self.state.clone() };
        tokio::spawn(async move {
            let _guard = guard;
            f.await;
        });
        true
    }

    /// Signals all members to quit. Idempotent.
    pub fn quit(&self) {
        self.state.send_modify(|s| s.quit = true);
    }

    pub fn is_quit(&self) -> bool {
        self.state.borrow().quit
    }

    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // the sender lives in self, so the channel can not be closed here
        let _ = rx.wait_for(|s| s.quit && s.outstanding == 0).await;
    }
}

/// decrements the number of outstanding tasks when a task returns or panics
struct OutstandingGuard {
    state: Arc<watch::Sender<GroupState>>,
}
impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        self.state.send_modify(|s| s.outstanding -= 1);
    }
}
