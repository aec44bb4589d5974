//! Cancellable single-shot scheduled task.
//!
//! `schedule` replaces any pending deadline under one lock, so a burst of
//! triggers collapses into a single callback `delay` after the last one. The
//! callback runs on the debouncer's own thread with no lock held.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

struct State {
    deadline: Option<Instant>,
    fired: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    cv: Condvar,
}

pub struct Debouncer {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    /// Spawn the timer thread. Fails only if the OS refuses a new thread.
    pub fn spawn<F>(name: &str, callback: F) -> std::io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State { deadline: None, fired: 0, shutdown: false }),
            cv: Condvar::new(),
        });
        let worker = shared.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(&worker, &callback))?;
        Ok(Self { shared, thread: Mutex::new(Some(handle)) })
    }

    /// (Re)arm the timer to fire `delay` from now.
    pub fn schedule(&self, delay: Duration) {
        let mut st = self.shared.state.lock();
        if st.shutdown {
            return;
        }
        st.deadline = Some(Instant::now() + delay);
        self.shared.cv.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn cancel(&self) {
        self.shared.state.lock().deadline = None;
        self.shared.cv.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.shared.state.lock().deadline.is_some()
    }

    #[cfg(test)]
    pub(crate) fn fired_count(&self) -> u64 {
        self.shared.state.lock().fired
    }

    /// Stop the timer thread. Safe to call more than once and from the
    /// callback itself (the thread is then detached rather than joined).
    pub fn shutdown(&self) {
        {
            let mut st = self.shared.state.lock();
            st.shutdown = true;
            st.deadline = None;
            self.shared.cv.notify_one();
        }
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        if handle.thread().id() != thread::current().id() {
            let _ = handle.join();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: &Shared, callback: &dyn Fn()) {
    let mut st = shared.state.lock();
    loop {
        if st.shutdown {
            return;
        }
        match st.deadline {
            None => shared.cv.wait(&mut st),
            Some(at) if Instant::now() >= at => {
                st.deadline = None;
                st.fired += 1;
                MutexGuard::unlocked(&mut st, callback);
            }
            Some(at) => {
                let _ = shared.cv.wait_until(&mut st, at);
            }
        }
    }
}
