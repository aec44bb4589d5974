//! Interest-scan dispatch: runs viewer rescans off the thread that noticed
//! the movement, so a slow scan never stalls physics or script callbacks.

use crate::viewer::ViewerPipeline;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Weak;
use std::thread::{self, JoinHandle};

/// Where [`ViewerPipeline::request_rescan`] sends its work.
#[derive(Clone)]
pub struct ScanHandle {
    tx: Option<Sender<Weak<ViewerPipeline>>>,
}

impl ScanHandle {
    /// Run scans on the requesting thread. For tools and deterministic tests.
    pub fn inline() -> Self {
        Self { tx: None }
    }

    pub fn dispatch(&self, viewer: Weak<ViewerPipeline>) {
        match &self.tx {
            Some(tx) => {
                if tx.send(viewer.clone()).is_err() {
                    log::warn!("scan worker gone; running interest scan inline");
                    run_one(&viewer);
                }
            }
            None => run_one(&viewer),
        }
    }
}

fn run_one(viewer: &Weak<ViewerPipeline>) {
    if let Some(v) = viewer.upgrade() {
        v.run_pending_scan();
    }
}

/// Owns one scan thread; dropping it stops the thread and joins it.
/// Handles that outlive the worker fall back to inline scans.
pub struct ScanWorker {
    tx: Sender<Weak<ViewerPipeline>>,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ScanWorker {
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, rx): (Sender<Weak<ViewerPipeline>>, Receiver<Weak<ViewerPipeline>>) =
            crossbeam_channel::unbounded();
        let (stop, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
            loop {
                crossbeam_channel::select! {
                    recv(rx) -> job => match job {
                        Ok(job) => run_one(&job),
                        Err(_) => return,
                    },
                    recv(stop_rx) -> _ => return,
                }
            }
        })?;
        Ok(Self { tx, stop: Some(stop), thread: Some(thread) })
    }

    pub fn handle(&self) -> ScanHandle {
        ScanHandle { tx: Some(self.tx.clone()) }
    }
}

impl Drop for ScanWorker {
    fn drop(&mut self) {
        // dropping the stop sender disconnects `stop_rx` and wakes the select
        self.stop = None;
        if let Some(t) = self.thread.take() {
            if t.thread().id() != thread::current().id() {
                let _ = t.join();
            }
        }
    }
}
