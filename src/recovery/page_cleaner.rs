// Page flush helper for early apply batches
//
// A background thread waits on the flush-start event, writes every dirty
// page of the cache and signals flush-end. Requests are serialised by a
// writer mutex so only one flush request is in flight at a time.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error};
use parking_lot::{Condvar, Mutex};

use crate::recovery::error::{RecoveryError, Result};
use crate::recovery::hooks::PageCache;

#[derive(Default)]
struct FlushState {
    requested: u64,
    completed: u64,
    shutdown: bool,
    last_error: Option<String>,
}

struct Shared {
    state: Mutex<FlushState>,
    flush_start: Condvar,
    flush_end: Condvar,
}

pub struct PageCleaner {
    shared: Arc<Shared>,
    writer_mutex: Mutex<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PageCleaner {
    /// Start the helper thread
    pub fn start(page_cache: Arc<dyn PageCache>) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(FlushState::default()),
            flush_start: Condvar::new(),
            flush_end: Condvar::new(),
        });
        let worker = shared.clone();
        let handle = thread::Builder::new()
            .name("recv-page-cleaner".to_string())
            .spawn(move || Self::run(worker, page_cache))
            .map_err(|e| RecoveryError::InvalidState(format!("cannot start page cleaner: {}", e)))?;

        Ok(Self {
            shared,
            writer_mutex: Mutex::new(()),
            handle: Mutex::new(Some(handle)),
        })
    }

    fn run(shared: Arc<Shared>, page_cache: Arc<dyn PageCache>) {
        let mut state = shared.state.lock();
        loop {
            while state.requested == state.completed && !state.shutdown {
                shared.flush_start.wait(&mut state);
            }
            if state.shutdown {
                break;
            }
            let target = state.requested;
            drop(state);

            debug!("Page cleaner flushing dirty pages");
            let result = page_cache.flush_all();

            state = shared.state.lock();
            if let Err(e) = result {
                error!("Page cleaner flush failed: {}", e);
                state.last_error = Some(e.to_string());
            }
            state.completed = target;
            shared.flush_end.notify_all();
        }
        // Nobody waits forever on a stopped cleaner
        state.completed = state.requested;
        shared.flush_end.notify_all();
    }

    /// Ask the helper to flush and wait until it is done
    pub fn flush(&self) -> Result<()> {
        let _writer = self.writer_mutex.lock();
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(RecoveryError::InvalidState(
                "page cleaner is shut down".to_string(),
            ));
        }
        state.requested += 1;
        let target = state.requested;
        self.shared.flush_start.notify_one();
        while state.completed < target {
            self.shared.flush_end.wait(&mut state);
        }
        match state.last_error.take() {
            Some(e) => Err(RecoveryError::InvalidState(format!("page flush failed: {}", e))),
            None => Ok(()),
        }
    }

    /// Stop the helper thread. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.flush_start.notify_all();
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("Page cleaner thread panicked");
            }
        }
    }
}

impl Drop for PageCleaner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
