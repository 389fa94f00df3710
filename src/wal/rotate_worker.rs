use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::Weak;
use std::sync::mpsc::Receiver;

use log::error;
use log::info;

use crate::api::types::Types;
use crate::wal::WalInner;

/// Completion signal for one in-flight rotation.
///
/// Stands in for a closed-channel broadcast: any number of writers may
/// block on `wait` and all wake on `notify`.
pub(crate) struct RotateSignal {
    done: Mutex<bool>,
    cv: Condvar,
}

impl RotateSignal {
    pub(crate) fn new() -> Self {
        Self {
            done: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn wait(&self) {
        let mut done = self.done.lock().unwrap();
        while !*done {
            done = self.cv.wait(done).unwrap();
        }
    }

    pub(crate) fn notify(&self) {
        let mut done = self.done.lock().unwrap();
        *done = true;
        self.cv.notify_all();
    }
}

/// Background worker that seals the current tail and creates the next
/// segment off the writer's critical path.
///
/// Holds only a weak handle on the engine so that an abandoned WAL (dropped
/// without `close`) still shuts the thread down: dropping the engine drops
/// the trigger sender, which ends the `recv` loop.
pub(crate) struct RotateWorker<T: Types> {
    wal: Weak<WalInner<T>>,
    rx: Receiver<u64>,
}

impl<T: Types> RotateWorker<T> {
    pub(crate) fn new(wal: Weak<WalInner<T>>, rx: Receiver<u64>) -> Self {
        Self { wal, rx }
    }

    pub(crate) fn spawn(self) {
        std::thread::Builder::new()
            .name("segwal_rotate_worker".to_string())
            .spawn(move || {
                self.run();
            })
            .expect("failed to start rotation worker thread");
    }

    fn run(self) {
        loop {
            let Ok(index_start) = self.rx.recv() else {
                info!("rotation worker trigger channel closed, quit");
                return;
            };
            let Some(wal) = self.wal.upgrade() else {
                return;
            };

            let done = {
                let mut write = wal.write.lock().unwrap();

                // Close raced with a real trigger. The sealed tail's
                // metadata is stale but recovery handles exactly that, so
                // do nothing here.
                if wal.is_closed() {
                    return;
                }

                if let Err(e) = wal.rotate_segment_locked(index_start) {
                    // Rotation errors indicate bugs; log them rather than
                    // poisoning the writer path.
                    error!("rotate error: {}", e);
                }
                write.await_rotate.take()
            };

            // Lock released; unblock any writer waiting on this rotation.
            if let Some(signal) = done {
                signal.notify();
            }
        }
    }
}
