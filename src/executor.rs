//! A single-concurrency FIFO task serializer. Every mutating or reading
//! operation against a `DataStore` runs as a task pushed here; tasks never
//! interleave, which is the store's only synchronization primitive.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

type Task = Box<dyn FnOnce() + Send>;

struct State {
    ready: bool,
    buffer: Vec<Task>,
    pending: usize,
}

/// Runs queued tasks one at a time on a dedicated worker thread. While
/// `Unready`, pushed tasks land in a side buffer unless `force_queueing` is
/// set (used by `loadDatabase` to enqueue itself ahead of user operations);
/// `set_ready` flips the executor and drains the buffer in submission
/// order.
pub struct Executor {
    state: Arc<Mutex<State>>,
    empty_cv: Arc<Condvar>,
    sender: Sender<Task>,
    worker: Option<JoinHandle<()>>,
}

impl Executor {
    pub fn new() -> Self {
        let (tx, rx): (Sender<Task>, Receiver<Task>) = unbounded();
        let state = Arc::new(Mutex::new(State {
            ready: false,
            buffer: Vec::new(),
            pending: 0,
        }));
        let empty_cv = Arc::new(Condvar::new());

        let worker_state = Arc::clone(&state);
        let worker_cv = Arc::clone(&empty_cv);
        let worker = std::thread::Builder::new()
            .name("docstore-executor".to_string())
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    task();
                    let mut st = worker_state.lock();
                    st.pending -= 1;
                    if st.pending == 0 {
                        worker_cv.notify_all();
                    }
                }
            })
            .expect("failed to spawn executor thread");

        Executor {
            state,
            empty_cv,
            sender: tx,
            worker: Some(worker),
        }
    }

    /// Enqueues `f` and blocks the caller until it has run, returning its
    /// result. When `force_queueing` is false and the executor is not yet
    /// ready, the task is held in the side buffer instead of running
    /// immediately.
    pub fn push<F, R>(&self, force_queueing: bool, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = crossbeam::channel::bounded(1);
        let task: Task = Box::new(move || {
            let _ = tx.send(f());
        });
        {
            let mut st = self.state.lock();
            st.pending += 1;
            if st.ready || force_queueing {
                let _ = self.sender.send(task);
            } else {
                st.buffer.push(task);
            }
        }
        rx.recv().expect("executor worker terminated before replying")
    }

    /// Flips the executor to ready and drains any buffered tasks, in the
    /// order they were originally pushed.
    pub fn set_ready(&self) {
        let mut st = self.state.lock();
        st.ready = true;
        let drained: Vec<Task> = st.buffer.drain(..).collect();
        drop(st);
        for task in drained {
            let _ = self.sender.send(task);
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// Blocks until the task queue is empty (no task running, none queued).
    pub fn on_empty(&self) {
        let mut st = self.state.lock();
        while st.pending != 0 {
            self.empty_cv.wait(&mut st);
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // Dropping `sender` (implicit, as a field drop happens after this
        // runs) closes the channel so the worker's `recv` loop ends.
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn tasks_run_in_fifo_order() {
        let exec = Arc::new(Executor::new());
        exec.set_ready();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..5 {
            let order = Arc::clone(&order);
            let exec = Arc::clone(&exec);
            handles.push(std::thread::spawn(move || {
                exec.push(false, move || {
                    order.lock().push(i);
                });
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        exec.on_empty();
        assert_eq!(order.lock().len(), 5);
    }

    #[test]
    fn unready_tasks_buffer_until_set_ready() {
        let exec = Executor::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c2 = Arc::clone(&counter);
        let handle = std::thread::spawn(move || {});
        handle.join().unwrap();
        // Pushing before ready from the same thread would block forever
        // waiting on its own buffered task, so push from a helper thread.
        let exec = Arc::new(exec);
        let exec2 = Arc::clone(&exec);
        let t = std::thread::spawn(move || {
            exec2.push(false, move || {
                c2.fetch_add(1, Ordering::SeqCst);
            });
        });
        // Give the buffered push a moment to land in the buffer.
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        exec.set_ready();
        t.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn force_queueing_bypasses_the_buffer_while_unready() {
        let exec = Executor::new();
        let result = exec.push(true, || 42);
        assert_eq!(result, 42);
    }
}
