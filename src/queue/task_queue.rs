//-
// Copyright (c) 2026, the Popsync authors
//
// This file is part of Popsync.
//
// Popsync is free software: you can redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Popsync is distributed in the hope  that it will be useful,  but WITHOUT
// ANY WARRANTY;  without even  the implied  warranty of  MERCHANTABILITY or
// FITNESS FOR  A PARTICULAR PURPOSE.  See the  GNU General  Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Popsync. If not, see <http://www.gnu.org/licenses/>.

//! The per-account work queue: one worker thread, strictly one task at a
//! time.
//!
//! All network and store work for an account funnels through its queue,
//! which is what makes the rest of the crate's single-writer assumptions
//! hold. Cancellation is two-tier: a queued task is only marked, and its
//! cancellation callback is delivered later by the worker in queue order;
//! a running task has the shared account token cancelled and is expected
//! to notice cooperatively. Either way the callback fires on the worker
//! thread under the owner's context lock, never inline in the canceller.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use log::{debug, error};

use crate::support::cancellation::CancellationToken;
use crate::support::error::Error;

bitflags::bitflags! {
    /// Scheduling class and cancellation tags for one task.
    pub struct TaskFlags: u32 {
        /// Jumps ahead of queued normal tasks (but behind other queued
        /// priority tasks, and never ahead of the running task).
        const PRIORITY = 1 << 0;
        /// A running task with this flag may be cancelled cooperatively.
        const CANCELLABLE = 1 << 1;
        /// Tag: folder sync work.
        const SYNC = 1 << 2;
        /// Tag: single-message retrieval work.
        const FETCH = 1 << 3;
    }
}

/// What a finish callback learns about its task.
pub enum TaskOutcome<T> {
    Done(T),
    /// The task was cancelled, either before it started (the body never
    /// ran) or while running (the body returned after the token fired).
    Cancelled,
}

enum Invocation<'a> {
    Run(&'a CancellationToken),
    Cancelled,
}

/// Erased task: phase one runs the body (or observes queued
/// cancellation) off-lock and returns phase two, the callback delivery,
/// which the worker runs under the context lock.
type Run = Box<
    dyn FnOnce(Invocation<'_>) -> Box<dyn FnOnce() + Send> + Send,
>;

struct QueuedTask {
    name: &'static str,
    flags: TaskFlags,
    cancelled: bool,
    run: Run,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<QueuedTask>,
    running: Option<TaskFlags>,
    stopped: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Condvar,
    /// Held while delivering callbacks, so the owner can quiesce
    /// deliveries by holding it.
    context: Mutex<()>,
    /// The account-wide token handed to every running task.
    token: CancellationToken,
}

pub struct TaskQueue {
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl TaskQueue {
    pub fn new(name: String) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            wake: Condvar::new(),
            context: Mutex::new(()),
            token: CancellationToken::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(&worker_shared))
            // Thread spawn failure at construction is unrecoverable for
            // the account anyway
            .unwrap_or_else(|e| panic!("failed to spawn queue worker: {}", e));

        TaskQueue {
            shared,
            worker: Some(worker),
        }
    }

    /// The token running tasks are given; cancel it to interrupt the
    /// task currently on the worker.
    pub fn token(&self) -> &CancellationToken {
        &self.shared.token
    }

    /// Hold off callback delivery while the guard lives.
    pub fn context_lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.shared.context.lock().unwrap()
    }

    /// Enqueue `body`; `finish` is later called exactly once on the
    /// worker thread with the outcome.
    pub fn launch<T, B, F>(
        &self,
        name: &'static str,
        flags: TaskFlags,
        body: B,
        finish: F,
    ) -> Result<(), Error>
    where
        T: Send + 'static,
        B: FnOnce(&CancellationToken) -> T + Send + 'static,
        F: FnOnce(TaskOutcome<T>) + Send + 'static,
    {
        let run: Run = Box::new(move |invocation| match invocation {
            Invocation::Cancelled => {
                Box::new(move || finish(TaskOutcome::Cancelled))
            }
            Invocation::Run(token) => {
                let out = body(token);
                // A body that returned because the token fired counts as
                // cancelled even though it produced a value
                if token.check() {
                    Box::new(move || finish(TaskOutcome::Cancelled))
                } else {
                    Box::new(move || finish(TaskOutcome::Done(out)))
                }
            }
        });

        let task = QueuedTask {
            name,
            flags,
            cancelled: false,
            run,
        };

        let mut state = self.shared.state.lock().unwrap();
        if state.stopped {
            return Err(Error::QueueShutdown);
        }

        if flags.contains(TaskFlags::PRIORITY) {
            let pos = state
                .queue
                .iter()
                .rposition(|t| t.flags.contains(TaskFlags::PRIORITY))
                .map_or(0, |p| p + 1);
            state.queue.insert(pos, task);
        } else {
            state.queue.push_back(task);
        }

        self.shared.wake.notify_one();
        Ok(())
    }

    /// Cancel every task whose flags intersect `tags`.
    ///
    /// Queued matches are marked; their finish callbacks arrive later
    /// from the worker, in queue order. A running cancellable match has
    /// the shared token cancelled and keeps running until it notices.
    pub fn cancel_matching(&self, tags: TaskFlags) {
        let state = self.shared.state.lock().unwrap();
        self.cancel_matching_locked(state, tags);
    }

    fn cancel_matching_locked(
        &self,
        mut state: std::sync::MutexGuard<'_, QueueState>,
        tags: TaskFlags,
    ) {
        for task in state.queue.iter_mut() {
            if task.flags.intersects(tags) && !task.cancelled {
                debug!("Cancelling queued task {}", task.name);
                task.cancelled = true;
            }
        }

        if let Some(running) = state.running {
            if running.intersects(tags)
                && running.contains(TaskFlags::CANCELLABLE)
            {
                self.shared.token.cancel();
            }
        }
    }

    /// Stop intake, cancel everything, and wait for the worker to
    /// finish. Queued tasks get their cancellation callbacks before the
    /// worker exits.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.stopped {
                return;
            }
            state.stopped = true;

            for task in state.queue.iter_mut() {
                task.cancelled = true;
            }
            if state.running.is_some() {
                self.shared.token.cancel();
            }
            self.shared.wake.notify_one();
        }

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Queue worker panicked during shutdown");
            }
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if let Some(task) = state.queue.pop_front() {
                    if !task.cancelled {
                        state.running = Some(task.flags);
                    }
                    break task;
                }
                if state.stopped {
                    return;
                }
                state = shared.wake.wait(state).unwrap();
            }
        };

        let delivery = if task.cancelled {
            (task.run)(Invocation::Cancelled)
        } else {
            debug!("Running task {}", task.name);
            let delivery = (task.run)(Invocation::Run(&shared.token));

            let mut state = shared.state.lock().unwrap();
            state.running = None;
            // A cancel aimed at the finished task must not leak into the
            // next one
            if shared.token.check() {
                shared.token.uncancel();
            }
            delivery
        };

        let _context = shared.context.lock().unwrap();
        delivery();
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crossbeam::channel;

    use super::*;

    /// Launches a task whose completion order is observable on `done`.
    fn traced(
        queue: &TaskQueue,
        label: &'static str,
        flags: TaskFlags,
        done: channel::Sender<(&'static str, bool)>,
    ) {
        queue
            .launch(
                label,
                flags,
                |_| (),
                move |outcome| {
                    let cancelled =
                        matches!(outcome, TaskOutcome::Cancelled);
                    done.send((label, cancelled)).unwrap();
                },
            )
            .unwrap();
    }

    /// A task that holds the worker until `release` is signalled. Does
    /// not return until the task is actually running, so everything
    /// launched afterwards is queued behind it.
    fn gate(
        queue: &TaskQueue,
        done: channel::Sender<(&'static str, bool)>,
    ) -> channel::Sender<()> {
        let (started_tx, started_rx) = channel::bounded::<()>(1);
        let (release_tx, release_rx) = channel::bounded::<()>(1);
        queue
            .launch(
                "gate",
                TaskFlags::empty(),
                move |_| {
                    started_tx.send(()).unwrap();
                    release_rx
                        .recv_timeout(Duration::from_secs(10))
                        .unwrap();
                },
                move |_| done.send(("gate", false)).unwrap(),
            )
            .unwrap();

        started_rx.recv().unwrap();
        release_tx
    }

    #[test]
    fn tasks_run_in_fifo_order() {
        let queue = TaskQueue::new("test-queue".to_owned());
        let (tx, rx) = channel::unbounded();

        for label in &["one", "two", "three"] {
            traced(&queue, label, TaskFlags::empty(), tx.clone());
        }

        assert_eq!(("one", false), rx.recv().unwrap());
        assert_eq!(("two", false), rx.recv().unwrap());
        assert_eq!(("three", false), rx.recv().unwrap());
    }

    #[test]
    fn priority_jumps_queued_but_not_running() {
        let queue = TaskQueue::new("test-queue".to_owned());
        let (tx, rx) = channel::unbounded();

        let release = gate(&queue, tx.clone());
        traced(&queue, "normal-a", TaskFlags::empty(), tx.clone());
        traced(&queue, "prio-b", TaskFlags::PRIORITY, tx.clone());
        traced(&queue, "prio-c", TaskFlags::PRIORITY, tx.clone());

        release.send(()).unwrap();

        // The running gate finishes first; priority tasks overtake only
        // the queued normal one, and keep FIFO among themselves
        assert_eq!(("gate", false), rx.recv().unwrap());
        assert_eq!(("prio-b", false), rx.recv().unwrap());
        assert_eq!(("prio-c", false), rx.recv().unwrap());
        assert_eq!(("normal-a", false), rx.recv().unwrap());
    }

    #[test]
    fn queued_tasks_cancel_without_running() {
        let queue = TaskQueue::new("test-queue".to_owned());
        let (tx, rx) = channel::unbounded();
        let (ran_tx, ran_rx) = channel::unbounded();

        let release = gate(&queue, tx.clone());
        queue
            .launch(
                "sync",
                TaskFlags::SYNC | TaskFlags::CANCELLABLE,
                move |_| ran_tx.send(()).unwrap(),
                {
                    let tx = tx.clone();
                    move |outcome| {
                        tx.send((
                            "sync",
                            matches!(outcome, TaskOutcome::Cancelled),
                        ))
                        .unwrap()
                    }
                },
            )
            .unwrap();
        traced(&queue, "fetch", TaskFlags::FETCH, tx.clone());

        queue.cancel_matching(TaskFlags::SYNC);
        release.send(()).unwrap();

        assert_eq!(("gate", false), rx.recv().unwrap());
        // The sync task's body never ran, but its callback was still
        // delivered, in queue order
        assert_eq!(("sync", true), rx.recv().unwrap());
        assert_eq!(("fetch", false), rx.recv().unwrap());
        assert!(ran_rx.try_recv().is_err());
    }

    #[test]
    fn running_task_cancels_cooperatively_and_token_resets() {
        let queue = TaskQueue::new("test-queue".to_owned());
        let (tx, rx) = channel::unbounded();
        let (started_tx, started_rx) = channel::bounded::<()>(1);

        queue
            .launch(
                "spinner",
                TaskFlags::SYNC | TaskFlags::CANCELLABLE,
                move |token| {
                    started_tx.send(()).unwrap();
                    while !token.check() {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                },
                {
                    let tx = tx.clone();
                    move |outcome| {
                        tx.send((
                            "spinner",
                            matches!(outcome, TaskOutcome::Cancelled),
                        ))
                        .unwrap()
                    }
                },
            )
            .unwrap();

        started_rx.recv().unwrap();
        queue.cancel_matching(TaskFlags::SYNC);
        assert_eq!(("spinner", true), rx.recv().unwrap());

        // The shared token was un-cancelled before the next task
        let (clean_tx, clean_rx) = channel::bounded::<bool>(1);
        queue
            .launch(
                "after",
                TaskFlags::empty(),
                move |token| clean_tx.send(token.check()).unwrap(),
                |_| (),
            )
            .unwrap();
        assert_eq!(false, clean_rx.recv().unwrap());
    }

    #[test]
    fn non_cancellable_running_task_is_left_alone() {
        let queue = TaskQueue::new("test-queue".to_owned());
        let (tx, rx) = channel::unbounded();
        let (started_tx, started_rx) = channel::bounded::<()>(1);
        let (release_tx, release_rx) = channel::bounded::<()>(1);

        queue
            .launch(
                "stubborn",
                TaskFlags::SYNC,
                move |token| {
                    started_tx.send(()).unwrap();
                    release_rx
                        .recv_timeout(Duration::from_secs(10))
                        .unwrap();
                    token.check()
                },
                {
                    let tx = tx.clone();
                    move |outcome| {
                        let observed_cancel = match outcome {
                            TaskOutcome::Done(c) => c,
                            TaskOutcome::Cancelled => true,
                        };
                        tx.send(("stubborn", observed_cancel)).unwrap()
                    }
                },
            )
            .unwrap();

        started_rx.recv().unwrap();
        queue.cancel_matching(TaskFlags::SYNC);
        release_tx.send(()).unwrap();

        assert_eq!(("stubborn", false), rx.recv().unwrap());
    }

    #[test]
    fn shutdown_drains_queued_tasks_as_cancelled() {
        let mut queue = TaskQueue::new("test-queue".to_owned());
        let (tx, rx) = channel::unbounded();
        let (started_tx, started_rx) = channel::bounded::<()>(1);

        queue
            .launch(
                "spinner",
                TaskFlags::SYNC | TaskFlags::CANCELLABLE,
                move |token| {
                    started_tx.send(()).unwrap();
                    while !token.check() {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                },
                {
                    let tx = tx.clone();
                    move |outcome| {
                        tx.send((
                            "spinner",
                            matches!(outcome, TaskOutcome::Cancelled),
                        ))
                        .unwrap()
                    }
                },
            )
            .unwrap();
        started_rx.recv().unwrap();

        traced(&queue, "queued-a", TaskFlags::empty(), tx.clone());
        traced(&queue, "queued-b", TaskFlags::empty(), tx.clone());

        queue.shutdown();

        assert_eq!(("spinner", true), rx.recv().unwrap());
        assert_eq!(("queued-a", true), rx.recv().unwrap());
        assert_eq!(("queued-b", true), rx.recv().unwrap());

        // No further intake
        assert_matches!(
            Err(Error::QueueShutdown),
            queue.launch("late", TaskFlags::empty(), |_| (), |_| ())
        );
    }
}
