// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A single-threaded task queue.
//!
//! Every recording operation is wrapped into a task and executed, in order,
//! on one worker thread. Until [`Dispatcher::flush_init`] is called tasks are
//! kept in a bounded pre-init buffer; once flushed they run in the order they
//! were launched, before anything launched afterwards.
//!
//! ## Example
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::new(100);
//! dispatcher.launch(|| println!("an early task")).unwrap();
//! dispatcher.flush_init().unwrap();
//! dispatcher.block_on_queue().unwrap();
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use thiserror::Error;

/// The default maximum number of tasks buffered before initialization.
pub const GLOBAL_DISPATCHER_LIMIT: usize = 1000;

/// A work item for the dispatcher.
pub type Task = Box<dyn FnOnce() + Send>;

/// Things that can go wrong while dispatching tasks.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The worker panicked and could not be joined.
    #[error("The worker panicked")]
    WorkerPanic,

    /// The pre-init buffer is full, the task was dropped.
    #[error("Maximum queue size reached")]
    QueueFull,

    /// Pre-init tasks were already flushed.
    #[error("The pre-init queue was already flushed")]
    AlreadyFlushed,

    /// The worker is gone, nothing can be sent to it.
    #[error("Failed to send command to worker thread")]
    SendError,

    /// The worker is gone, no answer will arrive.
    #[error("Failed to receive from channel")]
    RecvError(#[from] crossbeam_channel::RecvError),
}

impl<T> From<crossbeam_channel::SendError<T>> for DispatchError {
    fn from(_: crossbeam_channel::SendError<T>) -> Self {
        DispatchError::SendError
    }
}

/// A command for the worker thread.
enum Command {
    /// A task is a user-defined function to run.
    Task(Task),

    /// End of the pre-init buffer, switch over to the main queue.
    /// The sender is signalled once every buffered task ran.
    Swap(Sender<()>),

    /// Finish the remaining work and stop the worker.
    Shutdown,
}

/// Where newly launched tasks go.
#[derive(Debug)]
enum QueueState {
    /// Buffering, holding the number of buffered tasks.
    PreInit(usize),
    /// Flushed, tasks go straight to the worker.
    Running,
    /// Shut down, tasks are dropped.
    Stopped,
}

/// An ordered task queue with a single worker thread.
#[derive(Debug)]
pub struct Dispatcher {
    /// Guards the switch from buffering to running.
    ///
    /// Launching holds the lock while sending, so no task can slip into the
    /// pre-init channel after the swap marker.
    state: Mutex<QueueState>,
    max_queue_size: usize,
    overflow_count: AtomicUsize,
    preinit_sender: Sender<Command>,
    sender: Sender<Command>,
    /// Unblocks the worker once initialization is done.
    /// Dropping it unflushed stops the worker without running the buffer.
    block_sender: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs a single task, containing any panic it raises.
fn run_task(task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        log::error!("A dispatched task panicked. The task was dropped.");
    }
}

impl Dispatcher {
    /// Creates a new dispatcher buffering at most `max_queue_size` tasks
    /// before [`flush_init`](Dispatcher::flush_init).
    pub fn new(max_queue_size: usize) -> Self {
        let (block_sender, block_receiver) = bounded::<()>(1);
        let (preinit_sender, preinit_receiver) = unbounded();
        let (sender, receiver) = unbounded();

        let worker = thread::Builder::new()
            .name("glean.dispatcher".into())
            .spawn(move || Self::work(block_receiver, preinit_receiver, receiver));

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Failed to spawn the dispatcher thread: {}", e);
                None
            }
        };

        Dispatcher {
            state: Mutex::new(QueueState::PreInit(0)),
            max_queue_size,
            overflow_count: AtomicUsize::new(0),
            preinit_sender,
            sender,
            block_sender: Mutex::new(Some(block_sender)),
            worker: Mutex::new(worker),
        }
    }

    fn work(
        block_receiver: Receiver<()>,
        preinit_receiver: Receiver<Command>,
        receiver: Receiver<Command>,
    ) {
        // Nothing runs before initialization is done.
        if block_receiver.recv().is_err() {
            log::trace!("Dispatcher stopped before initialization");
            return;
        }

        loop {
            match preinit_receiver.recv() {
                Ok(Command::Task(task)) => run_task(task),
                Ok(Command::Swap(done)) => {
                    let _ = done.send(());
                    break;
                }
                Ok(Command::Shutdown) | Err(_) => return,
            }
        }

        for command in receiver.iter() {
            match command {
                Command::Task(task) => run_task(task),
                Command::Swap(done) => {
                    let _ = done.send(());
                }
                Command::Shutdown => break,
            }
        }
        log::trace!("Dispatcher worker done");
    }

    /// Launches a new task.
    ///
    /// Before [`flush_init`](Dispatcher::flush_init) the task is buffered;
    /// once the buffer holds `max_queue_size` tasks further tasks are dropped,
    /// counted and rejected with [`DispatchError::QueueFull`].
    pub fn launch(&self, task: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
        let mut state = lock(&self.state);
        match &mut *state {
            QueueState::PreInit(count) => {
                if *count >= self.max_queue_size {
                    self.overflow_count.fetch_add(1, Ordering::SeqCst);
                    return Err(DispatchError::QueueFull);
                }
                *count += 1;
                self.preinit_sender.send(Command::Task(Box::new(task)))?;
            }
            QueueState::Running => self.sender.send(Command::Task(Box::new(task)))?,
            QueueState::Stopped => {
                log::info!("Dispatcher was shut down. Dropping task.");
                return Err(DispatchError::SendError);
            }
        }
        Ok(())
    }

    /// Runs every buffered task and switches to direct execution.
    ///
    /// Blocks until the buffered tasks ran.
    ///
    /// # Returns
    ///
    /// The number of tasks dropped because the pre-init buffer was full.
    pub fn flush_init(&self) -> Result<usize, DispatchError> {
        let (done_sender, done_receiver) = bounded(0);
        {
            let mut state = lock(&self.state);
            if !matches!(*state, QueueState::PreInit(_)) {
                return Err(DispatchError::AlreadyFlushed);
            }
            self.preinit_sender.send(Command::Swap(done_sender))?;
            *state = QueueState::Running;
        }

        if let Some(block_sender) = lock(&self.block_sender).take() {
            block_sender.send(())?;
        }
        done_receiver.recv()?;

        Ok(self.overflow_count.swap(0, Ordering::SeqCst))
    }

    /// Waits until every task launched before this call has finished.
    ///
    /// Returns immediately while still buffering: nothing would run.
    /// Must not be called from within a task.
    pub fn block_on_queue(&self) -> Result<(), DispatchError> {
        if matches!(*lock(&self.state), QueueState::PreInit(_)) {
            log::trace!("Not blocking on a dispatcher that was never flushed");
            return Ok(());
        }

        let (done_sender, done_receiver) = bounded(0);
        self.launch(move || {
            let _ = done_sender.send(());
        })?;
        done_receiver.recv()?;
        Ok(())
    }

    /// Stops the worker after running everything already queued.
    ///
    /// Tasks still in the pre-init buffer are dropped unrun.
    /// Calling this more than once is fine.
    pub fn shutdown(&self) -> Result<(), DispatchError> {
        let previous = std::mem::replace(&mut *lock(&self.state), QueueState::Stopped);
        match previous {
            QueueState::PreInit(count) => {
                if count > 0 {
                    log::info!("Dropping {} tasks queued before initialization", count);
                }
                drop(lock(&self.block_sender).take());
            }
            QueueState::Running => self.sender.send(Command::Shutdown)?,
            QueueState::Stopped => return Ok(()),
        }

        if let Some(worker) = lock(&self.worker).take() {
            worker.join().map_err(|_| DispatchError::WorkerPanic)?;
        }
        Ok(())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Dispatcher did not shut down cleanly: {}", e);
        }
    }
}
