// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One-shot QoS timers on a shared background thread.
//!
//! Hard-real-time supervision needs a timer that fires independently of the
//! supervised consumer. A single [`TimerService`] thread owns a deadline
//! min-heap and runs all expiry callbacks; handles arm, re-arm and cancel
//! through a command channel without touching the heap directly.
//!
//! # Architecture
//! - crossbeam channel for commands, `recv_deadline` doubles as the sleep
//! - lazy heap invalidation: re-arming pushes a new entry, stale entries are
//!   skipped when popped
//! - callbacks run on the timer thread and must not block

use crossbeam::channel::{self, Receiver, Sender};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type TimerCallback = Box<dyn FnMut() + Send>;

enum Command {
    Create { id: u64, cb: TimerCallback },
    Arm { id: u64, at: Instant },
    Cancel { id: u64 },
    Remove { id: u64 },
    Shutdown,
}

struct Entry {
    /// Armed deadline, `None` while disarmed or after firing.
    deadline: Option<Instant>,
    cb: TimerCallback,
}

/// Shared timer thread. One per kernel.
pub struct TimerService {
    tx: Sender<Command>,
    next_id: AtomicU64,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    /// Spawn the timer thread.
    pub fn new() -> Arc<Self> {
        let (tx, rx) = channel::unbounded();
        let worker = thread::Builder::new()
            .name("rtlink-timer".into())
            .spawn(move || run(&rx))
            .ok();
        if worker.is_none() {
            log::error!("[timer] failed to spawn timer thread, timers will not fire");
        }
        Arc::new(Self {
            tx,
            next_id: AtomicU64::new(1),
            worker: parking_lot::Mutex::new(worker),
        })
    }

    /// Register a callback and return its handle. The timer starts disarmed.
    pub fn create(&self, cb: impl FnMut() + Send + 'static) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(Command::Create {
            id,
            cb: Box::new(cb),
        });
        TimerHandle {
            id,
            tx: self.tx.clone(),
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

/// Handle to one registered timer. Dropping the handle removes the timer.
pub struct TimerHandle {
    id: u64,
    tx: Sender<Command>,
}

impl TimerHandle {
    /// Arm (or re-arm) the timer to fire at `at`. A previously armed
    /// deadline is replaced.
    pub fn arm_at(&self, at: Instant) {
        let _ = self.tx.send(Command::Arm { id: self.id, at });
    }

    /// Arm the timer to fire after `delay`.
    pub fn arm_in(&self, delay: Duration) {
        self.arm_at(Instant::now() + delay);
    }

    /// Disarm without removing. A later `arm_at` re-uses the callback.
    pub fn cancel(&self) {
        let _ = self.tx.send(Command::Cancel { id: self.id });
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Remove { id: self.id });
    }
}

fn run(rx: &Receiver<Command>) {
    let mut timers: HashMap<u64, Entry> = HashMap::new();
    let mut heap: BinaryHeap<Reverse<(Instant, u64)>> = BinaryHeap::new();

    loop {
        // Drop heap entries whose deadline was re-armed or cancelled.
        while let Some(Reverse((at, id))) = heap.peek().copied() {
            match timers.get(&id) {
                Some(entry) if entry.deadline == Some(at) => break,
                _ => {
                    heap.pop();
                }
            }
        }

        let command = match heap.peek().copied() {
            Some(Reverse((at, _))) => match rx.recv_deadline(at) {
                Ok(command) => Some(command),
                Err(channel::RecvTimeoutError::Timeout) => None,
                Err(channel::RecvTimeoutError::Disconnected) => return,
            },
            None => match rx.recv() {
                Ok(command) => Some(command),
                Err(_) => return,
            },
        };

        match command {
            Some(Command::Create { id, cb }) => {
                timers.insert(id, Entry { deadline: None, cb });
            }
            Some(Command::Arm { id, at }) => {
                if let Some(entry) = timers.get_mut(&id) {
                    entry.deadline = Some(at);
                    heap.push(Reverse((at, id)));
                }
            }
            Some(Command::Cancel { id }) => {
                if let Some(entry) = timers.get_mut(&id) {
                    entry.deadline = None;
                }
            }
            Some(Command::Remove { id }) => {
                timers.remove(&id);
            }
            Some(Command::Shutdown) => return,
            None => {
                let now = Instant::now();
                while let Some(Reverse((at, id))) = heap.peek().copied() {
                    if at > now {
                        break;
                    }
                    heap.pop();
                    if let Some(entry) = timers.get_mut(&id) {
                        if entry.deadline == Some(at) {
                            entry.deadline = None;
                            (entry.cb)();
                        }
                    }
                }
            }
        }
    }
}
