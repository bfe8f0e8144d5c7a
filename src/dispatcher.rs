//! Bounded worker pool for enqueued (non-blocking-caller) calls
//! (spec.md SS4.2).
//!
//! Grounded on the teacher's pool/queue primitives (`client/pool.rs`'s
//! `Mutex`-guarded shared state) generalized from "connections" to
//! "in-flight calls": a `ready` queue holds calls waiting on a
//! concurrency cap, a `running` count (overall and per-host) tracks what
//! a worker thread is presently executing. Each promoted call runs on its
//! own OS thread, matching SS5's "parallel threads drive blocking I/O".

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Queued {
    host: String,
    job: Job,
}

struct State {
    running_count: usize,
    running_per_host: HashMap<String, usize>,
    ready: VecDeque<Queued>,
}

/// Dispatches `enqueue`d calls across a bounded number of concurrent
/// workers, with a per-host cap layered on top of the overall cap.
pub struct Dispatcher {
    max_concurrent_calls: usize,
    max_concurrent_per_host: usize,
    state: Mutex<State>,
    closed: AtomicBool,
}

impl Dispatcher {
    pub fn new(max_concurrent_calls: usize, max_concurrent_per_host: usize) -> Dispatcher {
        Dispatcher {
            max_concurrent_calls,
            max_concurrent_per_host,
            state: Mutex::new(State {
                running_count: 0,
                running_per_host: HashMap::new(),
                ready: VecDeque::new(),
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue `job`, keyed by `host` for the per-host cap. Runs
    /// immediately on a new thread if both caps allow it; otherwise parks
    /// in the ready queue until `on_complete` promotes it. Returns `false`
    /// (and drops `job`) if the dispatcher has been shut down.
    pub fn enqueue(self: &Arc<Self>, host: String, job: Job) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut state = self.state.lock().unwrap();
        if Self::can_run(&state, &host, self.max_concurrent_calls, self.max_concurrent_per_host) {
            Self::promote(&mut state, &host);
            drop(state);
            self.spawn(host, job);
        } else {
            state.ready.push_back(Queued { host, job });
        }
        true
    }

    fn can_run(state: &State, host: &str, max_calls: usize, max_per_host: usize) -> bool {
        state.running_count < max_calls && *state.running_per_host.get(host).unwrap_or(&0) < max_per_host
    }

    fn promote(state: &mut State, host: &str) {
        state.running_count += 1;
        *state.running_per_host.entry(host.to_owned()).or_insert(0) += 1;
    }

    fn spawn(self: &Arc<Self>, host: String, job: Job) {
        let this = self.clone();
        thread::spawn(move || {
            job();
            this.on_complete(&host);
        });
    }

    fn on_complete(self: &Arc<Self>, host: &str) {
        let mut state = self.state.lock().unwrap();
        state.running_count -= 1;
        if let Some(count) = state.running_per_host.get_mut(host) {
            *count -= 1;
            if *count == 0 {
                state.running_per_host.remove(host);
            }
        }

        let mut promoted = None;
        for (i, queued) in state.ready.iter().enumerate() {
            if Self::can_run(&state, &queued.host, self.max_concurrent_calls, self.max_concurrent_per_host) {
                promoted = Some(i);
                break;
            }
        }
        if let Some(i) = promoted {
            let queued = state.ready.remove(i).expect("index came from this queue");
            Self::promote(&mut state, &queued.host);
            drop(state);
            self.spawn(queued.host, queued.job);
        }
    }

    pub fn running_calls_count(&self) -> usize {
        self.state.lock().unwrap().running_count
    }

    pub fn queued_calls_count(&self) -> usize {
        self.state.lock().unwrap().ready.len()
    }

    /// Rejects subsequent `enqueue` calls. Already-running and
    /// already-queued calls are unaffected.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Blocks the caller until no calls are running/queued, or `timeout`
    /// elapses — whichever comes first. Returns `true` if drained.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let state = self.state.lock().unwrap();
                if state.running_count == 0 && state.ready.is_empty() {
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn enforces_per_host_cap() {
        let dispatcher = Arc::new(Dispatcher::new(64, 1));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new((Mutex::new(false), std::sync::Condvar::new()));

        for _ in 0..3 {
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            let gate = gate.clone();
            dispatcher.enqueue(
                "example.com".to_owned(),
                Box::new(move || {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    let (lock, cvar) = &*gate;
                    let mut started = lock.lock().unwrap();
                    *started = true;
                    cvar.notify_all();
                    drop(started);
                    thread::sleep(Duration::from_millis(20));
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                }),
            );
        }

        assert!(dispatcher.await_termination(Duration::from_secs(5)));
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
