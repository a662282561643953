//! Wait-for graph over observed mutexes
//!
//! Records are keyed by mutex address and live from first observation until
//! unlock. Each record knows its owner, the stack captured when the mutex
//! was first seen, and the set of mutexes its owner is currently waiting
//! on; per-thread state mirrors the same facts from the thread's side.
//! Every entry point takes the acting thread id explicitly, which keeps the
//! graph logic independent of `pthread_self` and directly testable.

use crate::domain::{MutexAddr, ThreadId};
use crate::output;
use crate::symbolize::FrameResolver;
use console::Style;
use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// One observed mutex.
#[derive(Debug, Clone)]
pub struct LockRecord {
    /// Holder of the mutex; `ThreadId(0)` until first acquisition.
    pub owner: ThreadId,
    /// Stack captured when the mutex was first observed.
    pub stack: Vec<usize>,
    /// Mutexes the owner is currently waiting to acquire.
    pub waiting_for: HashSet<usize>,
    /// Distinguishes seen-but-not-yet-held from held.
    pub acquired: bool,
}

/// Per-thread view: what it holds (in acquisition order) and waits on.
#[derive(Debug, Clone, Default)]
pub struct ThreadState {
    pub held: Vec<usize>,
    pub waiting: Vec<usize>,
}

/// The wait-for graph plus per-thread bookkeeping.
#[derive(Default)]
pub struct LockRegistry {
    locks: HashMap<usize, LockRecord>,
    threads: HashMap<ThreadId, ThreadState>,
}

lazy_static! {
    /// Process-global instance fed by the pthread shims.
    ///
    /// The registry's own lock is a futex-backed `std::sync::Mutex`; it
    /// never routes through the pthread symbols being tracked.
    pub static ref LOCK_REGISTRY: Mutex<LockRegistry> = Mutex::new(LockRegistry::default());
}

impl LockRegistry {
    /// A thread is about to call `pthread_mutex_lock`.
    ///
    /// If the mutex is already held by another thread the caller is about
    /// to block: record the wait edges and search for a cycle rooted at
    /// `(mutex, tid)`. Returns the cycle chain when one is found.
    pub fn record_acquire_attempt(
        &mut self,
        mutex: usize,
        tid: ThreadId,
        stack: Vec<usize>,
    ) -> Option<Vec<(usize, ThreadId)>> {
        let known = self.locks.contains_key(&mutex);
        let blocking =
            matches!(self.locks.get(&mutex), Some(record) if record.acquired && record.owner != tid);

        if blocking {
            let thread = self.threads.entry(tid).or_default();
            thread.waiting.push(mutex);
            let held = thread.held.clone();
            for held_lock in held {
                if let Some(held_record) = self.locks.get_mut(&held_lock) {
                    held_record.waiting_for.insert(mutex);
                }
            }
            return self.detect_deadlock(mutex, tid);
        }

        if !known {
            self.locks.insert(
                mutex,
                LockRecord {
                    owner: ThreadId(0),
                    stack,
                    waiting_for: HashSet::new(),
                    acquired: false,
                },
            );
        }
        None
    }

    /// A lock or trylock call returned 0: `tid` now holds the mutex.
    pub fn record_acquired(&mut self, mutex: usize, tid: ThreadId, stack: Vec<usize>) {
        let record = self.locks.entry(mutex).or_insert_with(|| LockRecord {
            owner: ThreadId(0),
            stack,
            waiting_for: HashSet::new(),
            acquired: false,
        });
        record.owner = tid;
        record.acquired = true;

        let thread = self.threads.entry(tid).or_default();
        thread.held.push(mutex);
        thread.waiting.retain(|&waited| waited != mutex);

        // The wait edges pointing at this mutex from the thread's other
        // held locks are satisfied now; drop them so the graph only carries
        // live waits.
        let held = thread.held.clone();
        for held_lock in held {
            if held_lock == mutex {
                continue;
            }
            if let Some(held_record) = self.locks.get_mut(&held_lock) {
                held_record.waiting_for.remove(&mutex);
            }
        }
    }

    /// `tid` released the mutex; the record is dropped and will be
    /// recreated on the next observation.
    pub fn record_release(&mut self, mutex: usize, tid: ThreadId) {
        self.locks.remove(&mutex);

        let drop_thread = match self.threads.get_mut(&tid) {
            Some(thread) => {
                thread.held.retain(|&held| held != mutex);
                thread.held.is_empty() && thread.waiting.is_empty()
            }
            None => false,
        };
        if drop_thread {
            self.threads.remove(&tid);
        }
    }

    #[must_use]
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.threads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty() && self.threads.is_empty()
    }

    /// Depth-first search for a wait cycle starting at `(mutex, tid)`.
    ///
    /// Returns the chain of `(mutex, owner)` pairs closing the cycle, with
    /// the repeated entry appended so the full loop is visible in reports.
    pub fn detect_deadlock(
        &self,
        mutex: usize,
        tid: ThreadId,
    ) -> Option<Vec<(usize, ThreadId)>> {
        let mut visited = HashSet::new();
        let mut chain = Vec::new();
        if self.dfs(mutex, tid, &mut visited, &mut chain) {
            Some(chain)
        } else {
            None
        }
    }

    fn dfs(
        &self,
        current_lock: usize,
        current_thread: ThreadId,
        visited: &mut HashSet<ThreadId>,
        chain: &mut Vec<(usize, ThreadId)>,
    ) -> bool {
        if visited.contains(&current_thread) {
            // Revisiting a thread closes the cycle; include the closing
            // edge so the printed chain loops back to its start.
            chain.push((current_lock, current_thread));
            return true;
        }

        visited.insert(current_thread);
        chain.push((current_lock, current_thread));

        if let Some(record) = self.locks.get(&current_lock) {
            for &waited_lock in &record.waiting_for {
                let Some(waited_record) = self.locks.get(&waited_lock) else {
                    continue;
                };
                if self.dfs(waited_lock, waited_record.owner, visited, chain) {
                    return true;
                }
            }
        }

        visited.remove(&current_thread);
        chain.pop();
        false
    }

    /// Render a detected cycle through the output sink.
    pub fn report_deadlock(&self, chain: &[(usize, ThreadId)], resolver: &mut FrameResolver) {
        let bold_red = Style::new().red().bold();
        output::print_line("");
        output::print_styled(&bold_red, "=== Potential Deadlock Detected! ===");
        output::print_line("Lock chain:");
        for &(mutex, _) in chain {
            if let Some(record) = self.locks.get(&mutex) {
                self.print_lock_info(mutex, record, resolver);
                output::print_line("");
            }
        }
    }

    fn print_lock_info(&self, mutex: usize, record: &LockRecord, resolver: &mut FrameResolver) {
        output::print_line(&format!(
            "Lock {} (Mutex) held by thread {}",
            MutexAddr(mutex),
            record.owner
        ));
        output::print_line("Acquired at:");
        for (index, frame) in resolver.resolve_stack(&record.stack).iter().enumerate() {
            output::print_line(&format!("  {}", frame.format(index)));
        }

        if !record.waiting_for.is_empty() {
            let mut line = String::from("Waiting for locks:");
            for &waited in &record.waiting_for {
                match self.locks.get(&waited) {
                    Some(waited_record) => line.push_str(&format!(
                        " {} (held by thread {})",
                        MutexAddr(waited),
                        waited_record.owner
                    )),
                    None => line.push_str(&format!(" {} (unknown)", MutexAddr(waited))),
                }
            }
            output::print_line(&line);
        }
    }

    /// Search the current graph for a cycle among the threads that are
    /// blocked right now. Detection at acquire time already reported the
    /// cycle once; this lets a later status pass surface it again.
    #[must_use]
    pub fn find_existing_deadlock(&self) -> Option<Vec<(usize, ThreadId)>> {
        for (tid, state) in &self.threads {
            for &waited in &state.waiting {
                if let Some(chain) = self.detect_deadlock(waited, *tid) {
                    return Some(chain);
                }
            }
        }
        None
    }

    /// Render the full status snapshot through the output sink.
    pub fn report(&self, resolver: &mut FrameResolver) {
        if let Some(chain) = self.find_existing_deadlock() {
            self.report_deadlock(&chain, resolver);
        }

        output::print_line("");
        output::print_line("=== Lock Detector Status ===");
        output::print_line(&format!("Active locks: {}", self.locks.len()));
        output::print_line(&format!("Active threads: {}", self.threads.len()));

        if !self.locks.is_empty() {
            output::print_line("");
            output::print_line("Detailed lock information:");
            for (&mutex, record) in &self.locks {
                output::print_line("");
                self.print_lock_info(mutex, record, resolver);
            }
        }

        if !self.threads.is_empty() {
            output::print_line("");
            output::print_line("Thread Information:");
            for (tid, state) in &self.threads {
                output::print_line("");
                output::print_line(&format!("Thread {tid}:"));

                let mut held_line = String::from("  Held locks:");
                for &held in &state.held {
                    held_line.push_str(&format!(" {}", MutexAddr(held)));
                }
                output::print_line(&held_line);

                let mut waiting_line = String::from("  Waiting for locks:");
                for &waited in &state.waiting {
                    match self.locks.get(&waited) {
                        Some(record) => waiting_line.push_str(&format!(
                            " {} (held by thread {})",
                            MutexAddr(waited),
                            record.owner
                        )),
                        None => waiting_line.push_str(&format!(" {}", MutexAddr(waited))),
                    }
                }
                output::print_line(&waiting_line);
            }
        }

        output::print_line("");
        output::print_line("===========================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: usize = 0xa000;
    const B: usize = 0xb000;
    const T1: ThreadId = ThreadId(1);
    const T2: ThreadId = ThreadId(2);

    fn stack() -> Vec<usize> {
        vec![0x1111]
    }

    fn acquire(registry: &mut LockRegistry, mutex: usize, tid: ThreadId) {
        assert!(registry.record_acquire_attempt(mutex, tid, stack()).is_none());
        registry.record_acquired(mutex, tid, stack());
    }

    #[test]
    fn test_balanced_lock_unlock_leaves_registry_empty() {
        let mut registry = LockRegistry::default();
        acquire(&mut registry, A, T1);
        acquire(&mut registry, B, T1);
        registry.record_release(B, T1);
        registry.record_release(A, T1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_held_lock_has_consistent_owner() {
        let mut registry = LockRegistry::default();
        acquire(&mut registry, A, T1);

        let record = registry.locks.get(&A).unwrap();
        assert!(record.acquired);
        assert_eq!(record.owner, T1);
        assert_eq!(registry.threads.get(&T1).unwrap().held, vec![A]);
    }

    #[test]
    fn test_classic_ab_ba_deadlock_detected() {
        let mut registry = LockRegistry::default();
        acquire(&mut registry, A, T1);
        acquire(&mut registry, B, T2);

        // T1 blocks on B: no cycle yet.
        assert!(registry.record_acquire_attempt(B, T1, stack()).is_none());

        // T2 blocks on A: cycle closes.
        let chain = registry
            .record_acquire_attempt(A, T2, stack())
            .expect("cycle must be detected");

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.first(), Some(&(A, T1)));
        assert_eq!(chain.last(), Some(&(A, T1)));
        assert!(chain.contains(&(B, T2)));
    }

    #[test]
    fn test_same_order_contention_is_not_deadlock() {
        let mut registry = LockRegistry::default();
        acquire(&mut registry, A, T1);

        // T2 blocks on A while holding nothing: contention, no cycle.
        assert!(registry.record_acquire_attempt(A, T2, stack()).is_none());
        assert_eq!(registry.threads.get(&T2).unwrap().waiting, vec![A]);

        // T1 proceeds to B and releases everything; T2 then takes A.
        acquire(&mut registry, B, T1);
        registry.record_release(B, T1);
        registry.record_release(A, T1);
        registry.record_acquired(A, T2, stack());

        assert_eq!(registry.threads.get(&T2).unwrap().held, vec![A]);
        assert!(registry.threads.get(&T2).unwrap().waiting.is_empty());
    }

    #[test]
    fn test_wait_edges_cleared_on_acquisition() {
        let mut registry = LockRegistry::default();
        acquire(&mut registry, A, T1);
        acquire(&mut registry, B, T2);

        // T1 waits on B, so A carries the edge A -> B.
        registry.record_acquire_attempt(B, T1, stack());
        assert!(registry.locks.get(&A).unwrap().waiting_for.contains(&B));

        // T2 releases B and T1 gets it: the satisfied edge must go away.
        registry.record_release(B, T2);
        registry.record_acquire_attempt(B, T1, stack());
        registry.record_acquired(B, T1, stack());
        assert!(!registry.locks.get(&A).unwrap().waiting_for.contains(&B));
    }

    #[test]
    fn test_reacquire_attempt_by_owner_records_nothing() {
        let mut registry = LockRegistry::default();
        acquire(&mut registry, A, T1);

        // A recursive mutex re-locked by its owner is not a wait.
        assert!(registry.record_acquire_attempt(A, T1, stack()).is_none());
        assert!(registry.threads.get(&T1).unwrap().waiting.is_empty());
    }

    #[test]
    fn test_trylock_acquisition_without_prior_attempt() {
        let mut registry = LockRegistry::default();

        // trylock has no pre-hook; acquisition must create the record.
        registry.record_acquired(A, T1, stack());
        let record = registry.locks.get(&A).unwrap();
        assert!(record.acquired);
        assert_eq!(record.owner, T1);
    }

    #[test]
    fn test_three_thread_cycle() {
        let mut registry = LockRegistry::default();
        let c = 0xc000;
        let t3 = ThreadId(3);

        acquire(&mut registry, A, T1);
        acquire(&mut registry, B, T2);
        acquire(&mut registry, c, t3);

        assert!(registry.record_acquire_attempt(B, T1, stack()).is_none());
        assert!(registry.record_acquire_attempt(c, T2, stack()).is_none());
        let chain = registry
            .record_acquire_attempt(A, t3, stack())
            .expect("three-way cycle must be detected");
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn test_existing_deadlock_found_from_snapshot() {
        let mut registry = LockRegistry::default();
        acquire(&mut registry, A, T1);
        acquire(&mut registry, B, T2);
        registry.record_acquire_attempt(B, T1, stack());
        registry.record_acquire_attempt(A, T2, stack());

        // The cycle is still in the graph when a status pass runs later.
        let chain = registry.find_existing_deadlock().expect("cycle persists");
        assert!(chain.len() >= 2);
    }

    #[test]
    fn test_no_existing_deadlock_without_cycle() {
        let mut registry = LockRegistry::default();
        acquire(&mut registry, A, T1);
        registry.record_acquire_attempt(A, T2, stack());
        assert!(registry.find_existing_deadlock().is_none());
    }

    #[test]
    fn test_release_prunes_stale_wait_target() {
        let mut registry = LockRegistry::default();
        acquire(&mut registry, A, T1);
        acquire(&mut registry, B, T2);
        registry.record_acquire_attempt(B, T1, stack());

        // B disappears before T1 ever gets it; detection over A must skip
        // the dangling edge rather than chase a dead record.
        registry.record_release(B, T2);
        assert!(registry.detect_deadlock(A, T1).is_none());
    }
}
