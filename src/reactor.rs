//! The crate's reference event loop.
//!
//! `spec.md` §1 explicitly excludes "the sample driver program that
//! schedules 1000 store operations and pumps the event loop" — that is the
//! *business logic* of what to schedule and when to stop. It does not
//! exclude the generic pump primitive itself: mio ships `Poll`/`Registry`/
//! `Events` as reusable infrastructure while leaving the `loop { poll.poll
//! (...) }` business logic to the caller, and `Reactor` plays the same role
//! here (see `SPEC_FULL.md` §10.1). It owns the timer wheel described in
//! `spec.md` §4.4 and, via `io::sys`, the OS readiness selector /
//! completion port.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Opaque token identifying a timer registration or a readiness watch
/// (`spec.md` glossary: "Watch token").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub usize);

struct TimerSlot {
    generation: u64,
    callback: Box<dyn FnMut()>,
}

struct ReactorInner {
    next_token: usize,
    timers: HashMap<Token, TimerSlot>,
    // Lazily-deleted min-heap ordered by deadline; an entry is only honored
    // if `timers` still holds a slot with a matching generation.
    heap: BinaryHeap<Reverse<(Instant, u64, Token)>>,
    deferred: VecDeque<Token>,
}

/// The single-threaded, cooperative pump (`spec.md` §5: "Scheduling
/// model"). Not `Send`/`Sync`; correctness depends on one thread pumping it.
#[derive(Clone)]
pub struct Reactor {
    inner: Rc<RefCell<ReactorInner>>,
}

impl Reactor {
    pub fn new() -> Reactor {
        Reactor {
            inner: Rc::new(RefCell::new(ReactorInner {
                next_token: 0,
                timers: HashMap::new(),
                heap: BinaryHeap::new(),
                deferred: VecDeque::new(),
            })),
        }
    }

    /// Allocates a fresh token, e.g. for a readiness watch or a timer
    /// (`spec.md` §4.6 step 2: "pre-create the event/watch token").
    pub fn create_token(&self) -> Token {
        let mut inner = self.inner.borrow_mut();
        let token = Token(inner.next_token);
        inner.next_token += 1;
        token
    }

    /// Registers a timer slot bound to `token` with no deadline armed yet.
    pub fn register_timer(&self, token: Token, callback: Box<dyn FnMut()>) {
        self.inner.borrow_mut().timers.insert(
            token,
            TimerSlot {
                generation: 0,
                callback,
            },
        );
    }

    /// Arms `token` to fire after `duration`. Replaces any prior arming
    /// (`spec.md` §4.4: "Replaces any prior arming").
    pub fn arm(&self, token: Token, duration: Duration) {
        self.schedule_at(token, Instant::now() + duration);
    }

    /// Schedules `token` to fire on the next `turn()`, never synchronously —
    /// the primary mechanism for posting a terminal state transition so the
    /// user callback always runs from a known stack (`spec.md` §4.4).
    pub fn signal(&self, token: Token) {
        let mut inner = self.inner.borrow_mut();
        inner.deferred.push_back(token);
    }

    fn schedule_at(&self, token: Token, deadline: Instant) {
        let mut inner = self.inner.borrow_mut();
        let generation = {
            let slot = inner
                .timers
                .get_mut(&token)
                .expect("arm() called on an unregistered timer token");
            slot.generation += 1;
            slot.generation
        };
        inner.heap.push(Reverse((deadline, generation, token)));
    }

    /// Cancels any pending fire for `token` and forgets its callback
    /// (`spec.md` §4.4: "cancel pending fire; the attempt's destructor must
    /// call this").
    pub fn release(&self, token: Token) {
        self.inner.borrow_mut().timers.remove(&token);
    }

    /// Duration until the earliest still-live timer, if any — used by a
    /// caller to bound its own `select`/`epoll_wait` timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        let inner = self.inner.borrow();
        inner.heap.iter().find_map(|Reverse((deadline, generation, token))| {
            inner
                .timers
                .get(token)
                .filter(|slot| slot.generation == *generation)
                .map(|_| *deadline)
        })
    }

    /// Runs one iteration: drains deferred (`signal()`-posted) tasks, then
    /// fires every timer whose deadline has passed. Readiness/completion
    /// event dispatch happens in the caller's own selector loop, which
    /// should call this once per pass so timers and deferred dispatch keep
    /// making progress even when no I/O event is pending.
    pub fn turn(&self) {
        self.drain_deferred();
        self.fire_expired_timers();
    }

    fn drain_deferred(&self) {
        loop {
            let token = {
                let mut inner = self.inner.borrow_mut();
                match inner.deferred.pop_front() {
                    Some(t) => t,
                    None => break,
                }
            };
            self.fire_timer(token);
        }
    }

    fn fire_expired_timers(&self) {
        let now = Instant::now();
        loop {
            let due = {
                let mut inner = self.inner.borrow_mut();
                match inner.heap.peek() {
                    Some(Reverse((deadline, generation, token))) if *deadline <= now => {
                        let live = inner
                            .timers
                            .get(token)
                            .map(|slot| slot.generation == *generation)
                            .unwrap_or(false);
                        inner.heap.pop();
                        if live {
                            Some(*token)
                        } else {
                            continue;
                        }
                    }
                    _ => None,
                }
            };
            match due {
                Some(token) => self.fire_timer(token),
                None => break,
            }
        }
    }

    fn fire_timer(&self, token: Token) {
        // The callback may re-enter the reactor (e.g. release a different
        // timer), so the borrow must not be held while it runs.
        let callback = {
            let mut inner = self.inner.borrow_mut();
            inner.timers.get_mut(&token).map(|slot| {
                let cb = std::mem::replace(&mut slot.callback, Box::new(|| {}));
                cb
            })
        };
        if let Some(mut cb) = callback {
            cb();
        }
    }
}

impl Default for Reactor {
    fn default() -> Reactor {
        Reactor::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn signal_defers_to_next_turn() {
        let reactor = Reactor::new();
        let token = reactor.create_token();
        let fired = Rc::new(Cell::new(false));
        let fired2 = fired.clone();
        reactor.register_timer(
            token,
            Box::new(move || {
                fired2.set(true);
            }),
        );
        reactor.signal(token);
        assert!(!fired.get(), "must not fire synchronously");
        reactor.turn();
        assert!(fired.get());
    }

    #[test]
    fn release_prevents_later_fire() {
        let reactor = Reactor::new();
        let token = reactor.create_token();
        let fired = Rc::new(Cell::new(false));
        let fired2 = fired.clone();
        reactor.register_timer(token, Box::new(move || fired2.set(true)));
        reactor.arm(token, Duration::from_millis(0));
        reactor.release(token);
        std::thread::sleep(Duration::from_millis(5));
        reactor.turn();
        assert!(!fired.get());
    }

    #[test]
    fn rearming_replaces_prior_deadline() {
        let reactor = Reactor::new();
        let token = reactor.create_token();
        let count = Rc::new(Cell::new(0));
        let count2 = count.clone();
        reactor.register_timer(token, Box::new(move || count2.set(count2.get() + 1)));
        reactor.arm(token, Duration::from_secs(10));
        reactor.arm(token, Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        reactor.turn();
        assert_eq!(count.get(), 1);
    }
}
