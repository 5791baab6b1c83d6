//! Wallet event delivery.
//!
//! Mutating operations queue events while they hold the wallet borrow and
//! dispatch after the mutation commits, so listeners observe states, never
//! intermediate ones, and always in commit order. A panicking listener is
//! caught and logged; later listeners still run.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

use kestrel_chain::amount::Amount;
use kestrel_chain::transaction;
use tracing::warn;

/// Something the wallet did that an embedder may care about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletEvent {
    /// A transaction increased our balance.
    CoinsReceived {
        /// The transaction.
        txid: transaction::Hash,
        /// Balance before it was applied.
        prev_balance: Amount,
        /// Balance after.
        new_balance: Amount,
    },
    /// A transaction decreased our balance.
    CoinsSent {
        /// The transaction.
        txid: transaction::Hash,
        /// Balance before it was applied.
        prev_balance: Amount,
        /// Balance after.
        new_balance: Amount,
    },
    /// A transaction's confidence changed.
    ConfidenceChanged {
        /// The transaction.
        txid: transaction::Hash,
    },
    /// Something else about the wallet changed (keys, settings).
    WalletChanged,
    /// A chain reorganization was applied.
    Reorganized,
}

/// A registered observer.
pub type Listener = Box<dyn Fn(&WalletEvent) + Send>;

#[derive(Default)]
pub(crate) struct EventQueue {
    listeners: Vec<Listener>,
    queued: VecDeque<WalletEvent>,
}

impl EventQueue {
    pub fn add_listener(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    /// Queue an event for the next dispatch.
    pub fn fire(&mut self, event: WalletEvent) {
        self.queued.push_back(event);
    }

    /// Deliver all queued events, in order, isolating listener panics.
    pub fn dispatch(&mut self) {
        while let Some(event) = self.queued.pop_front() {
            for listener in self.listeners.iter() {
                let result = catch_unwind(AssertUnwindSafe(|| listener(&event)));
                if result.is_err() {
                    warn!(?event, "wallet listener panicked; continuing");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn panicking_listener_does_not_stop_others() {
        kestrel_test::init();

        let mut queue = EventQueue::default();
        let delivered = Arc::new(AtomicUsize::new(0));

        queue.add_listener(Box::new(|_| panic!("listener bug")));
        let counter = delivered.clone();
        queue.add_listener(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        queue.fire(WalletEvent::WalletChanged);
        queue.fire(WalletEvent::Reorganized);
        queue.dispatch();

        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn events_deliver_in_commit_order() {
        kestrel_test::init();

        let mut queue = EventQueue::default();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = order.clone();
        queue.add_listener(Box::new(move |event| {
            sink.lock().unwrap().push(event.clone());
        }));

        queue.fire(WalletEvent::WalletChanged);
        queue.fire(WalletEvent::Reorganized);
        queue.dispatch();

        assert_eq!(
            *order.lock().unwrap(),
            vec![WalletEvent::WalletChanged, WalletEvent::Reorganized]
        );
    }
}
