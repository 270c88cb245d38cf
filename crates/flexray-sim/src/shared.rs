//! Thread-safe simulator handle
//!
//! All operations take the inner lock, so a send and a cycle advance from
//! different threads never interleave partway.

use std::sync::{Arc, Mutex, MutexGuard};

use flexray_protocol::{BusConfig, Message};

use crate::simulator::{BusSimulator, CycleCallback, CycleReport, LogEntry, SimError, Statistics};

/// Cloneable handle to a [`BusSimulator`] behind a mutex
#[derive(Debug, Clone)]
pub struct SharedSimulator {
    inner: Arc<Mutex<BusSimulator>>,
}

impl SharedSimulator {
    pub fn new(simulator: BusSimulator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(simulator)),
        }
    }

    /// Run a closure with exclusive access, for multi-step sequences
    pub fn with<R>(&self, f: impl FnOnce(&mut BusSimulator) -> R) -> R {
        f(&mut self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, BusSimulator> {
        // Callback panics are caught inside advance_cycle, so poisoning only
        // follows a panic in caller code run through `with`
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start(&self) -> Result<(), SimError> {
        self.lock().start()
    }

    pub fn stop(&self) -> Result<(), SimError> {
        self.lock().stop()
    }

    pub fn reset(&self) {
        self.lock().reset()
    }

    pub fn reconfigure(&self, config: BusConfig) -> Result<(), SimError> {
        self.lock().reconfigure(config)
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_running()
    }

    pub fn current_cycle(&self) -> u8 {
        self.lock().current_cycle()
    }

    /// Send a message; returns a copy of the log entry
    pub fn send_message(&self, message: Message) -> Result<LogEntry, SimError> {
        self.lock().send_message(message).cloned()
    }

    pub fn advance_cycle(&self) -> Result<CycleReport, SimError> {
        self.lock().advance_cycle()
    }

    pub fn register(&self, callback: impl CycleCallback + 'static) {
        self.lock().register(callback)
    }

    pub fn get_messages(&self) -> Vec<Message> {
        self.lock().get_messages()
    }

    pub fn get_log(&self) -> Vec<LogEntry> {
        self.lock().get_log()
    }

    pub fn get_statistics(&self) -> Statistics {
        self.lock().get_statistics()
    }
}

impl From<BusSimulator> for SharedSimulator {
    fn from(simulator: BusSimulator) -> Self {
        Self::new(simulator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexray_protocol::Channel;
    use std::thread;

    #[test]
    fn test_concurrent_senders() {
        let shared = SharedSimulator::new(BusSimulator::new(BusConfig::default()));
        shared.start().unwrap();

        let handles: Vec<_> = (1..=4u16)
            .map(|slot| {
                let sim = shared.clone();
                thread::spawn(move || {
                    for cycle in 0..10u8 {
                        sim.send_message(Message::new(slot, cycle, Channel::A, vec![cycle]))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = shared.get_statistics();
        assert_eq!(stats.sent, 40);
        assert_eq!(stats.slot_distribution.len(), 4);
        assert!(stats.slot_distribution.values().all(|&count| count == 10));

        // Timestamps follow log order even with racing senders
        let stamps: Vec<u64> = shared
            .get_messages()
            .iter()
            .filter_map(|m| m.timestamp_us)
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_with_gives_exclusive_access() {
        let shared = SharedSimulator::from(BusSimulator::new(BusConfig::default()));
        let cycle = shared.with(|sim| {
            sim.start()?;
            sim.advance_cycle()?;
            sim.advance_cycle().map(|report| report.cycle)
        });
        assert_eq!(cycle, Ok(2));
        assert_eq!(shared.current_cycle(), 2);
    }

    #[test]
    fn test_callback_panic_on_worker_thread() {
        let shared = SharedSimulator::new(BusSimulator::new(BusConfig::default()));
        shared.start().unwrap();
        shared.with(|sim| {
            sim.register_callback("steady", |cycle, tx| {
                tx.send(Message::new(1, cycle, Channel::A, vec![cycle]));
                Ok(())
            });
            sim.register_callback("boom", |cycle, _tx| {
                if cycle == 1 {
                    panic!("boom");
                }
                Ok(())
            });
        });

        let worker = shared.clone();
        let result = thread::spawn(move || worker.advance_cycle())
            .join()
            .unwrap();
        assert!(matches!(result, Err(SimError::CallbackFailed(_))));
        assert!(!shared.inner.is_poisoned());

        shared.advance_cycle().unwrap();
        assert_eq!(shared.with(|sim| sim.callback_count()), 2);
        assert_eq!(shared.get_statistics().sent, 2);
    }
}
