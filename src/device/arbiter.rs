//! Exclusive-access arbitration for the one physical receiver
//!
//! A single async mutex guards the device slot. A sweep holds the permit
//! for a full pass; a TDOA capture takes it, closes any open session so the
//! external tool gets the USB device to itself, and releases when done.
//! Sweeps poll the arbiter's cancellation token at every hop boundary,
//! which bounds how long a TDOA request waits for the permit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use super::session::SampleSource;

/// Cooperative cancellation flag shared by every acquisition activity.
/// Cancellation is advisory: a sweep notices it at the next hop boundary.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm before starting a new sweep.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the device slot and the cancellation token. Every device operation
/// happens while holding the slot guard; the session never leaves the slot
/// except to move onto a blocking worker and back.
pub struct Arbiter<S> {
    slot: Mutex<Option<S>>,
    cancel: CancelToken,
}

impl<S: SampleSource> Arbiter<S> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            cancel: CancelToken::new(),
        }
    }

    /// Acquire the single permit. Held across a full sweep pass or a full
    /// TDOA capture.
    pub async fn acquire(&self) -> MutexGuard<'_, Option<S>> {
        self.slot.lock().await
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl<S: SampleSource> Default for Arbiter<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Counts concurrently-open handles; `open` panics the test if a second
    /// handle would ever exist.
    struct CountingSession {
        counter: Arc<AtomicUsize>,
    }

    impl CountingSession {
        fn open(counter: Arc<AtomicUsize>) -> Self {
            let prev = counter.fetch_add(1, Ordering::SeqCst);
            assert_eq!(prev, 0, "second device session opened concurrently");
            Self { counter }
        }
    }

    impl SampleSource for CountingSession {
        fn tune(&mut self, _freq_hz: u64) -> Result<(), DeviceError> {
            Ok(())
        }
        fn sample_rate(&self) -> f64 {
            2.4e6
        }
        fn read_samples(&mut self, count: usize) -> Result<Vec<u8>, DeviceError> {
            Ok(vec![128u8; count * 2])
        }
        fn close(&mut self) {
            self.counter.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_cancel_then_tdoa_keeps_single_session() {
        // Randomized interleavings of a hopping sweep against a
        // cancel-then-capture TDOA request.
        for seed in 0..24u64 {
            let arbiter = Arc::new(Arbiter::<CountingSession>::new());
            let open_count = Arc::new(AtomicUsize::new(0));

            let sweep = {
                let arbiter = arbiter.clone();
                let open_count = open_count.clone();
                tokio::spawn(async move {
                    let cancel = arbiter.cancel_token();
                    while !cancel.is_cancelled() {
                        let mut slot = arbiter.acquire().await;
                        if slot.is_none() {
                            *slot = Some(CountingSession::open(open_count.clone()));
                        }
                        // a short "pass" of hops, polling cancel each hop
                        for _ in 0..4 {
                            if cancel.is_cancelled() {
                                if let Some(mut s) = slot.take() {
                                    s.close();
                                }
                                return;
                            }
                            tokio::time::sleep(Duration::from_micros(50)).await;
                        }
                        drop(slot);
                        tokio::task::yield_now().await;
                    }
                })
            };

            let tdoa = {
                let arbiter = arbiter.clone();
                let mut rng = StdRng::seed_from_u64(seed);
                let delay = rng.gen_range(0..400);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_micros(delay)).await;
                    arbiter.cancel_token().cancel();
                    let mut slot = arbiter.acquire().await;
                    if let Some(mut s) = slot.take() {
                        s.close();
                    }
                    // external tool owns the hardware here
                    tokio::time::sleep(Duration::from_micros(100)).await;
                })
            };

            sweep.await.unwrap();
            tdoa.await.unwrap();
            assert_eq!(open_count.load(Ordering::SeqCst), 0, "session leaked");
        }
    }

    #[tokio::test]
    async fn test_token_reset_rearms_sweep() {
        let arbiter = Arbiter::<CountingSession>::new();
        let token = arbiter.cancel_token();
        token.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!token.is_cancelled());
        // both handles observe the same flag
        assert!(!arbiter.cancel_token().is_cancelled());
    }
}
