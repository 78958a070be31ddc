//! Lazily initialized, shared detector handle.
//!
//! Model loading is expensive, so the detector is built on first use and
//! reused afterwards. Concurrent first callers block on the same mutex and
//! all receive the single instance built by whichever got there first.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::detector::DetectorError;

type Init<D> = Box<dyn Fn() -> Result<D, DetectorError> + Send + Sync>;

pub struct SharedDetector<D> {
    slot: Mutex<Option<Arc<D>>>,
    init: Init<D>,
}

impl<D> SharedDetector<D> {
    /// Wrap a factory. Nothing is loaded until [`get`](Self::get).
    pub fn new<F>(init: F) -> Self
    where
        F: Fn() -> Result<D, DetectorError> + Send + Sync + 'static,
    {
        Self {
            slot: Mutex::new(None),
            init: Box::new(init),
        }
    }

    /// Return the shared detector, building it on the first call.
    ///
    /// A failed build leaves the handle uninitialized; the next call retries.
    pub fn get(&self) -> Result<Arc<D>, DetectorError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(detector) = slot.as_ref() {
            return Ok(Arc::clone(detector));
        }

        let started = Instant::now();
        let detector = Arc::new((self.init)()?);
        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "detector initialized");

        *slot = Some(Arc::clone(&detector));
        Ok(detector)
    }

    pub fn is_ready(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_initializes_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let shared = SharedDetector::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(42u32)
        });

        assert!(!shared.is_ready());
        let a = shared.get().unwrap();
        let b = shared.get().unwrap();
        assert!(shared.is_ready());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_first_use_single_winner() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let shared = SharedDetector::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(String::from("detector"))
        });

        let handles: Vec<Arc<String>> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..8).map(|_| s.spawn(|| shared.get().unwrap())).collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_failed_init_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let shared = SharedDetector::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(DetectorError::ModelNotFound("det_10g.onnx".into()))
            } else {
                Ok(7u8)
            }
        });

        assert!(matches!(shared.get(), Err(DetectorError::ModelNotFound(_))));
        assert!(!shared.is_ready());
        assert_eq!(*shared.get().unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
