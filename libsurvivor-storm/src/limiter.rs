use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Admission bound for concurrently running probes.
///
/// A slot is held by an [`AdmissionPermit`] and returned when the permit is
/// dropped, whichever way the probe exits.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    gauge: Arc<Gauge>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            gauge: Arc::new(Gauge::default()),
            capacity,
        }
    }

    /// Waits for a free slot.
    pub async fn acquire(&self) -> Result<AdmissionPermit, AcquireError> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await?;
        let now = self.gauge.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        Ok(AdmissionPermit {
            _permit: permit,
            gauge: Arc::clone(&self.gauge),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.gauge.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits held at the same time since creation.
    pub fn peak(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    gauge: Arc<Gauge>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gauge.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn zero_capacity_still_admits_one() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.capacity(), 1);
        let _permit = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_flight(), 1);
    }

    #[tokio::test]
    async fn dropping_a_permit_frees_the_slot() {
        let limiter = ConcurrencyLimiter::new(1);
        let first = limiter.acquire().await.unwrap();

        let waiting = tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(waiting.is_err(), "second acquire must block while the slot is held");

        drop(first);
        let _second = tokio::time::timeout(Duration::from_millis(50), limiter.acquire())
            .await
            .expect("slot should be free after drop")
            .unwrap();
        assert_eq!(limiter.in_flight(), 1);
        assert_eq!(limiter.peak(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn peak_never_exceeds_capacity() {
        let limiter = ConcurrencyLimiter::new(3);
        let mut handles = Vec::new();
        for _ in 0..40 {
            let permit = limiter.acquire().await.unwrap();
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                drop(permit);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(limiter.in_flight(), 0);
        assert!(limiter.peak() <= 3);
        assert!(limiter.peak() >= 1);
    }
}
