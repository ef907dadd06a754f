//! RTP/RTCP port-pair pool.
//!
//! Hands out even-numbered ports from a configured contiguous range.
//! Callers use the returned port for RTP and `port + 1` for RTCP, and
//! release both by releasing the even port.

use std::collections::BTreeSet;

use parking_lot::Mutex;

/// Process-wide pool of free RTP start ports.
///
/// Every port handed out by [`next`](Self::next) is either in use by
/// exactly one [`crate::mount::Stream`] or one subscriber session, or
/// present back in the pool — never both, never neither. This is
/// maintained by callers always pairing `next()`/`release()`.
#[derive(Clone)]
pub struct PortPool {
    inner: std::sync::Arc<Mutex<Inner>>,
}

struct Inner {
    free: BTreeSet<u16>,
}

impl PortPool {
    /// Construct a pool covering `[start, start + count*2)`, stepping by 2
    /// so every member is even. `start` is rounded up to the nearest even
    /// number.
    pub fn new(start: u16, count: u16) -> Self {
        let start = if start % 2 == 0 { start } else { start + 1 };
        let mut free = BTreeSet::new();
        let mut port = start;
        for _ in 0..count {
            free.insert(port);
            match port.checked_add(2) {
                Some(next) => port = next,
                None => break,
            }
        }
        tracing::info!(start, count, "port pool initialized");
        Self {
            inner: std::sync::Arc::new(Mutex::new(Inner { free })),
        }
    }

    /// Reserve and return the smallest available RTP port, or `None` if the
    /// pool is exhausted.
    pub fn next(&self) -> Option<u16> {
        let mut inner = self.inner.lock();
        let port = inner.free.iter().next().copied();
        if let Some(p) = port {
            inner.free.remove(&p);
            tracing::trace!(port = p, remaining = inner.free.len(), "port allocated");
        }
        port
    }

    /// Return a previously allocated RTP port to the pool. Idempotent:
    /// releasing the same port twice just leaves it present once.
    pub fn release(&self, port: u16) {
        let mut inner = self.inner.lock();
        inner.free.insert(port);
        tracing::trace!(port, available = inner.free.len(), "port released");
    }

    /// Number of ports currently available. Exposed for tests verifying
    /// port conservation.
    pub fn available(&self) -> usize {
        self.inner.lock().free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_even_ports_in_order() {
        let pool = PortPool::new(6000, 3);
        assert_eq!(pool.next(), Some(6000));
        assert_eq!(pool.next(), Some(6002));
        assert_eq!(pool.next(), Some(6004));
        assert_eq!(pool.next(), None);
    }

    #[test]
    fn odd_start_rounds_up() {
        let pool = PortPool::new(6001, 1);
        assert_eq!(pool.next(), Some(6002));
    }

    #[test]
    fn release_makes_port_available_again() {
        let pool = PortPool::new(6000, 1);
        let p = pool.next().unwrap();
        assert_eq!(pool.next(), None);
        pool.release(p);
        assert_eq!(pool.next(), Some(p));
    }

    #[test]
    fn conservation_after_full_cycle() {
        let pool = PortPool::new(7000, 4);
        let initial = pool.available();
        let ports: Vec<u16> = std::iter::from_fn(|| pool.next()).collect();
        assert_eq!(ports.len(), 4);
        assert_eq!(pool.available(), 0);
        for p in ports {
            pool.release(p);
        }
        assert_eq!(pool.available(), initial);
    }

    #[test]
    fn double_release_is_idempotent_for_membership() {
        let pool = PortPool::new(8000, 2);
        let p = pool.next().unwrap();
        pool.release(p);
        pool.release(p);
        // still only counted once in the free set
        assert_eq!(pool.available(), 2);
    }
}
