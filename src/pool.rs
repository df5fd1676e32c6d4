//! A bounded pool of open file descriptors shared by all page I/O.
//!
//! Acquire pops an idle handle, opens a new one while under capacity, or
//! blocks until a release. Close drains best-effort with a bounded retry
//! budget and logs, rather than fails, when handles are still borrowed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::error::Result;
use crate::io::Descriptor;

/// Default number of descriptors a pool may hold open.
pub const DEFAULT_POOL_SIZE: usize = 4;

const DRAIN_RETRIES: usize = 20;
const DRAIN_WAIT: Duration = Duration::from_millis(50);

struct PoolState {
    idle: Vec<Descriptor>,
    open: usize,
}

/// Bounded pool of [`Descriptor`]s over a single backing file.
pub struct DescriptorPool {
    path: PathBuf,
    read_only: bool,
    capacity: usize,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl DescriptorPool {
    /// Creates an empty pool; descriptors are opened lazily on demand.
    pub fn new(path: impl AsRef<Path>, read_only: bool, capacity: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            read_only,
            capacity: capacity.max(1),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Borrows a descriptor, blocking while the pool is exhausted.
    pub fn acquire(&self) -> Result<PooledDescriptor<'_>> {
        let mut state = self.state.lock();
        loop {
            if let Some(descriptor) = state.idle.pop() {
                return Ok(PooledDescriptor {
                    pool: self,
                    descriptor: Some(descriptor),
                });
            }
            if state.open < self.capacity {
                state.open += 1;
                drop(state);
                match Descriptor::open(&self.path, self.read_only) {
                    Ok(descriptor) => {
                        return Ok(PooledDescriptor {
                            pool: self,
                            descriptor: Some(descriptor),
                        })
                    }
                    Err(err) => {
                        self.state.lock().open -= 1;
                        self.available.notify_one();
                        return Err(err);
                    }
                }
            }
            self.available.wait(&mut state);
        }
    }

    fn release(&self, descriptor: Descriptor) {
        let mut state = self.state.lock();
        state.idle.push(descriptor);
        drop(state);
        self.available.notify_one();
    }

    /// Number of descriptors currently open (idle plus borrowed).
    pub fn open_count(&self) -> usize {
        self.state.lock().open
    }

    /// Closes every pooled descriptor, waiting a bounded time for borrowed
    /// handles to come back. Handles that never return are logged and leaked
    /// to their borrowers; teardown does not fail.
    pub fn close(&self) {
        let mut state = self.state.lock();
        for _ in 0..DRAIN_RETRIES {
            while let Some(descriptor) = state.idle.pop() {
                state.open -= 1;
                drop(descriptor);
            }
            if state.open == 0 {
                return;
            }
            self.available.wait_for(&mut state, DRAIN_WAIT);
        }
        while let Some(descriptor) = state.idle.pop() {
            state.open -= 1;
            drop(descriptor);
        }
        if state.open > 0 {
            warn!(
                borrowed = state.open,
                "descriptor pool closed with handles still in use"
            );
        }
    }
}

/// RAII guard returning its descriptor to the pool on drop.
pub struct PooledDescriptor<'a> {
    pool: &'a DescriptorPool,
    descriptor: Option<Descriptor>,
}

impl std::ops::Deref for PooledDescriptor<'_> {
    type Target = Descriptor;

    fn deref(&self) -> &Descriptor {
        self.descriptor
            .as_ref()
            .expect("descriptor present until drop")
    }
}

impl Drop for PooledDescriptor<'_> {
    fn drop(&mut self) {
        if let Some(descriptor) = self.descriptor.take() {
            self.pool.release(descriptor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;
    use tempfile::tempdir;

    #[test]
    fn acquire_reuses_released_descriptor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.bin");
        std::fs::write(&path, b"seed").unwrap();
        let pool = DescriptorPool::new(&path, false, 2);
        {
            let first = pool.acquire().unwrap();
            first.write_at(0, b"x").unwrap();
        }
        assert_eq!(pool.open_count(), 1);
        let _again = pool.acquire().unwrap();
        assert_eq!(pool.open_count(), 1);
    }

    #[test]
    fn acquire_blocks_when_exhausted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.bin");
        std::fs::write(&path, b"seed").unwrap();
        let pool = Arc::new(DescriptorPool::new(&path, false, 1));

        let held = pool.acquire().unwrap();
        let blocked = Arc::new(AtomicBool::new(true));
        let pool2 = Arc::clone(&pool);
        let blocked2 = Arc::clone(&blocked);
        let waiter = thread::spawn(move || {
            let guard = pool2.acquire().unwrap();
            blocked2.store(false, Ordering::SeqCst);
            drop(guard);
        });

        thread::sleep(Duration::from_millis(100));
        assert!(blocked.load(Ordering::SeqCst), "waiter ran before release");
        drop(held);
        waiter.join().unwrap();
        assert!(!blocked.load(Ordering::SeqCst));
    }

    #[test]
    fn close_drains_idle_descriptors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.bin");
        std::fs::write(&path, b"seed").unwrap();
        let pool = DescriptorPool::new(&path, false, 4);
        {
            let _a = pool.acquire().unwrap();
            let _b = pool.acquire().unwrap();
        }
        assert_eq!(pool.open_count(), 2);
        pool.close();
        assert_eq!(pool.open_count(), 0);
    }

    #[test]
    fn close_waits_for_borrowed_descriptor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.bin");
        std::fs::write(&path, b"seed").unwrap();
        let pool = Arc::new(DescriptorPool::new(&path, false, 1));

        let pool2 = Arc::clone(&pool);
        let holder = thread::spawn(move || {
            let guard = pool2.acquire().unwrap();
            thread::sleep(Duration::from_millis(80));
            drop(guard);
        });

        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        pool.close();
        holder.join().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(pool.open_count(), 0);
    }
}
