use parking_lot::{Condvar, Mutex};

const MAX_READERS: u32 = u32::MAX;

#[derive(Debug)]
struct LatchState {
    reader_count: u32,
    writer_entered: bool,
}

/// Writer-preferring reader/writer latch.
///
/// A writer announces itself by setting `writer_entered` before waiting for
/// readers to drain, which blocks new readers and keeps page splits and
/// merges from starving under scan-heavy workloads. Unlike an RAII lock, the
/// acquire and release sides may run in different scopes; the B+tree's
/// crabbing protocol relies on that.
#[derive(Debug)]
pub struct RwLatch {
    state: Mutex<LatchState>,
    /// Readers (and writers waiting for a previous writer) park here.
    reader_cv: Condvar,
    /// The entered writer parks here until the reader count drains to zero.
    writer_cv: Condvar,
}

impl Default for RwLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl RwLatch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LatchState {
                reader_count: 0,
                writer_entered: false,
            }),
            reader_cv: Condvar::new(),
            writer_cv: Condvar::new(),
        }
    }

    pub fn read_lock(&self) {
        let mut state = self.state.lock();
        while state.writer_entered || state.reader_count == MAX_READERS {
            self.reader_cv.wait(&mut state);
        }
        state.reader_count += 1;
    }

    pub fn read_unlock(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.reader_count > 0, "read_unlock without read_lock");
        state.reader_count -= 1;
        if state.writer_entered {
            if state.reader_count == 0 {
                self.writer_cv.notify_one();
            }
        } else if state.reader_count == MAX_READERS - 1 {
            self.reader_cv.notify_one();
        }
    }

    pub fn write_lock(&self) {
        let mut state = self.state.lock();
        while state.writer_entered {
            self.reader_cv.wait(&mut state);
        }
        // Block new readers first, then wait for the existing ones to leave.
        state.writer_entered = true;
        while state.reader_count > 0 {
            self.writer_cv.wait(&mut state);
        }
    }

    pub fn write_unlock(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.writer_entered, "write_unlock without write_lock");
        state.writer_entered = false;
        self.reader_cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_read_read_sharing() {
        let latch = Arc::new(RwLatch::new());
        latch.read_lock();

        let latch2 = latch.clone();
        let handle = thread::spawn(move || {
            // A second reader must not block.
            latch2.read_lock();
            latch2.read_unlock();
        });
        handle.join().unwrap();
        latch.read_unlock();
    }

    #[test]
    fn test_writer_excludes_readers() {
        let latch = Arc::new(RwLatch::new());
        let counter = Arc::new(AtomicU32::new(0));

        latch.write_lock();

        let latch2 = latch.clone();
        let counter2 = counter.clone();
        let handle = thread::spawn(move || {
            latch2.read_lock();
            counter2.fetch_add(1, Ordering::SeqCst);
            latch2.read_unlock();
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        latch.write_unlock();
        handle.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_writer_preference() {
        let latch = Arc::new(RwLatch::new());
        latch.read_lock();

        let latch2 = latch.clone();
        let writer = thread::spawn(move || {
            latch2.write_lock();
            latch2.write_unlock();
        });

        // Give the writer time to enter; a late reader must now wait even
        // though a reader still holds the latch.
        thread::sleep(Duration::from_millis(50));
        let latch3 = latch.clone();
        let entered = Arc::new(AtomicU32::new(0));
        let entered2 = entered.clone();
        let reader = thread::spawn(move || {
            latch3.read_lock();
            entered2.store(1, Ordering::SeqCst);
            latch3.read_unlock();
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(entered.load(Ordering::SeqCst), 0);

        latch.read_unlock();
        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_writers_serialize() {
        let latch = Arc::new(RwLatch::new());
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let latch = latch.clone();
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    latch.write_lock();
                    let v = counter.load(Ordering::SeqCst);
                    counter.store(v + 1, Ordering::SeqCst);
                    latch.write_unlock();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 800);
    }
}
