//! Buffered write sequencer: decouples encoding (which happens on the
//! thread pool, out of order) from writing to the terminal (which must
//! happen in enqueue order, and for animations, paced against a clock).
//!
//! Encoders submit an encode job to the [`crate::threadpool::ThreadPool`]
//! and hand the resulting [`crate::threadpool::TaskHandle`] to
//! [`BufferedWriteSequencer::write_buffer`] together with a sequence type
//! and a display duration. A single background thread drains these handles
//! strictly in the order they were submitted — blocking on a handle that
//! hasn't resolved yet is fine, since the pool is still working on it.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::clock::{Duration, Time};
use crate::threadpool::TaskHandle;

/// Frames whose scheduled deadline has already slipped by more than this
/// are skipped rather than written late, so a slow terminal or decoder does
/// not cause animation playback to fall further and further behind.
const MAX_SKEW_BEFORE_SKIP: Duration = Duration::millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqType {
    /// First frame of an animation: resets the pacing clock.
    StartOfAnimation,
    /// A subsequent animation frame: paced against the clock, droppable.
    AnimationFrame,
    /// A still image or other one-off write: never paced, never dropped.
    FrameImmediate,
    /// Cursor motion, clear screen, and other non-pixel control output:
    /// always written immediately, and does not reset animation pacing.
    ControlWrite,
}

/// An encoded chunk of terminal output, ready to be written verbatim.
#[derive(Debug, Clone, Default)]
pub struct OutBuffer {
    pub data: Vec<u8>,
}

impl OutBuffer {
    pub fn new() -> Self {
        OutBuffer { data: Vec::new() }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        OutBuffer { data }
    }

    pub fn append_str(&mut self, s: &str) {
        self.data.extend_from_slice(s.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

enum QueueItem {
    Work {
        out: TaskHandle<OutBuffer>,
        seq_type: SeqType,
        end_of_frame: Duration,
    },
    /// A synchronization point: once processed, signals the condvar waiters
    /// in `flush()`, letting a caller block until everything enqueued so
    /// far has actually been written.
    FlushSentinel,
}

#[derive(Default)]
struct Stats {
    frames_total: AtomicU64,
    frames_written: AtomicU64,
    frames_skipped: AtomicU64,
    bytes_total: AtomicU64,
    bytes_written: AtomicU64,
    bytes_skipped: AtomicU64,
}

struct Shared {
    queue: Mutex<VecDeque<QueueItem>>,
    cond: Condvar,
    flushed: Condvar,
    flush_generation: Mutex<u64>,
    exiting: AtomicBool,
    interrupted: Arc<AtomicBool>,
    allow_frame_skip: bool,
    stats: Stats,
}

/// Paces and writes encoded frames to a raw file descriptor-backed writer.
pub struct BufferedWriteSequencer {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl BufferedWriteSequencer {
    pub fn new<W>(writer: W, interrupted: Arc<AtomicBool>, allow_frame_skip: bool) -> Self
    where
        W: Write + Send + 'static,
    {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            flushed: Condvar::new(),
            flush_generation: Mutex::new(0),
            exiting: AtomicBool::new(false),
            interrupted,
            allow_frame_skip,
            stats: Stats::default(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("write-sequencer".to_string())
            .spawn(move || process_queue(worker_shared, writer))
            .expect("failed to spawn write sequencer thread");
        BufferedWriteSequencer {
            shared,
            worker: Some(worker),
        }
    }

    /// Enqueue an in-flight encode result for writing. `end_of_frame` is how
    /// long this frame should remain visible before the next one is due;
    /// zero means "don't pace, write as soon as it's this item's turn."
    pub fn write_buffer(
        &self,
        out: TaskHandle<OutBuffer>,
        seq_type: SeqType,
        end_of_frame: Duration,
    ) {
        let mut q = self.shared.queue.lock().unwrap();
        q.push_back(QueueItem::Work {
            out,
            seq_type,
            end_of_frame,
        });
        self.shared.cond.notify_one();
    }

    /// Block until every item enqueued before this call has been written.
    pub fn flush(&self) {
        let target = {
            let mut q = self.shared.queue.lock().unwrap();
            q.push_back(QueueItem::FlushSentinel);
            self.shared.cond.notify_one();
            *self.shared.flush_generation.lock().unwrap() + 1
        };
        let guard = self.shared.flush_generation.lock().unwrap();
        let _unused = self
            .shared
            .flushed
            .wait_while(guard, |gen| *gen < target)
            .unwrap();
    }

    pub fn frames_total(&self) -> u64 {
        self.shared.stats.frames_total.load(Ordering::Relaxed)
    }

    pub fn frames_written(&self) -> u64 {
        self.shared.stats.frames_written.load(Ordering::Relaxed)
    }

    pub fn frames_skipped(&self) -> u64 {
        self.shared.stats.frames_skipped.load(Ordering::Relaxed)
    }

    pub fn bytes_total(&self) -> u64 {
        self.shared.stats.bytes_total.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.shared.stats.bytes_written.load(Ordering::Relaxed)
    }

    pub fn bytes_skipped(&self) -> u64 {
        self.shared.stats.bytes_skipped.load(Ordering::Relaxed)
    }
}

impl Drop for BufferedWriteSequencer {
    fn drop(&mut self) {
        self.shared.exiting.store(true, Ordering::SeqCst);
        self.shared.cond.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn process_queue<W: Write>(shared: Arc<Shared>, mut writer: W) {
    let mut next_deadline: Option<Time> = None;
    loop {
        let item = {
            let mut q = shared.queue.lock().unwrap();
            loop {
                if let Some(item) = q.pop_front() {
                    break Some(item);
                }
                if shared.exiting.load(Ordering::SeqCst) {
                    break None;
                }
                q = shared.cond.wait(q).unwrap();
            }
        };
        let item = match item {
            Some(item) => item,
            None => return,
        };
        match item {
            QueueItem::FlushSentinel => {
                let _ = writer.flush();
                let mut gen = shared.flush_generation.lock().unwrap();
                *gen += 1;
                shared.flushed.notify_all();
            }
            QueueItem::Work {
                out,
                seq_type,
                end_of_frame,
            } => {
                let is_control = matches!(seq_type, SeqType::ControlWrite);
                if shared.interrupted.load(Ordering::Relaxed) && !is_control {
                    // Drain without writing; we're shutting down.
                    continue;
                }

                match seq_type {
                    SeqType::StartOfAnimation => {
                        next_deadline = None;
                    }
                    _ => {}
                }

                let skip = match seq_type {
                    SeqType::AnimationFrame => match next_deadline {
                        Some(deadline) => {
                            let now = Time::now();
                            if shared.allow_frame_skip && now.duration_since(deadline) > MAX_SKEW_BEFORE_SKIP {
                                true
                            } else {
                                deadline.wait_until();
                                false
                            }
                        }
                        None => false,
                    },
                    _ => false,
                };

                // The handle must be consumed regardless of whether we write
                // it, to preserve strict enqueue-order draining of the pool.
                let buffer = out.get();

                if !is_control {
                    shared.stats.frames_total.fetch_add(1, Ordering::Relaxed);
                    shared
                        .stats
                        .bytes_total
                        .fetch_add(buffer.data.len() as u64, Ordering::Relaxed);
                }

                if skip {
                    if !is_control {
                        shared.stats.frames_skipped.fetch_add(1, Ordering::Relaxed);
                        shared
                            .stats
                            .bytes_skipped
                            .fetch_add(buffer.data.len() as u64, Ordering::Relaxed);
                    }
                } else if let Err(e) = reliable_write(&mut writer, &buffer.data) {
                    log::warn!("write to terminal failed: {e}");
                } else if !is_control {
                    shared.stats.frames_written.fetch_add(1, Ordering::Relaxed);
                    shared
                        .stats
                        .bytes_written
                        .fetch_add(buffer.data.len() as u64, Ordering::Relaxed);
                }

                if matches!(seq_type, SeqType::AnimationFrame | SeqType::StartOfAnimation)
                    && !end_of_frame.is_zero()
                {
                    let base = next_deadline.unwrap_or_else(Time::now);
                    next_deadline = Some(base.add(end_of_frame));
                }
            }
        }
    }
}

/// Write the whole buffer, retrying on a short (partial) write and only
/// giving up on a genuine I/O error.
fn reliable_write<W: Write>(writer: &mut W, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match writer.write(data) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write returned zero bytes",
                ))
            }
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threadpool::ThreadPool;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Default)]
    struct VecWriter(Arc<StdMutex<Vec<u8>>>);
    impl Write for VecWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writes_preserve_enqueue_order_despite_pool_completion_order() {
        let pool = ThreadPool::new(4);
        let sink = VecWriter::default();
        let seq = BufferedWriteSequencer::new(sink.clone(), Arc::new(AtomicBool::new(false)), true);

        // Job 0 sleeps longer than job 1, so if the sequencer wrote in
        // completion order the bytes would come out "1", "0".
        let slow = pool.exec_async(|| {
            std::thread::sleep(std::time::Duration::from_millis(30));
            OutBuffer::from_vec(b"0".to_vec())
        });
        let fast = pool.exec_async(|| OutBuffer::from_vec(b"1".to_vec()));

        seq.write_buffer(slow, SeqType::FrameImmediate, Duration::ZERO);
        seq.write_buffer(fast, SeqType::FrameImmediate, Duration::ZERO);
        seq.flush();

        assert_eq!(&sink.0.lock().unwrap()[..], b"01");
    }

    #[test]
    fn control_write_is_never_skipped() {
        let pool = ThreadPool::new(1);
        let sink = VecWriter::default();
        let seq = BufferedWriteSequencer::new(sink.clone(), Arc::new(AtomicBool::new(false)), true);
        let handle = pool.exec_async(|| OutBuffer::from_vec(b"\x1b[2J".to_vec()));
        seq.write_buffer(handle, SeqType::ControlWrite, Duration::ZERO);
        seq.flush();
        assert_eq!(&sink.0.lock().unwrap()[..], b"\x1b[2J");
    }

    #[test]
    fn control_write_does_not_affect_frame_stats() {
        let pool = ThreadPool::new(1);
        let sink = VecWriter::default();
        let seq = BufferedWriteSequencer::new(sink.clone(), Arc::new(AtomicBool::new(false)), true);
        let handle = pool.exec_async(|| OutBuffer::from_vec(b"hello".to_vec()));
        seq.write_buffer(handle, SeqType::ControlWrite, Duration::ZERO);
        seq.flush();
        assert_eq!(seq.frames_total(), 0);
        assert_eq!(seq.bytes_total(), 0);
    }

    #[test]
    fn skipped_animation_frame_still_counts_toward_totals() {
        let pool = ThreadPool::new(1);
        let sink = VecWriter::default();
        let seq = BufferedWriteSequencer::new(sink.clone(), Arc::new(AtomicBool::new(false)), true);

        let first = pool.exec_async(|| OutBuffer::from_vec(b"0".to_vec()));
        seq.write_buffer(first, SeqType::StartOfAnimation, Duration::millis(1));

        // Let the scheduled deadline slip well past the 250ms skew budget
        // before the next frame is even enqueued, forcing a skip.
        std::thread::sleep(std::time::Duration::from_millis(300));

        let second = pool.exec_async(|| OutBuffer::from_vec(b"22".to_vec()));
        seq.write_buffer(second, SeqType::AnimationFrame, Duration::ZERO);
        seq.flush();

        assert_eq!(seq.frames_total(), 2);
        assert_eq!(seq.frames_skipped(), 1);
        assert_eq!(seq.bytes_total(), 3);
        assert_eq!(seq.bytes_skipped(), 2);
        assert_eq!(&sink.0.lock().unwrap()[..], b"0");
    }

    #[test]
    fn disabling_allow_frame_skip_never_skips() {
        let pool = ThreadPool::new(1);
        let sink = VecWriter::default();
        let seq = BufferedWriteSequencer::new(sink.clone(), Arc::new(AtomicBool::new(false)), false);

        let first = pool.exec_async(|| OutBuffer::from_vec(b"0".to_vec()));
        seq.write_buffer(first, SeqType::StartOfAnimation, Duration::millis(1));
        std::thread::sleep(std::time::Duration::from_millis(300));
        let second = pool.exec_async(|| OutBuffer::from_vec(b"1".to_vec()));
        seq.write_buffer(second, SeqType::AnimationFrame, Duration::ZERO);
        seq.flush();

        assert_eq!(seq.frames_skipped(), 0);
        assert_eq!(&sink.0.lock().unwrap()[..], b"01");
    }
}
