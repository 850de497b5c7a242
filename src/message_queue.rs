//! Ordered text pipeline between producers (serial threads, build output)
//! and a console.
//!
//! Producers call [`LineMessageQueue::put`] from any thread and never block.
//! A single drain thread pops messages in FIFO order and hands them to the
//! sink, scanning compiler diagnostics on the way.
//!
//! Shutdown is two-phase: [`LineMessageQueue::stop`] records the sequence
//! number of the newest message queued so far and waits until the drain
//! thread has delivered everything up to it. Anything put after that point
//! stays queued for the next [`start`](LineMessageQueue::start) or
//! [`drain_now`](LineMessageQueue::drain_now), so a producer that never
//! stops cannot keep `stop()` from returning.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::annotations::ErrorAnnotationTracker;
use crate::console::ConsoleSink;

/// How long the drain thread sleeps when the queue is empty.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// `stop_at` value while no stop is pending.
const NO_WATERMARK: u64 = u64::MAX;

/// Where drained messages end up.
pub trait MessageSink: Send + Sync {
    fn deliver(&self, text: &str);
}

impl<F> MessageSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn deliver(&self, text: &str) {
        self(text)
    }
}

/// Sink that prints into one named console.
pub struct ConsolePrinter {
    console: Arc<ConsoleSink>,
    name: String,
}

impl ConsolePrinter {
    pub fn new(console: Arc<ConsoleSink>, name: impl Into<String>) -> Self {
        Self {
            console,
            name: name.into(),
        }
    }
}

impl MessageSink for ConsolePrinter {
    fn deliver(&self, text: &str) {
        self.console.write(&self.name, text);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub seq: u64,
    pub text: String,
}

struct Pending {
    items: VecDeque<Message>,
    next_seq: u64,
}

struct QueueInner {
    pending: Mutex<Pending>,
    /// Drain thread exits before delivering a message with `seq >= stop_at`.
    stop_at: AtomicU64,
    timestamps: AtomicBool,
    sink: Arc<dyn MessageSink>,
    tracker: Option<Arc<ErrorAnnotationTracker>>,
}

pub struct LineMessageQueue {
    inner: Arc<QueueInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LineMessageQueue {
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self::build(sink, None)
    }

    /// Queue whose messages are also scanned for compiler diagnostics.
    pub fn with_tracker(sink: Arc<dyn MessageSink>, tracker: Arc<ErrorAnnotationTracker>) -> Self {
        Self::build(sink, Some(tracker))
    }

    fn build(sink: Arc<dyn MessageSink>, tracker: Option<Arc<ErrorAnnotationTracker>>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                pending: Mutex::new(Pending {
                    items: VecDeque::new(),
                    next_seq: 0,
                }),
                stop_at: AtomicU64::new(NO_WATERMARK),
                timestamps: AtomicBool::new(true),
                sink,
                tracker,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Globally enable or disable the `HH:MM:SS` prefix.
    pub fn set_timestamps(&self, enabled: bool) {
        self.inner.timestamps.store(enabled, Ordering::Relaxed);
    }

    /// Queue a status line: `HH:MM:SS ` prefix (unless disabled) and a
    /// trailing newline.
    pub fn put(&self, text: &str) {
        self.enqueue(text, false);
    }

    /// Queue a fragment of device or tool output exactly as received.
    ///
    /// A fragment made only of line breaks is kept: it terminates a device
    /// line whose text arrived in the previous read.
    pub fn put_raw(&self, text: &str) {
        self.enqueue(text, true);
    }

    fn enqueue(&self, text: &str, raw: bool) {
        let ends_line = raw && text.contains('\n');
        if text.trim().is_empty() && !ends_line {
            return;
        }
        let mut text = text.replace("\\n", "\n");
        if !raw {
            if self.inner.timestamps.load(Ordering::Relaxed) {
                let stamp = chrono::Local::now().format("%H:%M:%S ").to_string();
                text.insert_str(0, &stamp);
            }
            if !text.ends_with('\n') {
                text.push('\n');
            }
        }

        let mut pending = self.inner.pending.lock();
        let seq = pending.next_seq;
        pending.next_seq += 1;
        pending.items.push_back(Message { seq, text });
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().items.len()
    }

    pub fn is_alive(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Spawn the drain thread. No-op when it is already running.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        self.inner.stop_at.store(NO_WATERMARK, Ordering::SeqCst);
        let inner = self.inner.clone();
        let spawned = std::thread::Builder::new()
            .name("message-queue".into())
            .spawn(move || drain_loop(&inner));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                tracing::debug!("message queue started");
            }
            Err(e) => tracing::error!("failed to spawn message queue thread: {e}"),
        }
    }

    /// Block until every message queued before this call has been delivered,
    /// then stop the drain thread.
    pub fn stop(&self) {
        let mut worker = self.worker.lock();
        let Some(handle) = worker.take() else {
            return;
        };
        let watermark = self.inner.pending.lock().next_seq;
        self.inner.stop_at.store(watermark, Ordering::SeqCst);
        if handle.join().is_err() {
            tracing::error!("message queue thread panicked");
        }
        tracing::debug!(watermark, "message queue stopped");
    }

    /// Deliver everything queued right now on the calling thread.
    /// Does nothing while the drain thread is running.
    pub fn drain_now(&self) {
        if self.is_alive() {
            return;
        }
        while let Some(message) = pop_next(&self.inner, NO_WATERMARK) {
            deliver(&self.inner, &message);
        }
    }
}

impl Drop for LineMessageQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pop_next(inner: &QueueInner, stop_at: u64) -> Option<Message> {
    let mut pending = inner.pending.lock();
    match pending.items.front() {
        Some(front) if front.seq < stop_at => pending.items.pop_front(),
        _ => None,
    }
}

fn drain_loop(inner: &QueueInner) {
    loop {
        let stop_at = inner.stop_at.load(Ordering::SeqCst);
        match pop_next(inner, stop_at) {
            Some(message) => deliver(inner, &message),
            None if stop_at != NO_WATERMARK => break,
            None => std::thread::sleep(DRAIN_POLL_INTERVAL),
        }
    }
}

/// Print one message, then feed it to the tracker if it looks like a
/// diagnostic. A panicking sink must not take the drain thread down.
fn deliver(inner: &QueueInner, message: &Message) {
    let is_diagnostic = inner
        .tracker
        .as_ref()
        .is_some_and(|tracker| tracker.has_signature(&message.text));

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        inner.sink.deliver(&message.text);
        if is_diagnostic && let Some(tracker) = &inner.tracker {
            tracker.scan_text(&message.text);
        }
    }));
    if outcome.is_err() {
        tracing::error!(seq = message.seq, "message sink panicked; message skipped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn collecting_queue() -> (Arc<Mutex<Vec<String>>>, LineMessageQueue) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink_received = received.clone();
        let queue = LineMessageQueue::new(Arc::new(move |text: &str| {
            sink_received.lock().push(text.to_string());
        }));
        (received, queue)
    }

    #[test]
    fn blank_messages_are_dropped() {
        let (received, queue) = collecting_queue();
        queue.put("");
        queue.put("   \n\t");
        queue.put_raw(" \t");
        queue.put_raw("\r");
        assert_eq!(queue.pending_len(), 0);
        queue.drain_now();
        assert!(received.lock().is_empty());
    }

    #[test]
    fn line_break_fragment_ends_the_previous_read() {
        let (received, queue) = collecting_queue();
        queue.put_raw("hello");
        queue.put_raw("\n");
        queue.put_raw("world");
        queue.put("\n");
        queue.drain_now();
        assert_eq!(received.lock().concat(), "hello\nworld");
    }

    #[test]
    fn literal_backslash_n_becomes_newline() {
        let (received, queue) = collecting_queue();
        queue.put_raw(r"first\nsecond");
        queue.drain_now();
        assert_eq!(received.lock()[0], "first\nsecond");
    }

    #[test]
    fn timestamp_prefix_unless_suppressed() {
        let (received, queue) = collecting_queue();
        queue.put("stamped");
        queue.put_raw("raw");
        queue.drain_now();
        let got = received.lock();
        let re = regex::Regex::new(r"^\d{2}:\d{2}:\d{2} stamped\n$").unwrap();
        assert!(re.is_match(&got[0]), "unexpected: {}", got[0]);
        assert_eq!(got[1], "raw");
    }

    #[test]
    fn timestamps_can_be_disabled() {
        let (received, queue) = collecting_queue();
        queue.set_timestamps(false);
        queue.put("plain");
        queue.drain_now();
        assert_eq!(received.lock()[0], "plain\n");
    }

    #[test]
    fn delivers_in_fifo_order() {
        let (received, queue) = collecting_queue();
        queue.start();
        for i in 0..200 {
            queue.put_raw(&format!("m{i}"));
        }
        queue.stop();
        let expected: Vec<String> = (0..200).map(|i| format!("m{i}")).collect();
        assert_eq!(*received.lock(), expected);
    }

    #[test]
    fn fifo_across_producer_threads() {
        let (received, queue) = collecting_queue();
        let queue = Arc::new(queue);
        queue.start();
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        queue.put_raw(&format!("{p}:{i}"));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        queue.stop();

        let got = received.lock();
        assert_eq!(got.len(), 200);
        for p in 0..4 {
            let mine: Vec<usize> = got
                .iter()
                .filter_map(|m| m.strip_prefix(&format!("{p}:")))
                .map(|i| i.parse().unwrap())
                .collect();
            assert_eq!(mine, (0..50).collect::<Vec<_>>());
        }
    }

    #[test]
    fn stop_drains_everything_put_before_it() {
        let (tx, rx) = mpsc::channel::<()>();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink_received = received.clone();
        let gate = Mutex::new(Some(rx));
        let queue = LineMessageQueue::new(Arc::new(move |text: &str| {
            // Hold the first delivery until every message is queued.
            if let Some(rx) = gate.lock().take() {
                let _ = rx.recv();
            }
            sink_received.lock().push(text.to_string());
        }));
        queue.start();
        for i in 0..25 {
            queue.put_raw(&format!("m{i}"));
        }
        tx.send(()).unwrap();
        queue.stop();
        assert_eq!(received.lock().len(), 25);
        assert!(!queue.is_alive());
    }

    #[test]
    fn start_is_idempotent_and_restartable() {
        let (received, queue) = collecting_queue();
        queue.start();
        queue.start();
        queue.put_raw("one");
        queue.stop();
        queue.stop();
        queue.put_raw("two");
        assert_eq!(queue.pending_len(), 1);
        queue.start();
        queue.stop();
        assert_eq!(*received.lock(), vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn panicking_sink_does_not_stop_the_drain() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink_received = received.clone();
        let queue = LineMessageQueue::new(Arc::new(move |text: &str| {
            if text == "boom" {
                panic!("sink failure");
            }
            sink_received.lock().push(text.to_string());
        }));
        queue.start();
        queue.put_raw("boom");
        queue.put_raw("after");
        queue.stop();
        assert_eq!(*received.lock(), vec!["after".to_string()]);
    }

    #[test]
    fn diagnostics_reach_the_tracker() {
        let tracker = Arc::new(ErrorAnnotationTracker::new(None));
        let queue = LineMessageQueue::with_tracker(Arc::new(|_: &str| {}), tracker.clone());
        queue.put_raw("src/main.cpp:12:5: error: missing semicolon\nCompiling x.o");
        queue.put("src/util.cpp:2:1: warning: unused");
        queue.put_raw("Linking firmware.elf");
        queue.drain_now();
        assert_eq!(tracker.annotations_for("src/main.cpp").len(), 1);
        assert_eq!(tracker.annotations_for("src/util.cpp").len(), 1);
    }
}
