//! Debounce utility for coalescing rapid events.
//!
//! A [`Debouncer`] delays an event until a quiet period has passed since the
//! last event for the same key. File systems report a single save as several
//! create/modify notifications; debouncing turns each burst into one action.
//!
//! # Architecture
//!
//! A background task owns a map of pending events keyed by a user-defined
//! key type. It receives commands over a channel:
//!
//! 1. An event replaces any pending event for its key and restarts its timer
//! 2. A cancel removes the pending event for one key, silently
//! 3. A cancel-all clears every pending event
//!
//! When a key's timer expires its last value is emitted on the output
//! channel. When every handle is dropped the task exits and pending events
//! are discarded, never emitted.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//! use liverysync_monitor::utils::debounce::Debouncer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (output_tx, mut output_rx) = mpsc::channel(100);
//!     let debouncer = Debouncer::new(Duration::from_millis(100), output_tx);
//!
//!     let path = PathBuf::from("player.JSON");
//!     debouncer.send(path.clone(), 1).await.unwrap();
//!     debouncer.send(path.clone(), 2).await.unwrap();
//!
//!     // One event, carrying the last value
//!     assert_eq!(output_rx.recv().await, Some((path, 2)));
//! }
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Default quiet period in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 1250;

/// Capacity of the command channel.
const COMMAND_CAPACITY: usize = 1000;

/// Error type for debouncer operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DebouncerError {
    /// The debouncer's background task has terminated.
    #[error("debouncer channel closed")]
    ChannelClosed,
}

enum Command<K, V> {
    Event(K, V),
    Cancel(K),
    CancelAll,
}

/// A pending event waiting for its quiet period to end.
#[derive(Debug)]
struct PendingEvent<V> {
    value: V,
    deadline: Instant,
}

/// A debouncer that coalesces rapid events by key.
///
/// Handles are cheap to clone and all feed the same background task, which
/// runs until the last handle is dropped. Must be created inside a Tokio
/// runtime.
pub struct Debouncer<K, V> {
    input_tx: mpsc::Sender<Command<K, V>>,
}

impl<K, V> Clone for Debouncer<K, V> {
    fn clone(&self) -> Self {
        Self {
            input_tx: self.input_tx.clone(),
        }
    }
}

impl<K, V> Debug for Debouncer<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("closed", &self.input_tx.is_closed())
            .finish()
    }
}

impl<K, V> Debouncer<K, V>
where
    K: Clone + Eq + Hash + Send + Debug + 'static,
    V: Send + 'static,
{
    /// Creates a debouncer emitting on `output_tx` after `interval` of quiet.
    #[must_use]
    pub fn new(interval: Duration, output_tx: mpsc::Sender<(K, V)>) -> Self {
        let (input_tx, input_rx) = mpsc::channel(COMMAND_CAPACITY);

        tokio::spawn(run_debounce_loop(interval, input_rx, output_tx));

        Self { input_tx }
    }

    /// Creates a debouncer with the default quiet period of 1250 ms.
    #[must_use]
    pub fn with_default_interval(output_tx: mpsc::Sender<(K, V)>) -> Self {
        Self::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS), output_tx)
    }

    /// Sends an event, restarting the quiet period for its key.
    ///
    /// # Errors
    ///
    /// Returns `DebouncerError::ChannelClosed` if the background task has
    /// terminated.
    pub async fn send(&self, key: K, value: V) -> Result<(), DebouncerError> {
        self.input_tx
            .send(Command::Event(key, value))
            .await
            .map_err(|_| DebouncerError::ChannelClosed)
    }

    /// Sends an event without waiting. Safe to call from non-async threads.
    ///
    /// Returns `false` if the channel is full or closed.
    pub fn try_send(&self, key: K, value: V) -> bool {
        self.input_tx.try_send(Command::Event(key, value)).is_ok()
    }

    /// Drops the pending event for `key`, if any. Nothing is emitted for it.
    ///
    /// Returns `false` if the command could not be queued.
    pub fn cancel(&self, key: K) -> bool {
        self.input_tx.try_send(Command::Cancel(key)).is_ok()
    }

    /// Drops every pending event.
    ///
    /// Returns `false` if the command could not be queued.
    pub fn cancel_all(&self) -> bool {
        self.input_tx.try_send(Command::CancelAll).is_ok()
    }
}

async fn run_debounce_loop<K, V>(
    interval: Duration,
    mut input_rx: mpsc::Receiver<Command<K, V>>,
    output_tx: mpsc::Sender<(K, V)>,
) where
    K: Clone + Eq + Hash + Debug,
{
    let mut pending: HashMap<K, PendingEvent<V>> = HashMap::new();

    debug!(interval_ms = interval.as_millis(), "Starting debounce loop");

    loop {
        let next_deadline = pending.values().map(|p| p.deadline).min();

        tokio::select! {
            command = input_rx.recv() => {
                match command {
                    Some(Command::Event(key, value)) => {
                        trace!(key = ?key, "Received event, setting deadline");
                        let deadline = Instant::now() + interval;
                        pending.insert(key, PendingEvent { value, deadline });
                    }
                    Some(Command::Cancel(key)) => {
                        if pending.remove(&key).is_some() {
                            trace!(key = ?key, "Cancelled pending event");
                        }
                    }
                    Some(Command::CancelAll) => {
                        trace!(count = pending.len(), "Cancelled all pending events");
                        pending.clear();
                    }
                    None => {
                        debug!(discarded = pending.len(), "Input channel closed");
                        break;
                    }
                }
            }

            () = sleep_until(next_deadline) => {
                emit_expired_events(&mut pending, &output_tx).await;
            }
        }
    }

    debug!("Debounce loop terminated");
}

/// Sleeps until `deadline`, or forever when nothing is pending.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn emit_expired_events<K, V>(
    pending: &mut HashMap<K, PendingEvent<V>>,
    output_tx: &mpsc::Sender<(K, V)>,
) where
    K: Clone + Eq + Hash + Debug,
{
    let now = Instant::now();

    let expired_keys: Vec<K> = pending
        .iter()
        .filter(|(_, event)| event.deadline <= now)
        .map(|(key, _)| key.clone())
        .collect();

    for key in expired_keys {
        if let Some(event) = pending.remove(&key) {
            trace!(key = ?key, "Emitting debounced event");
            if output_tx.send((key.clone(), event.value)).await.is_err() {
                warn!(key = ?key, "Failed to emit debounced event, receiver dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio::time::{sleep, timeout};

    fn test_debouncer<K, V>(interval_ms: u64) -> (Debouncer<K, V>, mpsc::Receiver<(K, V)>)
    where
        K: Clone + Eq + Hash + Send + Debug + 'static,
        V: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(100);
        let debouncer = Debouncer::new(Duration::from_millis(interval_ms), tx);
        (debouncer, rx)
    }

    #[tokio::test]
    async fn test_single_event_emitted_after_interval() {
        let (debouncer, mut rx) = test_debouncer::<String, i32>(50);

        debouncer.send("key1".to_string(), 42).await.unwrap();

        let result = timeout(Duration::from_millis(300), rx.recv()).await;
        let (key, value) = result.expect("Should receive event within timeout").unwrap();
        assert_eq!(key, "key1");
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_burst_coalesced_to_last_value() {
        let (debouncer, mut rx) = test_debouncer::<String, i32>(50);

        for i in 0..100 {
            debouncer.send("key".to_string(), i).await.unwrap();
        }

        let result = timeout(Duration::from_millis(300), rx.recv()).await;
        assert_eq!(result.unwrap().unwrap().1, 99);

        let more = timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(more.is_err(), "Should not receive additional events");
    }

    #[tokio::test]
    async fn test_different_keys_independent() {
        let (debouncer, mut rx) = test_debouncer::<String, i32>(100);

        debouncer.send("a".to_string(), 1).await.unwrap();
        debouncer.send("a".to_string(), 2).await.unwrap();
        sleep(Duration::from_millis(60)).await;
        debouncer.send("b".to_string(), 10).await.unwrap();
        debouncer.send("b".to_string(), 20).await.unwrap();

        // "a" settles on its own timer, before "b" has been quiet long enough
        let first = timeout(Duration::from_millis(300), rx.recv())
            .await
            .expect("Timeout waiting for first key")
            .expect("Channel closed");
        assert_eq!(first, ("a".to_string(), 2));
        assert!(rx.try_recv().is_err(), "b should still be pending");

        let second = timeout(Duration::from_millis(300), rx.recv())
            .await
            .expect("Timeout waiting for second key")
            .expect("Channel closed");
        assert_eq!(second, ("b".to_string(), 20));
    }

    #[tokio::test]
    async fn test_timer_reset_on_new_event() {
        let (debouncer, mut rx) = test_debouncer::<String, i32>(100);

        debouncer.send("key1".to_string(), 1).await.unwrap();
        sleep(Duration::from_millis(60)).await;
        debouncer.send("key1".to_string(), 2).await.unwrap();
        sleep(Duration::from_millis(60)).await;

        // 120ms after the first event, but only 60ms after the last
        assert!(rx.try_recv().is_err(), "Timer should have been reset");

        let result = timeout(Duration::from_millis(300), rx.recv()).await;
        assert_eq!(result.unwrap().unwrap().1, 2);
    }

    #[tokio::test]
    async fn test_event_not_emitted_before_interval() {
        let (debouncer, mut rx) = test_debouncer::<String, i32>(100);

        debouncer.send("key".to_string(), 42).await.unwrap();

        let result = timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(result.is_err(), "Should not receive event before interval");

        let result = timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(result.is_ok(), "Should receive event after interval");
    }

    #[tokio::test]
    async fn test_try_send_success() {
        let (debouncer, mut rx) = test_debouncer::<PathBuf, ()>(50);
        let path = PathBuf::from("player.JSON");

        assert!(debouncer.try_send(path.clone(), ()));

        let result = timeout(Duration::from_millis(300), rx.recv()).await;
        assert_eq!(result.unwrap().unwrap().0, path);
    }

    #[tokio::test]
    async fn test_cancel_suppresses_event() {
        let (debouncer, mut rx) = test_debouncer::<String, i32>(50);

        debouncer.send("gone".to_string(), 1).await.unwrap();
        debouncer.send("kept".to_string(), 2).await.unwrap();
        assert!(debouncer.cancel("gone".to_string()));

        let (key, _) = timeout(Duration::from_millis(300), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(key, "kept");

        let more = timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(more.is_err(), "Cancelled key must not be emitted");
    }

    #[tokio::test]
    async fn test_cancel_unknown_key_is_silent() {
        let (debouncer, mut rx) = test_debouncer::<String, i32>(50);

        assert!(debouncer.cancel("never-sent".to_string()));
        debouncer.send("key".to_string(), 7).await.unwrap();

        let result = timeout(Duration::from_millis(300), rx.recv()).await;
        assert_eq!(result.unwrap().unwrap().1, 7);
    }

    #[tokio::test]
    async fn test_cancel_all_clears_everything() {
        let (debouncer, mut rx) = test_debouncer::<String, i32>(50);

        debouncer.send("a".to_string(), 1).await.unwrap();
        debouncer.send("b".to_string(), 2).await.unwrap();
        assert!(debouncer.cancel_all());

        let result = timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(result.is_err(), "Nothing should be emitted after cancel_all");

        // The debouncer keeps working afterwards
        debouncer.send("c".to_string(), 3).await.unwrap();
        let result = timeout(Duration::from_millis(300), rx.recv()).await;
        assert_eq!(result.unwrap().unwrap().0, "c");
    }

    #[tokio::test]
    async fn test_pending_discarded_on_drop() {
        let (debouncer, mut rx) = test_debouncer::<String, i32>(100);

        debouncer.send("key".to_string(), 42).await.unwrap();
        drop(debouncer);

        // The task exits without emitting, which closes the output channel
        let result = timeout(Duration::from_millis(300), rx.recv()).await;
        assert_eq!(result.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clones_share_one_task() {
        let (debouncer, mut rx) = test_debouncer::<String, i32>(50);
        let other = debouncer.clone();

        debouncer.send("key".to_string(), 1).await.unwrap();
        other.send("key".to_string(), 2).await.unwrap();
        drop(debouncer);

        let result = timeout(Duration::from_millis(300), rx.recv()).await;
        assert_eq!(result.unwrap().unwrap().1, 2);
    }

    #[tokio::test]
    async fn test_default_interval() {
        let (tx, mut rx) = mpsc::channel(100);
        let debouncer: Debouncer<String, i32> = Debouncer::with_default_interval(tx);

        debouncer.send("key".to_string(), 42).await.unwrap();

        let early = timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(early.is_err(), "Default quiet period is longer than 500ms");

        let result = timeout(Duration::from_millis(2000), rx.recv()).await;
        assert_eq!(result.unwrap().unwrap().1, 42);
    }

    #[tokio::test]
    async fn test_sequential_bursts_each_emit() {
        let (debouncer, mut rx) = test_debouncer::<String, i32>(50);

        debouncer.send("key".to_string(), 1).await.unwrap();
        let first = timeout(Duration::from_millis(300), rx.recv()).await;
        assert_eq!(first.unwrap().unwrap().1, 1);

        debouncer.send("key".to_string(), 2).await.unwrap();
        let second = timeout(Duration::from_millis(300), rx.recv()).await;
        assert_eq!(second.unwrap().unwrap().1, 2);
    }

    #[tokio::test]
    async fn test_output_receiver_dropped_is_handled() {
        let (debouncer, rx) = test_debouncer::<String, i32>(20);
        drop(rx);

        debouncer.send("key".to_string(), 1).await.unwrap();
        sleep(Duration::from_millis(100)).await;

        // The loop logs and keeps accepting input
        assert!(debouncer.send("key".to_string(), 2).await.is_ok());
    }

    #[test]
    fn test_debouncer_error_display() {
        assert_eq!(
            DebouncerError::ChannelClosed.to_string(),
            "debouncer channel closed"
        );
    }
}
