//! Channel table, spec §4.11: a fixed-capacity map from stream ID to
//! channel handle, protected by one creation/lookup mutex. Grounded on
//! spec §9's "global mutable state" guidance (a long-lived handle passed
//! through the runtime value) rather than a process-wide static.

use crate::channel::ChannelHandle;
use fcsdr_core::CoreError;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

struct Entry {
    handle: Arc<ChannelHandle>,
    thread: Option<JoinHandle<()>>,
}

/// Lookups that miss and carry a full tuning request create a new channel
/// under the table mutex; lookups that miss on a status-only broadcast
/// poll return `None` and are ignored by the caller (spec §4.11).
///
/// The table only ever holds a channel's [`ChannelHandle`]: the demodulator
/// thread owns the actual [`crate::channel::Channel`] and its DSP state
/// privately, so neither lookup nor removal touches anything the thread is
/// concurrently mutating.
pub struct ChannelTable {
    max_size: usize,
    entries: Mutex<HashMap<u32, Entry>>,
}

impl ChannelTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, stream_id: u32) -> Option<Arc<ChannelHandle>> {
        self.entries
            .lock()
            .expect("channel table mutex poisoned")
            .get(&stream_id)
            .map(|e| Arc::clone(&e.handle))
    }

    /// Registers a newly spawned channel's handle and its demodulator
    /// thread. Fails with *resource-exhaustion* if the table is already
    /// full, or *invalid-config* if `stream_id` is already in use (spec §7)
    /// — a running channel's thread and handle are left untouched rather
    /// than silently replaced.
    pub fn insert(&self, handle: Arc<ChannelHandle>, thread: JoinHandle<()>) -> Result<(), CoreError> {
        let mut entries = self.entries.lock().expect("channel table mutex poisoned");
        if entries.contains_key(&handle.stream_id) {
            return Err(CoreError::InvalidConfig(format!("duplicate stream ID {}", handle.stream_id)));
        }
        if entries.len() >= self.max_size {
            return Err(CoreError::ResourceExhaustion("channel table is full".to_string()));
        }
        entries.insert(
            handle.stream_id,
            Entry {
                handle,
                thread: Some(thread),
            },
        );
        Ok(())
    }

    /// Removes a channel past its idle-at-zero-frequency lifetime: sets
    /// *terminate*, joins its demodulator thread, then drops the table's
    /// own reference to its handle.
    pub fn remove(&self, stream_id: u32) {
        let entry = self.entries.lock().expect("channel table mutex poisoned").remove(&stream_id);
        if let Some(mut entry) = entry {
            entry.handle.terminate.store(true, Ordering::SeqCst);
            if let Some(thread) = entry.thread.take() {
                let _ = thread.join();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("channel table mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stream_ids(&self) -> Vec<u32> {
        self.entries.lock().expect("channel table mutex poisoned").keys().copied().collect()
    }

    /// Drops table entries whose demodulator thread has already exited on
    /// its own (spec §4.5's zero-frequency lifetime expiry), without
    /// blocking on threads still running. Called periodically by the
    /// command/status dispatch loop rather than from any channel thread
    /// itself, since a thread can't join its own handle.
    pub fn reap(&self) {
        let mut entries = self.entries.lock().expect("channel table mutex poisoned");
        let finished: Vec<u32> = entries
            .iter()
            .filter(|(_, e)| e.thread.as_ref().map(|t| t.is_finished()).unwrap_or(true))
            .map(|(id, _)| *id)
            .collect();
        for id in finished {
            if let Some(mut entry) = entries.remove(&id) {
                if let Some(thread) = entry.thread.take() {
                    let _ = thread.join();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcsdr_core::DemodKind;

    fn make_handle(stream_id: u32) -> Arc<ChannelHandle> {
        Arc::new(ChannelHandle::new(stream_id, DemodKind::Linear))
    }

    #[test]
    fn insert_and_lookup_round_trips() {
        let table = ChannelTable::new(4);
        let thread = std::thread::spawn(|| {});
        table.insert(make_handle(42), thread).unwrap();
        assert!(table.get(42).is_some());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn insert_fails_when_table_is_full() {
        let table = ChannelTable::new(1);
        table.insert(make_handle(1), std::thread::spawn(|| {})).unwrap();
        let err = table.insert(make_handle(2), std::thread::spawn(|| {})).unwrap_err();
        assert!(matches!(err, CoreError::ResourceExhaustion(_)));
    }

    #[test]
    fn remove_terminates_and_joins() {
        let table = ChannelTable::new(4);
        table.insert(make_handle(7), std::thread::spawn(|| {})).unwrap();
        table.remove(7);
        assert!(table.get(7).is_none());
    }

    #[test]
    fn insert_rejects_a_duplicate_stream_id_and_keeps_the_original() {
        let table = ChannelTable::new(4);
        table.insert(make_handle(9), std::thread::spawn(|| {})).unwrap();
        let err = table.insert(make_handle(9), std::thread::spawn(|| {})).unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
        assert_eq!(table.len(), 1);
        table.remove(9);
    }

    #[test]
    fn reap_drops_self_terminated_entries_but_not_running_ones() {
        let table = ChannelTable::new(4);
        // Finishes immediately on its own, like a zero-frequency lifetime
        // expiry (spec §4.5), with nobody calling `remove`.
        table.insert(make_handle(1), std::thread::spawn(|| {})).unwrap();

        let (_tx, rx) = std::sync::mpsc::channel::<()>();
        let still_running = std::thread::spawn(move || {
            let _ = rx.recv();
        });
        table.insert(make_handle(2), still_running).unwrap();

        // Give the first thread a chance to actually finish before reaping.
        std::thread::sleep(std::time::Duration::from_millis(20));
        table.reap();

        assert!(table.get(1).is_none());
        assert!(table.get(2).is_some());
        table.remove(2);
    }
}
