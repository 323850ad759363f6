//! Durable attendance logging with an offline queue.
//!
//! A record is "captured" the moment it is either acknowledged by the
//! backend or persisted to the queue file; the kiosk shows the same
//! confirmation either way.

use rollcall_client::{AttendanceRecord, BackendClient, ClientError};
use std::path::PathBuf;

use crate::persist::{self, PersistError};

/// Backend seam for record submission.
pub trait AttendanceSink {
    fn submit(&self, record: &AttendanceRecord) -> Result<(), ClientError>;
}

impl AttendanceSink for BackendClient {
    fn submit(&self, record: &AttendanceRecord) -> Result<(), ClientError> {
        self.log_attendance(record).map(|_| ())
    }
}

/// How a captured record was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    /// Acknowledged by the backend immediately.
    Confirmed,
    /// Persisted to the offline queue for later flush.
    Queued,
}

/// Ordered pending records, mirrored to disk on every change.
pub struct OfflineQueue {
    path: PathBuf,
    records: Vec<AttendanceRecord>,
}

impl OfflineQueue {
    /// Load pending records from disk. A missing or corrupt file starts
    /// an empty queue; corruption is logged, not fatal.
    pub fn load(path: PathBuf) -> Self {
        let records = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<AttendanceRecord>>(&raw) {
                Ok(records) => {
                    if !records.is_empty() {
                        tracing::info!(
                            path = %path.display(),
                            pending = records.len(),
                            "loaded offline queue"
                        );
                    }
                    records
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "offline queue corrupt, starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        Self { path, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    fn persist(&self) -> Result<(), PersistError> {
        persist::atomic_write_json(&self.path, &self.records)
    }

    fn push(&mut self, record: AttendanceRecord) -> Result<(), PersistError> {
        self.records.push(record);
        self.persist()
    }
}

/// Submits records to the sink, queueing on any failure.
pub struct AttendanceLogger<S: AttendanceSink> {
    sink: S,
    queue: OfflineQueue,
}

impl<S: AttendanceSink> AttendanceLogger<S> {
    pub fn new(sink: S, queue: OfflineQueue) -> Self {
        Self { sink, queue }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Capture one record: immediate submit, or queue on any failure.
    /// The record is never dropped; if even the queue file cannot be
    /// written, it stays in memory and the write is retried on the next
    /// queue change.
    pub fn log(&mut self, record: AttendanceRecord) -> LogOutcome {
        match self.sink.submit(&record) {
            Ok(()) => {
                tracing::info!(
                    user_id = record.user_id,
                    class_id = record.class_id,
                    action = record.action.label(),
                    "attendance record confirmed"
                );
                LogOutcome::Confirmed
            }
            Err(e) => {
                tracing::warn!(
                    user_id = record.user_id,
                    action = record.action.label(),
                    error = %e,
                    "submission failed, queueing record"
                );
                if let Err(pe) = self.queue.push(record) {
                    tracing::error!(error = %pe, "failed to persist offline queue");
                }
                LogOutcome::Queued
            }
        }
    }

    /// Resubmit queued records in original order. Stops at the first
    /// failure so ordering is preserved. Each ack rewrites the queue
    /// file before the next submission; an abrupt stop mid-flush can
    /// never leave an acked record on disk to be resubmitted later.
    pub fn flush_queue(&mut self) -> usize {
        if self.queue.is_empty() {
            return 0;
        }

        let mut flushed = 0;
        while let Some(record) = self.queue.records.first() {
            match self.sink.submit(record) {
                Ok(()) => {
                    self.queue.records.remove(0);
                    flushed += 1;
                    if let Err(pe) = self.queue.persist() {
                        tracing::error!(error = %pe, "failed to persist offline queue after ack");
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, remaining = self.queue.len(), "flush stopped");
                    break;
                }
            }
        }

        if flushed > 0 {
            tracing::info!(flushed, remaining = self.queue.len(), "flushed offline queue");
        }

        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_client::{AttendanceAction, VerifiedBy};
    use std::cell::RefCell;

    /// Sink that fails for the first `fail_count` submissions, then
    /// records everything it accepts.
    struct FlakySink {
        fail_remaining: RefCell<usize>,
        accepted: RefCell<Vec<u64>>,
    }

    impl FlakySink {
        fn failing(n: usize) -> Self {
            Self {
                fail_remaining: RefCell::new(n),
                accepted: RefCell::new(Vec::new()),
            }
        }
    }

    impl AttendanceSink for FlakySink {
        fn submit(&self, record: &AttendanceRecord) -> Result<(), ClientError> {
            let mut remaining = self.fail_remaining.borrow_mut();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClientError::Decode("simulated outage".to_string()));
            }
            self.accepted.borrow_mut().push(record.user_id);
            Ok(())
        }
    }

    fn record(user_id: u64) -> AttendanceRecord {
        AttendanceRecord {
            user_id,
            class_id: 1,
            device_id: "KIOSK-1".to_string(),
            action: AttendanceAction::Entry,
            verified_by: VerifiedBy::Face,
            confidence_score: 0.9,
            gesture_detected: None,
            timestamp: "2026-01-05T08:05:00".to_string(),
            remarks: None,
        }
    }

    fn empty_queue(dir: &tempfile::TempDir) -> OfflineQueue {
        OfflineQueue::load(dir.path().join("offline_queue.json"))
    }

    #[test]
    fn test_online_submission_confirms() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = AttendanceLogger::new(FlakySink::failing(0), empty_queue(&dir));
        assert_eq!(logger.log(record(1)), LogOutcome::Confirmed);
        assert_eq!(logger.pending(), 0);
    }

    #[test]
    fn test_offline_durability() {
        // Three failed submissions queue exactly three records; a flush
        // after recovery drains them all in original order.
        let dir = tempfile::tempdir().unwrap();
        let mut logger = AttendanceLogger::new(FlakySink::failing(3), empty_queue(&dir));

        for id in [10, 11, 12] {
            assert_eq!(logger.log(record(id)), LogOutcome::Queued);
        }
        assert_eq!(logger.pending(), 3);

        let flushed = logger.flush_queue();
        assert_eq!(flushed, 3);
        assert_eq!(logger.pending(), 0);
        assert_eq!(*logger.sink.accepted.borrow(), vec![10, 11, 12]);
    }

    #[test]
    fn test_queue_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline_queue.json");

        {
            let queue = OfflineQueue::load(path.clone());
            let mut logger = AttendanceLogger::new(FlakySink::failing(2), queue);
            logger.log(record(7));
            logger.log(record(8));
        }

        let reloaded = OfflineQueue::load(path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.records()[0].user_id, 7);
    }

    #[test]
    fn test_flush_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = AttendanceLogger::new(FlakySink::failing(2), empty_queue(&dir));
        logger.log(record(1));
        logger.log(record(2));

        // Still failing: nothing leaves the queue, order intact.
        *logger.sink.fail_remaining.borrow_mut() = 1;
        assert_eq!(logger.flush_queue(), 0);
        assert_eq!(logger.pending(), 2);
        assert_eq!(logger.queue.records()[0].user_id, 1);

        // Recovered: everything drains.
        assert_eq!(logger.flush_queue(), 2);
        assert_eq!(logger.flush_queue(), 0);
    }

    /// Sink that acks a fixed number of submissions, then aborts the
    /// process path by panicking, standing in for a crash mid-flush.
    struct AbortingSink {
        acks_remaining: RefCell<usize>,
    }

    impl AttendanceSink for AbortingSink {
        fn submit(&self, _record: &AttendanceRecord) -> Result<(), ClientError> {
            let mut remaining = self.acks_remaining.borrow_mut();
            if *remaining == 0 {
                panic!("simulated crash during flush");
            }
            *remaining -= 1;
            Ok(())
        }
    }

    #[test]
    fn test_crash_mid_flush_does_not_resubmit_acked_record() {
        // The backend acks record 10, then the kiosk dies before it can
        // touch record 11. On restart the queue file must hold only the
        // unacked record; resubmitting 10 would duplicate it in the
        // server's log.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline_queue.json");
        std::fs::write(
            &path,
            serde_json::to_string(&vec![record(10), record(11)]).unwrap(),
        )
        .unwrap();

        let mut logger = AttendanceLogger::new(
            AbortingSink { acks_remaining: RefCell::new(1) },
            OfflineQueue::load(path.clone()),
        );
        assert_eq!(logger.pending(), 2);

        let crashed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            logger.flush_queue();
        }));
        assert!(crashed.is_err());

        let reloaded = OfflineQueue::load(path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.records()[0].user_id, 11);
    }

    #[test]
    fn test_corrupt_queue_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline_queue.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(OfflineQueue::load(path).is_empty());
    }
}
