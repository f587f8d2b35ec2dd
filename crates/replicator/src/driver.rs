//! The top-level replication loop: periodic outbound pushes, draining
//! completed inbound sessions, and reconciling the result into the local
//! log. Grounded on `examples/original_source/src/ReplServer.cpp`'s
//! `replicate()`/`queueNewPlots()`/`addReplDronePlots()`, rebuilt over
//! `driftwatch-net`'s `QueueManager` instead of a hand-rolled socket set,
//! and on the teacher's `gamecore::replicator::Replicator` for the "a single
//! driver system owns one tick of the outside world" shape — this daemon has
//! no ECS to hang that tick off of, so it becomes its own cooperative loop.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use driftwatch_net::QueueManager;
use driftwatch_proto::error::ProtoResult;
use driftwatch_proto::logging::{info, o, warn, Logger};
use driftwatch_proto::record::{RecordBatch, SightingRecord};

use crate::error::ReconcileError;
use crate::reconcile::reconcile;
use crate::store::PlotStore;

/// Adjusted-time interval between outbound replication pushes.
pub const REPL_INTERVAL_SECS: f64 = 20.0;

/// Sleep between loop iterations, capping CPU use in the cooperative model.
const LOOP_SLEEP: Duration = Duration::from_millis(1);

pub struct Replicator {
    store: PlotStore,
    queue: QueueManager,
    node_id: u32,
    start_time: Instant,
    offset_secs: f64,
    time_mult: f64,
    last_repl: f64,
    shutdown: Arc<AtomicBool>,
    log: Logger,
}

impl Replicator {
    pub fn new(node_id: u32, queue: QueueManager, offset_secs: f64, time_mult: f64, log: Logger) -> Self {
        let mut replicator = Replicator {
            store: PlotStore::new(),
            queue,
            node_id,
            start_time: Instant::now(),
            offset_secs,
            time_mult,
            last_repl: 0.0,
            shutdown: Arc::new(AtomicBool::new(false)),
            log: log.new(o!("component" => "replicator")),
        };
        replicator.last_repl = replicator.adjusted_now();
        replicator
    }

    /// A clone of the shutdown flag, for wiring a signal handler.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Flips the cooperative shutdown flag; the running loop observes it at
    /// the top of its next iteration.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn store(&self) -> &PlotStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut PlotStore {
        &mut self.store
    }

    pub fn queue_mut(&mut self) -> &mut QueueManager {
        &mut self.queue
    }

    /// Records a sighting witnessed locally: `node_id` is always this
    /// node's own id and `is_new` is always set, per spec.md §3's invariant.
    pub fn observe(&mut self, drone_id: u32, timestamp: u64, lat: f64, lon: f64) {
        self.store.append(SightingRecord::new(drone_id, self.node_id, timestamp, lat, lon));
    }

    /// `adjusted_now() = (wall_now - start_time) * time_mult`, with
    /// `start_time` shifted by the CLI's `--offset` the way the original
    /// does (`_start_time = time(NULL) + offset`).
    pub fn adjusted_now(&self) -> f64 {
        (self.start_time.elapsed().as_secs_f64() - self.offset_secs) * self.time_mult
    }

    /// Runs the cooperative loop until [`Replicator::shutdown`] is called.
    /// In-flight sessions are dropped, not gracefully torn down, matching
    /// spec.md §5's "sessions in mid-handshake are abandoned" cancellation
    /// model.
    pub fn run(&mut self) -> io::Result<()> {
        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.tick() {
                warn!(self.log, "queue pump failed"; "error" => %e);
            }
            std::thread::sleep(LOOP_SLEEP);
        }
        Ok(())
    }

    /// One iteration of the loop body, exposed separately so tests can
    /// drive it without the real sleep or a running listener.
    pub fn tick(&mut self) -> ProtoResult<()> {
        self.queue.pump()?;

        if self.adjusted_now() - self.last_repl >= REPL_INTERVAL_SECS {
            let n = marshal_and_broadcast_new_plots(&mut self.store, &mut self.queue);
            if n > 0 {
                info!(self.log, "replicated new sightings"; "count" => n);
            }
            self.last_repl = self.adjusted_now();
        }

        while let Some(inbound) = self.queue.pop() {
            if let Err(e) = ingest_replicated_payload(&mut self.store, &inbound.payload) {
                warn!(self.log, "dropping malformed replication payload";
                    "peer" => inbound.peer_node_id, "error" => %e);
            }
        }

        Ok(())
    }
}

/// Scans the log for records still flagged `NEW`, marshals them into a
/// count-prefixed batch, clears their flags, and hands the batch to the
/// queue manager for broadcast. Returns how many records were sent.
///
/// A record sent over the wire never carries `NEW` — that bit is purely
/// local bookkeeping for "has this node pushed this yet", and spec.md §3's
/// invariant requires incoming records arrive with it clear.
pub fn marshal_and_broadcast_new_plots(store: &mut PlotStore, queue: &mut QueueManager) -> usize {
    let outgoing: Vec<SightingRecord> = store
        .iter()
        .filter(|record| record.is_new)
        .map(|record| {
            let mut wire_record = *record;
            wire_record.is_new = false;
            wire_record
        })
        .collect();

    if outgoing.is_empty() {
        return 0;
    }

    for record in store.iter_mut() {
        record.is_new = false;
    }

    let payload = RecordBatch::marshal(&outgoing);
    queue.broadcast(&payload);
    outgoing.len()
}

/// Validates, deserializes, and folds a replicated batch into the log, then
/// triggers a reconciliation pass. The whole payload is rejected if
/// malformed — partial ingests are forbidden (spec.md §7).
pub fn ingest_replicated_payload(store: &mut PlotStore, data: &[u8]) -> Result<usize, ReconcileError> {
    let records = RecordBatch::unmarshal(data).map_err(|_| ReconcileError::MalformedBatch)?;

    for mut record in records.iter().copied() {
        record.is_new = false;
        store.append(record);
    }
    let count = records.len();

    reconcile(store);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftwatch_proto::logging::discard;

    fn test_queue(node_id: u32) -> QueueManager {
        QueueManager::new(node_id, [0u8; 16], discard()).unwrap()
    }

    #[test]
    fn marshal_collects_only_new_records_and_clears_flags() {
        let mut store = PlotStore::new();
        store.append(SightingRecord::new(1, 7, 100, 1.0, 2.0));
        let mut already_sent = SightingRecord::new(2, 7, 200, 3.0, 4.0);
        already_sent.is_new = false;
        store.append(already_sent);

        let mut queue = test_queue(7);
        let n = marshal_and_broadcast_new_plots(&mut store, &mut queue);
        assert_eq!(n, 1);
        assert!(store.iter().all(|r| !r.is_new), "NEW must clear after replication");
    }

    #[test]
    fn marshal_with_nothing_new_broadcasts_nothing() {
        let mut store = PlotStore::new();
        let mut record = SightingRecord::new(1, 7, 100, 1.0, 2.0);
        record.is_new = false;
        store.append(record);

        let mut queue = test_queue(7);
        assert_eq!(marshal_and_broadcast_new_plots(&mut store, &mut queue), 0);
    }

    /// S6: a too-short buffer and a short-count-but-missing-data buffer are
    /// both rejected wholesale, with the store untouched.
    #[test]
    fn ingest_rejects_undersized_payload() {
        let mut store = PlotStore::new();
        let err = ingest_replicated_payload(&mut store, &[0u8; 3]);
        assert_eq!(err, Err(ReconcileError::MalformedBatch));
        assert!(store.is_empty());
    }

    #[test]
    fn ingest_rejects_count_exceeding_available_data() {
        let mut store = PlotStore::new();
        let mut buf = 2u32.to_le_bytes().to_vec();
        buf.extend(std::iter::repeat(0u8).take(SightingRecord::WIRE_SIZE));
        let err = ingest_replicated_payload(&mut store, &buf);
        assert_eq!(err, Err(ReconcileError::MalformedBatch));
        assert!(store.is_empty());
    }

    #[test]
    fn ingest_applies_reconciliation() {
        let mut store = PlotStore::new();
        store.append(SightingRecord::new(1, 10, 100, 40.0, -74.0));

        let incoming = vec![SightingRecord::new(1, 11, 103, 40.001, -74.0)];
        let batch = RecordBatch::marshal(&incoming);
        let n = ingest_replicated_payload(&mut store, &batch).unwrap();
        assert_eq!(n, 1);

        // The duplicate should have collapsed into the priority node (10).
        assert_eq!(store.len(), 1);
        assert_eq!(store.iter().next().unwrap().node_id, 10);
    }
}
