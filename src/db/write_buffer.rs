//! Write buffer for async batch inserts
//!
//! Visit and click events are sent to a channel and flushed to the database
//! in batches, so request handlers never wait on a write. Rows that cannot be
//! written are logged and dropped: analytics is best-effort.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Database, EventRecord};

/// Sender handle for queueing events
pub type WriteSender = mpsc::UnboundedSender<EventRecord>;

const BATCH_SIZE: usize = 100;
const FLUSH_INTERVAL_MS: u64 = 250;

/// Start the write buffer background task.
/// The task drains and exits once every sender has been dropped.
pub fn start_write_buffer(db: Arc<Database>) -> (WriteSender, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(write_buffer_task(db, rx));

    (tx, handle)
}

/// Background task that collects events and writes them in batches
async fn write_buffer_task(db: Arc<Database>, mut rx: mpsc::UnboundedReceiver<EventRecord>) {
    let mut buffer: Vec<EventRecord> = Vec::with_capacity(BATCH_SIZE);
    let period = tokio::time::Duration::from_millis(FLUSH_INTERVAL_MS);
    // First tick one period out; an immediate tick would split the first burst
    let mut flush_interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    info!(
        "Write buffer started (batch_size={}, flush_interval={}ms)",
        BATCH_SIZE, FLUSH_INTERVAL_MS
    );

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(e) => {
                        buffer.push(e);
                        if buffer.len() >= BATCH_SIZE {
                            flush_batch(&db, &mut buffer).await;
                        }
                    }
                    None => {
                        // Channel closed, flush remaining and exit
                        if !buffer.is_empty() {
                            flush_batch(&db, &mut buffer).await;
                        }
                        info!("Write buffer shutting down");
                        break;
                    }
                }
            }
            // Periodic flush for low-traffic periods
            _ = flush_interval.tick() => {
                if !buffer.is_empty() {
                    flush_batch(&db, &mut buffer).await;
                }
            }
        }
    }
}

/// Flush buffered events to database in a single transaction.
/// A failed transaction is replayed one row at a time so only the rows that
/// fail on their own are dropped.
async fn flush_batch(db: &Database, buffer: &mut Vec<EventRecord>) {
    let count = buffer.len();
    debug!("Flushing {} events to database", count);

    match db.batch_insert_events(buffer).await {
        Ok(_) => {
            debug!("Successfully flushed {} events", count);
        }
        Err(e) => {
            warn!("Batch of {} events failed, retrying row by row: {:#}", count, e);
            let mut dropped = 0;
            for record in buffer.iter() {
                if let Err(e) = db.insert_event(record).await {
                    dropped += 1;
                    error!("Dropping event {}: {:#}", record.id(), e);
                }
            }
            if dropped > 0 {
                error!("Dropped {} of {} events", dropped, count);
            }
        }
    }

    buffer.clear();
}
