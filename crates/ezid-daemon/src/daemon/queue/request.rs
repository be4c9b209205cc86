use ezid::{QueueEntry, QueueStatus};
use ezid_daemon_core::Result;
use tokio::sync::oneshot;

/// How a worker left a row: the status it wrote, or why it could not write
/// one.
pub type RowOutcome = Result<QueueStatus>;

/// Messages sent from a destination's coordinator to its workers.
#[derive(Debug)]
pub enum WorkRequest {
    /// Dispatch a claimed row to the destination and record the result.
    Process {
        entry: QueueEntry,
        response: oneshot::Sender<RowOutcome>,
    },
    /// Ask the destination about a row awaiting an asynchronous result.
    Poll {
        entry: QueueEntry,
        response: oneshot::Sender<RowOutcome>,
    },
    /// Finish the current row, acknowledge, and stop.
    Shutdown { response: oneshot::Sender<()> },
}
