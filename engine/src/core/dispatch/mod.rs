//! Batch Dispatch Module
//!
//! Delivers windowed batches to the two downstream consumers: the filtered
//! notification sink and the unfiltered analytical table.

mod fanout;
mod notification;
mod table;

pub use fanout::{BatchFanOut, BatchReceiver};
pub use notification::{
    DeliveryPayload, DispatchOutcome, EntityMatch, NotificationSink, ResponseDispatcher,
    ResponseFilter,
};
pub use table::{
    TableRow, TableSink, TableSinkWriter, TableWriterConfig, DEFAULT_MAX_ROWS_PER_INSERT,
};
