pub mod csv;
pub mod memory;
pub mod state;
pub mod traits;

pub use self::csv::CsvEventSink;
pub use memory::MemorySink;
pub use traits::{EventSink, SinkError, SinkState};
