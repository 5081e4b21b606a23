// Redo log on-disk format
//
// Block framing, record encoding, checkpoint slots and access to the
// physical log files. Everything here is shared by the recovery pipeline
// and the fixture writer.

pub mod checkpoint;
pub mod files;
pub mod format;
pub mod record;
pub mod writer;

pub use checkpoint::{find_max_checkpoint, Checkpoint, CheckpointField};
pub use files::{LogFileError, LogFiles};
pub use record::{RecordType, RedoRecord};
pub use writer::{LogWriter, MtrBuilder};
