//! The block-segmented append log.
//!
//! Every record gets a permanent id, `block * block_size + offset`, which is
//! also its disk address. Blocks are appended to until the next record would
//! not fit, then sealed.

mod record;
mod scan;
mod store;

pub use record::{
    block_header, check_block_header, encode_record, read_record, zero_run, RecordRead,
    FORMAT_VERSION, HEADER_SIZE, MAGIC, RECORD_OVERHEAD,
};
pub use scan::LogScanner;
pub use store::BlockStore;

use imstore_codec::Message;

use crate::error::CoreResult;

/// Random access to log records by id.
pub trait RecordSource {
    /// Loads the record at `id`, `None` if it is missing or invalid.
    fn load(&mut self, id: i64) -> CoreResult<Option<Message>>;
}
