//! Database module for PostgreSQL persistence.

mod load;
mod op_log;
mod pool;
mod queue;
mod records;
mod sessions;

pub use load::load_store;
pub use op_log::{get_log_for_owner, insert_logged_op};
pub use pool::*;
pub use queue::{clear_queue, get_queue_for_device, upsert_queue_entry};
pub use records::{delete_record, expired_tombstones, get_record, get_records_for_owner, upsert_record};
pub use sessions::{delete_session, get_session, upsert_session};
