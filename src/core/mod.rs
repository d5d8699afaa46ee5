pub mod cell;
pub mod epoch;
pub mod error;

pub use cell::{CellId, TCell};
pub use epoch::{EPOCH_CEILING, GlobalEpoch, VersionLock};
pub use error::{Conflict, Result, StmError, StmResult};
