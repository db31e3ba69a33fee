pub mod error;
pub mod key;
pub mod record;

pub use error::{Result, StoreError, is_not_found};
pub use key::Key;
pub use record::{HasTimestamps, Record, stamp};
