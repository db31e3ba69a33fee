pub mod conditions;
pub mod cursor;

pub use conditions::{Condition, Conditions};
pub use cursor::{Cursor, CursorCodec, CursorOrder};
