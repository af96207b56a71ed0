pub mod record;

pub use record::{NewRecordRow, RecordRow};
