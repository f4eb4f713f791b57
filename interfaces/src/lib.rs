pub mod defs;

pub use defs::{EntryRecord, LiveSourceSpec, RawRecord, TableCell, TableRow};
