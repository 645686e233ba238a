pub mod engine;
pub mod parser;

pub use engine::{merge_items, process, split_file, update_item, MergeReport, ProcessReport, SplitReport};
