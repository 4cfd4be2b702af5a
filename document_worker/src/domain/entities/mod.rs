pub mod file_record;
pub mod markdown_content;
pub mod process_outcome;
