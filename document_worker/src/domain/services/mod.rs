pub mod process_document;
pub mod reconcile_stale_files;
pub mod scratch_file;
