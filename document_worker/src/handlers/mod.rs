pub mod handler_process_document_job;
pub mod stale_files_sweeper;
