pub mod process_document_job;
