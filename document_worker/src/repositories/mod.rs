pub mod file_postgres_repository;
pub mod object_store_s3_repository;
