pub mod memory_repository;
pub mod postgres_repository;
pub mod report_repository;
