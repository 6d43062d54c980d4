pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod reports;
pub mod routes;
pub mod storage;
