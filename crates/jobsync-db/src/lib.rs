pub mod config;
pub mod database;
pub mod feed_repository;
pub mod job_repository;
pub mod run_repository;
pub mod task_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use feed_repository::FeedRepository;
pub use job_repository::JobRepository;
pub use run_repository::RunRepository;
pub use task_repository::TaskRepository;
