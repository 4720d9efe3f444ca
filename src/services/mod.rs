pub mod account_service;
pub mod backoff;
pub mod correlation_service;
pub mod idle_watcher_service;
pub mod ingest_service;
pub mod message_store;
pub mod reply_service;
pub mod scheduler;
