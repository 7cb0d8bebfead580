// Infrastructure layer - External dependencies and adapters
pub mod command_source;
pub mod config;
pub mod event_stream;
pub mod http_response;
pub mod sqlite_repository;
