// Application layer - Use cases and the ports they depend on
pub mod curve;
pub mod parser;
pub mod reading_repository;
pub mod reading_service;
pub mod resampler;
pub mod sample_source;
pub mod sampler;
pub mod statistics;
