//! telemon server: HTTP and gRPC ingestion of counters and gauges on top of
//! a pluggable [`telemon_storage::StorageEngine`].

pub mod api;
pub mod app;
pub mod config;
pub mod dump;
pub mod grpc;
pub mod logging;
pub mod middleware;
pub mod state;
pub mod usecase;
