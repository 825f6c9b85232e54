//! Shared building blocks for the telemon agent and server: the metric model,
//! wire DTOs, the retry policy and the security primitives.

pub mod dto;
pub mod retry;
pub mod security;
pub mod shutdown;
pub mod types;

pub mod proto {
    #![allow(clippy::pedantic)]
    #![allow(clippy::missing_errors_doc)]
    #![allow(clippy::doc_markdown)]
    #![allow(clippy::default_trait_access)]
    tonic::include_proto!("telemon");
}
