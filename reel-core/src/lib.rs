//! Reel Core
//!
//! Core types and abstractions for the Reel media pipeline system.
//!
//! This crate contains:
//! - Domain types: Core business entities (MediaRequest, PipelineTemplate,
//!   PipelineExecution, EncodingAssignment, etc.)
//! - DTOs: Data transfer objects for the orchestrator API
//! - Protocol: the line-delimited encoder wire protocol
//!
//! Note: Persistence logic lives in the orchestrator, transcode execution in
//! the encoder.

pub mod domain;
pub mod dto;
pub mod protocol;
