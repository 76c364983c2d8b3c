//! Encoder dispatch layer
//!
//! Remote encoders hold one persistent TCP connection each. The server
//! module owns the sockets (accept loop, handshake, one supervisor task per
//! connection); the pool module owns the capacity bookkeeping and job
//! routing. Everything the rest of the orchestrator needs goes through
//! `EncoderDispatcher`.

pub mod pool;
pub mod server;

pub use pool::{AssignmentResult, DispatchError, DispatchHandle, EncoderDispatcher};
pub use server::EncoderServer;
