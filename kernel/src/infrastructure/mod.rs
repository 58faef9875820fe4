//! Process-level plumbing shared by the library and the binary.

/// Structured audit events on the `audit` log target.
pub mod audit;
/// Layered configuration for the kernel.
pub mod config;
/// Router assembly, health probes and the serve loop.
pub mod server;
/// JSON logging and optional OTLP trace export.
pub mod telemetry;
