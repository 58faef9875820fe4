//! Applet Kernel - control plane for applet plugins.
//!
//! This crate lets independently packaged applets expose callable RPC
//! methods, run queued and scheduled jobs, and exchange realtime events with
//! websocket clients, all multiplexed through one host process.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Host collaborators (identity, permissions) and shared engine state.
pub mod host;
/// Infrastructure components (config, server, telemetry, audit).
pub mod infrastructure;
/// Database-backed job store and runner.
pub mod jobs;
/// Method registry, request dispatch and the HTTP RPC surfaces.
pub mod rpc;
/// Work dispatch targets: native handlers and out-of-process applet runtimes.
pub mod runtime;
/// WebSocket bridge between live sockets and applets.
pub mod ws;
