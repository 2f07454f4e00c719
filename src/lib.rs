//! Purpose: Library crate behind the `aristream` CLI: WebSocket event streams plus JSON helpers.
//! Exports: `api` (reactor, connection, request builder, errors), `json` (accessor helpers).
//! Role: Public surface for callers embedding the stream client on their own reactor.
//! Invariants: Connections complete on the reactor they are bound to; nothing crosses threads.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
mod core;
pub mod json;
