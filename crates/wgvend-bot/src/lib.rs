//! wgvend-bot — chat-bot service for reviewed distribution of single-use
//! WireGuard configuration files.
//!
//! The service wires the domain core (`wgvend-core`) to a messaging
//! transport: one inbound-event channel feeds [`dispatch::Dispatcher`],
//! which processes events one at a time and owns all per-user session
//! state (dialogs, pending requests, list pagination, grant prompts).
//!
//! The bundled [`console::ConsoleGateway`] is a line-oriented local
//! transport for operation without a chat platform; platform adapters
//! implement the same `MessagingGateway` trait.

pub mod config;
pub mod console;
pub mod dispatch;
pub mod listing;
