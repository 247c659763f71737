//! Core domain logic for reviewed issuance of single-use WireGuard
//! configuration artifacts.
//!
//! The crate models four collaborating parts:
//! - [`pool::FilePool`]: available/reserved/used artifact pools on disk
//! - [`ledger::IssuanceLedger`]: durable `SQLite` record of every issuance
//! - [`admin::AdminDirectory`]: additive set of administrator IDs
//! - [`workflow`]: the request/approval state machine and the fast-issue path
//!
//! The chat transport is abstracted behind [`gateway::MessagingGateway`];
//! the crate never talks to a messaging platform directly. Inbound traffic
//! arrives as [`gateway::InboundEvent`] values and all mutable state is
//! guarded for multi-threaded hosts.

pub mod admin;
pub mod gateway;
pub mod ledger;
pub mod pool;
pub mod workflow;
