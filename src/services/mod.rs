//! Per-service handles
//!
//! Every handle wraps a [`Scope`](crate::nimbus_api::client::Scope); its
//! operations validate identifiers, build the service URL, send the request
//! and decode the response.

pub mod action;
pub mod admin;
pub mod auth;
pub mod broadcast;
pub mod code;
pub mod context;
pub mod device;
pub mod documents;
pub mod eventhub;
pub mod locate;
pub mod mailbox;
pub mod metrics;
pub mod push;
pub mod query;
pub mod scope;
pub mod storage;
