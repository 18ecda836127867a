//! Accounts server: user accounts behind an RPC interceptor pipeline, backed
//! by a SQL or in-memory store and a durable background task queue.

pub mod config;
pub mod mailer;
pub mod network;
pub mod oauth;
pub mod objects;
pub mod security;
pub mod service;
pub mod store;
pub mod tasks;
