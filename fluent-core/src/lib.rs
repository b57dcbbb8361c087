//! # Azure Management Fluent Core
//!
//! Execution engine and HTTP resiliency layer shared by Azure management-plane
//! clients. Interdependent resource operations are expressed as a task graph
//! and run in dependency order; every outbound call goes through a policy
//! chain that recovers throttling, missing provider registrations and
//! cross-tenant authorization failures.
//!
//! ## Modules
//!
//! - [`dag`] - Task graph, batch root and external child resource collections
//! - [`http`] - Request/response types, transport and the policy pipeline
//! - [`policies`] - Provider registration, throttling, auxiliary auth, bearer token, pacing and logging
//! - [`resources`] - Provider directory, ETag state and a generic resource client
//! - [`auth`] - Token credentials and token caching
//! - [`config`] - Client configuration and standard pipeline assembly
//! - [`utils`] - Environment variable helpers
//! - [`common`] - Error types and the client-side rate limiter

pub mod auth;
pub mod common;
pub mod config;
pub mod dag;
pub mod http;
pub mod policies;
pub mod resources;
pub mod utils;
