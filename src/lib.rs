//! Relay that bulk-creates helpdesk tickets on behalf of a browser dashboard.
//!
//! The dashboard drives jobs over a WebSocket ([`server`]); each job runs the
//! sequential loop in [`jobs::worker`] against the helpdesk client in [`desk`].

pub mod config;
pub mod db;
pub mod desk;
pub mod jobs;
pub mod model;
pub mod server;
