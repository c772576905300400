//! Network transport: wire protocol, server-side session plumbing, and the
//! display-client helpers.

pub mod client;
pub mod protocol;
pub mod server;
