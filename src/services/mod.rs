//! Background services that run alongside the HTTP server.

pub mod cleanup;
