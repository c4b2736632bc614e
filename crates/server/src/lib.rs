//! # bc-server
//!
//! HTTP front-end for the benchctl controller: one endpoint per controller
//! operation, JSON in and out, multipart upload for project files.

pub mod routes;
