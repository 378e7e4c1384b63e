//! h1-trailers - HTTP/1.1 application server with response trailer support
//!
//! Drives an application through a request/response event protocol over
//! pipelined, keep-alive HTTP/1.1 connections, including trailer fields sent
//! after a chunked body.

pub mod app;
pub mod config;
pub mod error;
pub mod http;
pub mod server;
