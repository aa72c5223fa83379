//! A TFTP (RFC 1350) client/server core: wire codec, retry/backoff, and the
//! sender/receiver session state machines, plus a thin client facade and server
//! dispatcher built on top of them.

pub mod cli;
pub mod client;
pub mod server;
pub mod tftp;
