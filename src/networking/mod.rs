#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Networking: the peer HTTP client and the remote/local header caches
//! built on top of it.

pub mod local_cache;
pub mod peer_client;
pub mod remote_cache;
