#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Core primitives: the header codec, sector geometry, the KV store
//! wrapper and the shared expiry pruner.

pub mod header;
pub mod kv;
pub mod message;
pub mod pruner;
pub mod sector;
