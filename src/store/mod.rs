#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! The message store and its worker pool.

pub mod message_store;
