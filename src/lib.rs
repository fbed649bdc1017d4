// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! shardmesh - a federated store-and-forward server for opaque,
//! fixed-format encrypted messages.
//!
//! A node mirrors the header index of every peer it federates with (the
//! remote and local header caches), then keeps a sector-bounded subset
//! of the actual message bodies on disk (the message store), fetching
//! bodies lazily from whichever peer holds them. Expired headers and
//! bodies are pruned on a timer; there is no notion of message content,
//! ownership or delivery beyond proof-of-work-gated storage.

/// Wire format, KV primitives, ring-sector geometry and expiry pruning
/// shared by every cache and store in this crate.
pub mod core;
/// Node configuration.
pub mod config;
/// The federation-facing HTTP API and Prometheus exposition.
pub mod http;
/// Observability: Prometheus metrics.
pub mod monitoring;
/// Remote/local header caches and the peer HTTP client.
pub mod networking;
/// The message store and its download worker pool.
pub mod store;
