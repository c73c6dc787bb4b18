//! # Querygate Architecture
//!
//! Querygate is a **declarative resource gateway**. An entity is described once
//! (filterable fields per API version, sort whitelist, pagination mode, cache
//! policy, actions, policy) and the gateway serves a versioned, filtered,
//! paginated read endpoint plus a set of write and transition actions for it.
//! No per-entity query or routing code is written by hand.
//!
//! It is a library that happens to have a CLI client, not the other way round.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Transport (querygate-cli, or any HTTP router)              │
//! │  - Parses requests, renders responses and error envelopes   │
//! │  - The ONLY place that knows about stdout/exit codes/HTTP   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Gateway Facade (gateway.rs)                                │
//! │  - list / execute / routes                                  │
//! │  - Composes registry, repository, cache and configuration   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Engine                                                     │
//! │  - version.rs: date-based version resolution                │
//! │  - filter/: clause validation, predicates, raw filters      │
//! │  - pagination.rs: offset and keyset cursors                 │
//! │  - cache.rs: result cache with namespace invalidation       │
//! │  - action/: the staged action pipeline and built-ins        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Storage Layer (store/)                                     │
//! │  - Abstract Repository trait over structural queries        │
//! │  - MemoryRepository (CLI, tests)                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Principle: Configuration Is Data
//!
//! Entities are [`registry::EntityDescriptor`] values built at startup with a
//! builder and frozen behind `Arc`. Filter fields, operators, raw filters,
//! rules and handlers are all plain values, so one generic engine serves every
//! entity and a whole configuration can be inspected and tested directly.
//!
//! ## No I/O Assumptions in Core
//!
//! Everything in this crate takes Rust values and returns `Result`s. It never
//! prints, never exits and never assumes a terminal or an HTTP server. Errors
//! carry a stable `code()` and an HTTP-like `status()` so transports can
//! render them uniformly.
//!
//! ## Testing Strategy
//!
//! 1. **Engine modules**: unit tests next to the code, on small hand-built
//!    descriptors and a [`store::memory::MemoryRepository`].
//! 2. **Blog domain** (`blog/`): unit tests of state transitions and policies.
//! 3. **Gateway**: integration tests in `tests/` drive the full blog
//!    configuration through [`gateway::Gateway`].
//!
//! ## Module Overview
//!
//! - [`gateway`]: the facade; entry point for every operation
//! - [`registry`]: entity descriptors and their builder
//! - [`spec`]: filter fields, value rules and version specs
//! - [`version`]: version resolution
//! - [`filter`]: filter clause evaluation and raw filters
//! - [`query`]: structural predicates and queries
//! - [`pagination`]: page sizes, cursors and page metadata
//! - [`cache`]: result cache
//! - [`action`]: action descriptors, pipeline and built-ins
//! - [`validation`]: payload rules
//! - [`policy`]: authorization seam
//! - [`projection`]: select-list output shaping
//! - [`slug`]: slugs and unique-slug probing
//! - [`store`]: repository abstraction and in-memory implementation
//! - [`model`]: records, actors, field paths
//! - [`config`]: configuration management
//! - [`error`]: error types
//! - [`blog`]: the bundled blog domain

pub mod action;
pub mod blog;
pub mod cache;
pub mod config;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod model;
pub mod pagination;
pub mod policy;
pub mod projection;
pub mod query;
pub mod registry;
pub mod slug;
pub mod spec;
pub mod store;
pub mod validation;
pub mod version;

pub use action::{ActionContext, ActionDescriptor, ActionRequest, ActionResponse, Method};
pub use config::GatewayConfig;
pub use error::{ErrorEnvelope, GatewayError, Result};
pub use gateway::{Gateway, ListRequest, ListResponse, RouteDescriptor};
pub use model::{Actor, Record};
pub use registry::{EntityDescriptor, Registry};
