//! Bibbl Log Stream — runtime pipeline engine.
//!
//! This crate is the hard core described in `SPEC_FULL.md`: source
//! lifecycles and per-source ring buffers, route matching, pipeline stage
//! execution (Versa KVP + Palo Alto CSV parsers, GeoIP/ASN enrichment, kv
//! filters, rewrites), and destination batching/retry/circuit-breaking/
//! spill. The HTTP/REST control plane, embedded web UI, provisioning
//! wizards and TLS auto-certificate generation are external collaborators
//! this crate never implements — it only defines the trait boundaries they
//! plug into.
//!
//! [`engine::Engine`] is the single entry point; everything else is a
//! private implementation detail reached only through it.

pub mod clock;
pub mod destinations;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod event;
pub mod filter_cache;
pub mod hub;
pub mod metrics;
pub mod model;
pub mod parsers;
pub mod redact;
pub mod ring_buffer;
pub mod routing;
pub mod sources;
pub mod spill;
pub mod stages;

pub use engine::{Engine, EngineConfig};
pub use error::EngineError;
pub use event::{Event, Value};
