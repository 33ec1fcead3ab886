//! Transit feed ingestion and route geometry engine.
//!
//! Pulls GTFS-Realtime feeds on a schedule, classifies service alerts,
//! serves per-route status and station arrivals from an atomically swapped
//! snapshot, and computes offset polylines for routes sharing track.

pub mod analyzers;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod geometry;
pub mod infra;
pub mod model;
pub mod output;
pub mod parser;
pub mod query;
pub mod services;
pub mod stats;

pub use query::{Cached, TransitEngine};

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
