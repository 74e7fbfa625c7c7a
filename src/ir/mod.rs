// src/ir/mod.rs
//! Intermediate representation of captured traffic
//!
//! - **Types**: request/response/record schema and its JSON contract
//! - **Reader**: read-back of NDJSON, gzip NDJSON and batch files

pub mod reader;
pub mod types;

pub use reader::{open_ndjson, read_batch, read_bytes, read_file, read_ndjson, NdjsonReader};
pub use types::{
    Batch, BatchMetadata, HeaderMap, IrRecord, QueryMap, QueryValue, RecordSource, Request,
    RequestMethod, Response, IR_VERSION,
};
