pub mod pipeline;

pub use pipeline::{run_ingest_loop, Ingestor};
