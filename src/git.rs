//! Git fast-export / fast-import interchange streams

pub mod fast_export;
pub mod fast_import;
mod quoting;
pub mod stream;
