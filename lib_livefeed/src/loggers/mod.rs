/// File-backed broadcast log sink.
pub mod broadcast_log;

pub use broadcast_log::FileLogSink;
