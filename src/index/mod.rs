pub mod posting;
pub mod inverted;
pub mod record_cache;
