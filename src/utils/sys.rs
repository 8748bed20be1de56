/// Assumed size of a destructive-interference cache line. 64 bytes is correct
/// for effectively all current x86-64 and most aarch64 parts.
pub(crate) const CACHE_LINE_SIZE: usize = 64;
