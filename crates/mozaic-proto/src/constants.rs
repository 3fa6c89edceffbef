/// Maximum encoded size of a frame length prefix.
///
/// Lengths are unsigned LEB128 varints holding a `u32`, so 5 bytes at most.
pub const MAX_VARINT_LEN: usize = 5;

/// Maximum size of a single frame body, in bytes.
/// This limit is enforced to avoid unbounded allocations.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Initial capacity of a receive buffer.
pub const RX_BUFFER_CAPACITY: usize = 8 * 1024;

/// Bytes reserved in the receive buffer before every socket read.
pub const RX_READ_RESERVE: usize = 4096;

/// Client id under which global (server-originated) events are logged.
pub const GLOBAL_CLIENT_ID: u32 = 0;
