pub const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;
pub const MIN_MAX_UPLOAD_BYTES: u64 = 1024;
pub const MAX_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024 * 1024;
/// Signed cookies need at least 512 bits of key material.
pub const MIN_SESSION_KEY_BYTES: usize = 64;
pub const MAX_EXTENSION_LENGTH: usize = 16;
pub const PARTIAL_UPLOAD_DIR: &str = ".partial";
pub const UPLOAD_FIELD_NAME: &str = "file";
