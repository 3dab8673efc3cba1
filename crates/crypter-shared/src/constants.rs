/// Application name
pub const APP_NAME: &str = "Crypter";

/// Default page size for paginated reads
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// HTTP statuses treated as timeouts (served from cache instead of failing)
pub const TIMEOUT_STATUSES: [u16; 2] = [408, 504];

/// Content type assumed when a message arrives without one
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Default REST API base URL
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Default HTTP request timeout in seconds
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// How long an orphaned read receipt is kept waiting for its message
pub const DEFAULT_PENDING_READ_TTL_SECS: u64 = 300;

/// Capacity of the store change broadcast channel
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// X25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Poly1305 tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Key derivation context (BLAKE3) for per-recipient key wrapping
pub const KDF_CONTEXT_WRAP_KEY: &str = "crypter-wrap-key-v1";
