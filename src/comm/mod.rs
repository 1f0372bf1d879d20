//! Shared resources of the async communication engine.

pub mod hmac;
pub mod server_mutex;
pub mod session;

pub use hmac::{HmacKeys, HmacTarget, HMAC_SHA256_KEY_MAX_LEN};
pub use server_mutex::{HttpServerLock, HttpServerMutex};
pub use session::{AsyncSession, Busy, SessionPermit};
