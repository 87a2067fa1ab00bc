//! # Utility Modules
//!
//! Supporting utilities for cryptography, logging, metrics and timing.
//!
//! ## Components
//! - **Crypto**: pluggable session cipher, XChaCha20-Poly1305 by default
//! - **Logging**: optional tracing-subscriber setup
//! - **Metrics**: per-handler atomic counters
//! - **Timeout**: async timeout wrappers and default durations
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom)
//! - Session key bytes are zeroed on drop (zeroize crate)

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod timeout;

pub use crypto::{SessionCipher, SessionKey, XChaChaCipher};
pub use logging::init_logging;
pub use metrics::{HandlerMetrics, MetricsSnapshot};
