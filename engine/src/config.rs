//! Re-exports the resolved config types owned by `push-config`, so call
//! sites in this crate can reach them as `crate::config::*`.

pub use push_config::*;
