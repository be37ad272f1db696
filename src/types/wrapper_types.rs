//! Common type aliases used across the crate.

use std::future::Future;
use std::pin::Pin;

/// A boxed, pinned, send-safe future.
///
/// Used where an async function must recurse, as ZIPMAP evaluation does.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
