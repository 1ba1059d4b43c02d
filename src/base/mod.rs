//! Base types and error handling.
//!
//! Provides foundational types mirroring Chromium's `net/base/`:
//! - [`NetError`](neterror::NetError): Network error codes matching `net_error_list.h`
//! - [`ConnectError`](neterror::ConnectError): The error surfaced by a failed connect
//! - [`context`]: `io::Error` to `NetError` conversion with endpoint context

pub mod context;
pub mod neterror;
