//! Base types and error handling.
//!
//! - [`NetError`](neterror::NetError): error codes shared by every module,
//!   numbered after Chromium's `net_error_list.h`
//! - [`context`]: helpers attaching DNS/connection context to IO errors

pub mod context;
pub mod neterror;
