//! REST transport adapter for the InsTalk backend.
//!
//! Thin `reqwest` wrapper implementing [`instalk_core::Api`]. Every endpoint
//! answers with a `{code, message, data}` envelope; `code == 0` is success
//! and `data` carries the payload. The access token travels in the raw
//! `Authorization` header.

mod client;

pub use client::{Captcha, GroupUpdate, HttpApi, HttpApiConfig};
