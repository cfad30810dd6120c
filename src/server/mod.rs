// src/server/mod.rs
//! HTTP surface and the demo event producer

pub mod demo;
pub mod http;

pub use demo::{GuessGame, Hint};
pub use http::{CaptureServer, ResponseBody};
