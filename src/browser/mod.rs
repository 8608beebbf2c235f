//! Live driver backed by a Chrome/Chromium instance over the DevTools protocol

pub mod config;
pub mod session;

pub use config::{ConnectionOptions, LaunchOptions};
pub use session::BrowserSession;
