//! Google Calendar source for locsync.
//!
//! Talks to the Calendar v3 REST API directly with `reqwest`. The access
//! token is derived from a stored refresh token, which `consent::authorize`
//! obtains once through the browser.

pub mod api;
pub mod config;
pub mod consent;
pub mod convert;
pub mod session;
pub mod types;

pub use api::GoogleCalendar;
pub use config::GoogleSettings;
