//! Customer churn analysis server
//!
//! Users sign up through emailed verification codes, log in, and upload audio, tabular and chat
//! files about a customer. Each upload runs through the analysis [`inference::Pipeline`] and the
//! merged result is mailed to the administrators.

pub(crate) mod auth;
pub mod captcha;
pub mod clock;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod db;
pub mod error;
pub(crate) mod handlers;
pub mod inference;
pub mod notify;
pub mod otp;
pub mod rate_limit;
pub mod server;
pub(crate) mod utils;
