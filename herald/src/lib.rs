//! The herald push notification dispatcher
//!
//! Loads a RON configuration, runs a [`MessageDistributor`](herald_delivery::MessageDistributor)
//! for every configured protocol and feeds it push requests read as
//! newline-delimited JSON.

pub mod config;
pub mod controller;
pub mod request;

pub use controller::Herald;
