//! Downstream escalation channels beyond the dashboard broadcast.
//!
//! Only SMS exists today. A channel is a trait object so the router can be
//! exercised without a real gateway.

pub mod sms;

pub use sms::{HttpSmsGateway, SmsGateway, SmsMessage};
