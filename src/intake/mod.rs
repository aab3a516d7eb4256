//! Intake Pollers — background loops that synthesize inbound activity
//! from non-chat sources.

pub mod mail;

pub use mail::spawn_mail_poller;
