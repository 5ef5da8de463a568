//! Workflow services layered between the HTTP handlers and persistence

pub mod envelopes;
pub mod lifecycle;
pub mod mailer;
pub mod pdf;
pub mod renderer;
pub mod signing;
pub mod tokens;
pub mod webhooks;
