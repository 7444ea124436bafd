//! Error type for the Notifier, the same shape as the teacher's
//! `notify::error::ChannelError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("SMTP transport error: {0}")]
    Transport(String),

    #[error("channel not configured: {0}")]
    NotConfigured(String),

    #[error("message build error: {0}")]
    Build(String),
}
