//! # sohbet-shared
//!
//! Message model shared by the relay server and the history store: the
//! typed [`ChatMessage`], the hub-generated [`Notice`] frames, and the
//! constants both sides agree on.

pub mod constants;
pub mod error;
pub mod message;
pub mod notice;

pub use error::WireError;
pub use message::{Attachment, ChatMessage, Payload, ReplyRef};
pub use notice::Notice;
