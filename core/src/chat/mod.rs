//! Chat log and its bridge to the gossip topic
//!
//! The [`MessageStore`] is the node's append-only chat history. The
//! [`TopicBridge`] feeds it from both directions: local submissions are
//! appended and then published, inbound gossip deliveries are appended
//! unless they are echoes of our own messages.

mod store;
mod bridge;

pub use store::{MessageStore, WELCOME_MESSAGE};
pub use bridge::{display_name_for_port, format_message, ChatError, Submission, TopicBridge};

#[cfg(test)]
mod tests;
