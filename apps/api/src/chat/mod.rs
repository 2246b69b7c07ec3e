//! Career-buddy chat: one-shot replies and SSE streaming.

pub mod handlers;
