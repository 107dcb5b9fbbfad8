//! Snipgate: a chat assistant core that proposes generated shell snippets and only runs
//! them after a human in the same thread replies `confirm`.

pub mod clock;
pub mod config;
pub mod io;
pub mod oracle;
pub mod persona;
pub mod router;
pub mod runtime;
pub mod snippet;
pub mod types;
