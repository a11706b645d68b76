mod chat;
mod protocol;

pub use chat::*;
pub use protocol::*;
