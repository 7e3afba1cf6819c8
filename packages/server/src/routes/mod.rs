pub mod chat;
pub mod health;
pub mod images;

pub use chat::{chat_complete_handler, chat_stream_handler};
pub use health::health_handler;
pub use images::image_search_handler;
