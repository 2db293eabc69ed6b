mod handler;
pub mod model;

pub use handler::{create_item, find_by_id, find_nearby, find_trending, recompute_popularity};
