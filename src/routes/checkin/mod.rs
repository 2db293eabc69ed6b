mod handler;
pub mod model;

pub use handler::{create_check_in, check_out, find_user_check_ins};
