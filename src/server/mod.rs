pub mod constants;
pub mod handlers;
pub mod router;
pub mod utils;
