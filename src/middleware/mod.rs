pub mod callback_source;
pub mod request_logger;

pub use callback_source::{guard_callback_source, CallbackSourcePolicy};
pub use request_logger::request_logger_middleware;
