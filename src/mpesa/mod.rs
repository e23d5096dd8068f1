pub mod callback;
pub mod client;

pub use callback::{parse_callback, CallbackAck, CallbackError, ConfirmationEvent};
pub use client::{DarajaClient, GatewayError};
