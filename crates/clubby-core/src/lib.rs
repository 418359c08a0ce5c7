#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod call;
mod envelope;
mod error;
mod listener;
mod pending;
mod session;
mod state;
mod timeout;
mod transport;

pub use call::*;
pub use envelope::*;
pub use error::*;
pub use listener::*;
pub use session::*;
pub use state::*;
pub use timeout::*;
pub use transport::*;
