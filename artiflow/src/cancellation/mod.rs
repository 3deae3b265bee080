//! Cancellation support.

mod token;

pub use token::CancellationToken;
