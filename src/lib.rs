//! folklore: tracks kernel pull requests from the mailing-list archive and
//! mirrors their lifecycle into chat channels.

pub mod archive;
pub mod config;
pub mod error;
pub mod notify;
pub mod server;
pub mod store;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;
