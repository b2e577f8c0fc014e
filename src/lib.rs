//! An [`embedded-hal`]-based driver for AT45 "DataFlash" chips.
//!
//! DataFlash parts have two on-chip SRAM buffers in front of the main page
//! array. This crate uses them as a ping-pong pipeline: while one buffer is
//! being programmed into a page, the host keeps streaming bytes into the other
//! one, so sequential writes never stall on a read-modify-erase cycle.
//!
//! Two layers are provided:
//!
//! * [`DataFlash`] drives a single chip: the sequential write/read engine plus
//!   the random-access buffer, page and erase commands.
//! * [`Stripe`] round-robins whole pages over a fixed set of chips sharing one
//!   SPI bus and presents them as a single sequential stream.
//!
//! All bus traffic goes through a [`Bus`], which owns the SPI master, makes
//! sure at most one chip-select is asserted at a time and bounds every
//! ready-poll with a [`WaitPolicy`].
//!
//! [`embedded-hal`]: https://docs.rs/embedded-hal/

#![doc(html_root_url = "https://docs.rs/dataflash/0.1.0")]
#![warn(missing_debug_implementations, rust_2018_idioms)]
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;
pub mod address;
pub mod command;
pub mod config;
pub mod dataflash;
mod error;
pub mod prelude;
pub mod stripe;
pub mod transport;

#[cfg(test)]
mod sim;

pub use crate::config::{Commit, Config, ConfigError};
pub use crate::dataflash::{Buffer, DataFlash};
pub use crate::error::Error;
pub use crate::stripe::Stripe;
pub use crate::transport::{Bus, Cancellable, Delayed, PollAction, Spin, WaitPolicy};
