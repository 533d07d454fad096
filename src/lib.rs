//! # rfm69
//!
//! An async driver and link layer for HopeRF RFM69 sub-GHz packet radios
//! (RFM69W, RFM69HW, RFM69HCW) on top of `embedded-hal` and `tokio`.
//!
//! The crate is split in two layers:
//! - [`Rfm69`]: the device controller. Register access over an
//!   [`embedded_hal::spi::SpiDevice`], mode management with the PA side
//!   effects of high power modules, FIFO framing, RSSI, AES
//! - [`Router`]: the link layer. A single event loop that owns the
//!   controller, plus addressing, acknowledgements with retries and
//!   request/response correlation for any number of caller tasks
//!
//! ## Crate features
//! | Feature     | Description |
//! |-------------|-------------|
//! | `defmt-0-3` | Derives `defmt::Format` on the public data types |
//!
//! ## Protocol
//!
//! - One byte node addresses, `255` is broadcast
//! - One byte network id carried in the sync word
//! - Variable length frames of up to 66 payload bytes with CRC
//! - Optional AES-128 with a shared 16 byte key
//! - Acknowledgements are empty frames with the ack-reply flag set
//!
//! ## Usage
//!
//! ```no_run
//! # async fn demo<SPI, IRQ>(spi: SPI, irq: IRQ) -> rfm69::Result<()>
//! # where
//! #     SPI: embedded_hal::spi::SpiDevice + Send + 'static,
//! #     IRQ: rfm69::InterruptLine,
//! # {
//! use std::sync::Arc;
//! use rfm69::{RadioConfig, Router};
//!
//! let config = RadioConfig {
//!     encryption_key: b"sampleEncryptKey".to_vec(),
//!     ..RadioConfig::new(1, 100)
//! };
//! let router = Arc::new(Router::init(spi, irq, config).await?);
//!
//! let runner = Arc::clone(&router);
//! tokio::spawn(async move { runner.run().await });
//!
//! router.send_with_ack(2, b"hello").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Integration Notes
//!
//! - Configure the bus for 10 MHz, mode 0, 8 bit words
//!   ([`consts::SPI_FREQUENCY_HZ`], [`consts::SPI_MODE`])
//! - Wire DIO0 to a GPIO and implement [`InterruptLine`] for it
//! - The modem table targets 915 MHz at 19.2 kbps; every node on a network
//!   needs the same table, network id and key
//! - Nothing in the crate installs a logger; output goes through `log`

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces
)]

pub use heapless;

pub mod config;
pub mod consts;
pub mod driver;
pub mod error;
pub mod irq;
pub mod mode;
pub mod packet;
pub mod registers;
pub mod router;

#[cfg(test)]
mod testing;

pub use config::{Edge, RadioConfig};
pub use driver::Rfm69;
pub use error::{Error, Result};
pub use irq::InterruptLine;
pub use mode::Mode;
pub use packet::Packet;
pub use router::{RequestOptions, Router};
