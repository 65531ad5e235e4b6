//! # sermon – Serial
//!
//! Serial port plumbing for the interactive console:
//!
//! - **Types** – port configuration (rate / parity / data bits / stop bits /
//!   RTS / DTR), session state, line endings, text encodings
//! - **Decoder** – incremental byte → text decoding that survives characters
//!   split across hardware reads
//! - **Transport** – the `SerialTransport` seam with a `serialport`-backed
//!   system implementation and an in-memory simulated bus
//! - **Discovery** – device enumeration and presence lookup by address
//! - **Session** – open / write / close / dispose lifecycle with
//!   suspend / resume and asynchronous decoded-text delivery
//! - **Reset** – the 1200-baud "touch" that kicks some boards into their
//!   bootloader

pub mod serial;
