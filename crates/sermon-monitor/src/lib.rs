//! # sermon – Monitor
//!
//! The monitor window logic, minus the window:
//!
//! - **Aggregator** – buffers decoded text and hands it to the display at a
//!   fixed rate, however bursty the input
//! - **Presence** – polls discovery once a second and suspends / resumes the
//!   session as the device disappears and comes back
//! - **History** – bounded command history with up / down / escape navigation
//! - **Display** – plain-text transcript and numeric plotter variants
//! - **Settings** – persisted monitor preferences and window placement
//! - **Serial monitor** – ties a `PortSession` to all of the above

pub mod monitor;
