pub mod aggregator;
pub mod display;
pub mod history;
pub mod presence;
pub mod serial_monitor;
pub mod settings;
pub mod task;

pub use aggregator::{UpdateAggregator, DEFAULT_DRAIN_PERIOD};
pub use display::{
    MonitorDisplay, PlotterDisplay, TextDisplay, DEFAULT_PLOT_WINDOW, DEFAULT_SCROLLBACK_LINES,
};
pub use history::{CommandHistory, DuplicatePolicy};
pub use presence::{
    ExclusiveFlag, ExclusiveOperation, PresenceAction, PresenceMonitor, PresenceTarget,
    DEFAULT_POLL_PERIOD,
};
pub use serial_monitor::{MonitorParts, SerialMonitor};
pub use settings::{MonitorSettings, Placement};
pub use task::PeriodicTask;
