pub mod config;
pub mod event;
pub mod host;

pub use config::SerialConfig;
pub use event::{EventQueue, LogicalEvent};
pub use host::{BeamTiming, Interrupt, InterruptController, SchedulePolicy, Scheduler};

/// PAL colour clocks per scan line.
pub const PAL_LINE_CYCLES: u32 = 227;
/// PAL scan lines per (long) frame.
pub const PAL_FRAME_LINES: u32 = 313;
