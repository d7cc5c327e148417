//! Shared core of the alarm-clock controller: the cron schedule engine,
//! the alarm collection, the device state machine, and the wire types
//! for the serial link. Everything here is pure and side-effect free;
//! the controller binary owns all I/O.

pub mod alarm;
pub mod config;
pub mod cron;
pub mod device;
pub mod types;

pub use alarm::{Alarm, AlarmSet, NextFire};
pub use config::{ClockConfig, PlaybackConfig, RuntimeConfig, SerialConfig};
pub use cron::{CronExpr, ScheduleError};
pub use device::{DeviceEngine, EngineAction, TimerKind, TimerSet};
pub use types::{encode_state_frame, Button, DeviceState, OutputLines};
