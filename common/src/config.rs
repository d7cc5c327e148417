use serde::{Deserialize, Serialize};

pub const KQED_STREAM_URL: &str = "https://streams2.kqed.org/kqedradio";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    pub sleep_duration_ms: u64,
    pub snooze_duration_ms: u64,
    pub alarm_duration_ms: u64,
    pub emit_interval_ms: u64,
    pub tick_interval_ms: u64,
    /// Whether the buzzer line goes high during ALARM. Individual alarms
    /// may override this with a `,0` / `,1` save-line suffix.
    pub alarm_buzzer: bool,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            sleep_duration_ms: 3_600_000,
            snooze_duration_ms: 540_000,
            alarm_duration_ms: 3_600_000,
            emit_interval_ms: 10_000,
            tick_interval_ms: 200,
            alarm_buzzer: true,
        }
    }
}

impl ClockConfig {
    pub fn sanitize(&mut self) {
        self.sleep_duration_ms = self.sleep_duration_ms.clamp(1_000, 86_400_000);
        self.snooze_duration_ms = self.snooze_duration_ms.clamp(1_000, 86_400_000);
        self.alarm_duration_ms = self.alarm_duration_ms.clamp(1_000, 86_400_000);
        self.emit_interval_ms = self.emit_interval_ms.clamp(1_000, 600_000);
        self.tick_interval_ms = self.tick_interval_ms.clamp(50, 1_000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub stream_url: String,
    pub connect_timeout_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 6600,
            stream_url: KQED_STREAM_URL.to_string(),
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud: 9_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub clock: ClockConfig,
    pub playback: PlaybackConfig,
    pub serial: SerialConfig,
    /// Alarm save file, resolved against the data dir when relative.
    /// Empty disables alarm persistence entirely.
    pub alarm_file: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            clock: ClockConfig::default(),
            playback: PlaybackConfig::default(),
            serial: SerialConfig::default(),
            alarm_file: "alarms.crontab".to_string(),
        }
    }
}
