use chrono::NaiveDateTime;

use crate::{
    alarm::AlarmSet,
    config::ClockConfig,
    cron::ScheduleError,
    types::{Button, DeviceState, OutputLines},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Sleep,
    Snooze,
    AlarmOff,
    NextAlarm,
}

const TIMER_KINDS: [TimerKind; 4] = [
    TimerKind::Sleep,
    TimerKind::Snooze,
    TimerKind::AlarmOff,
    TimerKind::NextAlarm,
];

impl TimerKind {
    fn index(self) -> usize {
        match self {
            Self::Sleep => 0,
            Self::Snooze => 1,
            Self::AlarmOff => 2,
            Self::NextAlarm => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sleep => "sleep",
            Self::Snooze => "snooze",
            Self::AlarmOff => "alarm-off",
            Self::NextAlarm => "next-alarm",
        }
    }
}

/// One optional deadline per timer kind. Arming overwrites any pending
/// deadline of the same kind in a single step, so at most one handle
/// per kind can exist, and a cancelled deadline can never be returned
/// by `pop_due`.
#[derive(Debug, Clone, Default)]
pub struct TimerSet {
    deadlines: [Option<u64>; 4],
}

impl TimerSet {
    pub fn arm(&mut self, kind: TimerKind, now_ms: u64, delay_ms: u64) {
        self.deadlines[kind.index()] = Some(now_ms.saturating_add(delay_ms));
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.deadlines[kind.index()] = None;
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<u64> {
        self.deadlines[kind.index()]
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.deadlines.iter().flatten().copied().min()
    }

    /// Removes and returns the earliest deadline at or before `now_ms`.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<TimerKind> {
        let mut best: Option<(u64, usize)> = None;
        for (index, deadline) in self.deadlines.iter().enumerate() {
            if let Some(deadline) = deadline {
                if *deadline <= now_ms && best.map(|(at, _)| *deadline < at).unwrap_or(true) {
                    best = Some((*deadline, index));
                }
            }
        }
        let (_, index) = best?;
        self.deadlines[index] = None;
        Some(TIMER_KINDS[index])
    }
}

/// What the host must do after a transition. The engine itself never
/// performs I/O or logging; playback commands are fire-and-forget and
/// the report variants exist so consistency violations and scheduling
/// outcomes surface in the host's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    EmitState,
    StartPlayback,
    StopPlayback,
    ScheduledNext { delay_ms: u64 },
    NothingScheduled,
    BadTimerFire { timer: TimerKind, state: DeviceState },
}

/// The device state machine. All time is injected: `now_ms` is a
/// monotonic millisecond clock driving the timer set, `now` the local
/// wall clock the cron schedule is evaluated against.
#[derive(Debug, Clone)]
pub struct DeviceEngine {
    config: ClockConfig,
    alarms: AlarmSet,
    state: DeviceState,
    timers: TimerSet,
    /// Buzzer policy captured from the alarm that is currently sounding.
    alarm_buzzer_active: bool,
    /// Buzzer policy of the next scheduled occurrence, captured when the
    /// fire timer is armed so the firing transition uses the policy of
    /// the alarm that actually fired.
    pending_buzzer: bool,
}

impl DeviceEngine {
    pub fn new(config: ClockConfig, alarms: AlarmSet) -> Self {
        Self {
            config,
            alarms,
            state: DeviceState::Off,
            timers: TimerSet::default(),
            alarm_buzzer_active: false,
            pending_buzzer: false,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn alarms(&self) -> &AlarmSet {
        &self.alarms
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    pub fn next_alarm_deadline_ms(&self) -> Option<u64> {
        self.timers.deadline(TimerKind::NextAlarm)
    }

    /// Output lines derived from the state table on every read, never
    /// stored, so they cannot drift from the state enum.
    pub fn outputs(&self) -> OutputLines {
        match self.state {
            DeviceState::Off | DeviceState::Snooze => OutputLines::default(),
            DeviceState::Sleep => OutputLines {
                relay: true,
                buzzer: false,
                lights: false,
            },
            DeviceState::Alarm => OutputLines {
                relay: true,
                buzzer: self.alarm_buzzer_active,
                lights: true,
            },
        }
    }

    /// Transport (re)connected: schedule against the current alarm set
    /// and push a state frame so the device resynchronizes.
    pub fn on_connect(&mut self, now: NaiveDateTime, now_ms: u64) -> Vec<EngineAction> {
        let mut actions = self.reschedule_next(now, now_ms);
        actions.push(EngineAction::EmitState);
        actions
    }

    /// Cancels any pending fire timer and re-arms it for the earliest
    /// occurrence across the set; leaves it unarmed when there is
    /// nothing to schedule.
    pub fn reschedule_next(&mut self, now: NaiveDateTime, now_ms: u64) -> Vec<EngineAction> {
        self.timers.cancel(TimerKind::NextAlarm);
        match self.alarms.next_fire(now, self.config.alarm_buzzer) {
            Ok(fire) => {
                let delay_ms = (fire.at - now).num_milliseconds().max(1) as u64;
                self.pending_buzzer = fire.buzzer;
                self.timers.arm(TimerKind::NextAlarm, now_ms, delay_ms);
                vec![EngineAction::ScheduledNext { delay_ms }]
            }
            Err(_) => vec![EngineAction::NothingScheduled],
        }
    }

    /// Wholesale schedule replacement. Fails atomically: any malformed
    /// line leaves the active set and the fire timer untouched.
    pub fn replace_alarms(
        &mut self,
        lines: &[String],
        now: NaiveDateTime,
        now_ms: u64,
    ) -> Result<Vec<EngineAction>, ScheduleError> {
        self.alarms = AlarmSet::parse_all(lines)?;
        Ok(self.reschedule_next(now, now_ms))
    }

    pub fn handle_button(&mut self, button: Button, now_ms: u64) -> Vec<EngineAction> {
        match button {
            Button::Sleep => self.handle_sleep_button(now_ms),
            Button::Snooze => self.handle_snooze_button(now_ms),
        }
    }

    /// Fires every due timer in deadline order.
    pub fn tick(&mut self, now: NaiveDateTime, now_ms: u64) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        while let Some(timer) = self.timers.pop_due(now_ms) {
            match timer {
                TimerKind::NextAlarm => self.alarm_fired(now, now_ms, &mut actions),
                TimerKind::Snooze => self.snooze_over(&mut actions),
                TimerKind::Sleep => self.sleep_over(&mut actions),
                TimerKind::AlarmOff => self.alarm_off_fired(&mut actions),
            }
        }
        actions
    }

    fn handle_sleep_button(&mut self, now_ms: u64) -> Vec<EngineAction> {
        match self.state {
            DeviceState::Off => {
                self.state = DeviceState::Sleep;
                self.timers
                    .arm(TimerKind::Sleep, now_ms, self.config.sleep_duration_ms);
                vec![EngineAction::EmitState, EngineAction::StartPlayback]
            }
            DeviceState::Sleep => {
                // Extends the sleep window; no transition, nothing emitted.
                self.timers
                    .arm(TimerKind::Sleep, now_ms, self.config.sleep_duration_ms);
                Vec::new()
            }
            DeviceState::Alarm | DeviceState::Snooze => {
                self.timers.cancel(TimerKind::AlarmOff);
                self.timers.cancel(TimerKind::Snooze);
                self.enter_off()
            }
        }
    }

    fn handle_snooze_button(&mut self, now_ms: u64) -> Vec<EngineAction> {
        match self.state {
            DeviceState::Alarm => {
                self.state = DeviceState::Snooze;
                self.timers
                    .arm(TimerKind::Snooze, now_ms, self.config.snooze_duration_ms);
                vec![EngineAction::EmitState, EngineAction::StopPlayback]
            }
            DeviceState::Snooze => {
                self.timers
                    .arm(TimerKind::Snooze, now_ms, self.config.snooze_duration_ms);
                Vec::new()
            }
            DeviceState::Sleep => {
                self.timers.cancel(TimerKind::Sleep);
                self.enter_off()
            }
            DeviceState::Off => Vec::new(),
        }
    }

    fn alarm_fired(&mut self, now: NaiveDateTime, now_ms: u64, actions: &mut Vec<EngineAction>) {
        let buzzer = self.pending_buzzer;
        // Re-arm for the following occurrence before the state check so
        // an alarm survives its own firing even on a consistency
        // violation.
        actions.extend(self.reschedule_next(now, now_ms));

        if self.state != DeviceState::Off {
            actions.push(EngineAction::BadTimerFire {
                timer: TimerKind::NextAlarm,
                state: self.state,
            });
            return;
        }

        self.state = DeviceState::Alarm;
        self.alarm_buzzer_active = buzzer;
        self.timers
            .arm(TimerKind::AlarmOff, now_ms, self.config.alarm_duration_ms);
        actions.push(EngineAction::EmitState);
        actions.push(EngineAction::StartPlayback);
    }

    fn snooze_over(&mut self, actions: &mut Vec<EngineAction>) {
        if self.state != DeviceState::Snooze {
            actions.push(EngineAction::BadTimerFire {
                timer: TimerKind::Snooze,
                state: self.state,
            });
            return;
        }
        // The alarm-off deadline armed at the original ALARM entry keeps
        // counting; a long snooze resumes into an almost-expired alarm.
        self.state = DeviceState::Alarm;
        actions.push(EngineAction::EmitState);
        actions.push(EngineAction::StartPlayback);
    }

    fn sleep_over(&mut self, actions: &mut Vec<EngineAction>) {
        if self.state != DeviceState::Sleep {
            actions.push(EngineAction::BadTimerFire {
                timer: TimerKind::Sleep,
                state: self.state,
            });
            return;
        }
        actions.extend(self.enter_off());
    }

    fn alarm_off_fired(&mut self, actions: &mut Vec<EngineAction>) {
        match self.state {
            DeviceState::Alarm => actions.extend(self.enter_off()),
            DeviceState::Snooze => {
                self.timers.cancel(TimerKind::Snooze);
                actions.extend(self.enter_off());
            }
            state => actions.push(EngineAction::BadTimerFire {
                timer: TimerKind::AlarmOff,
                state,
            }),
        }
    }

    fn enter_off(&mut self) -> Vec<EngineAction> {
        self.state = DeviceState::Off;
        self.alarm_buzzer_active = false;
        vec![EngineAction::EmitState, EngineAction::StopPlayback]
    }
}
