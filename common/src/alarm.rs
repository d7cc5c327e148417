use chrono::NaiveDateTime;

use crate::cron::{CronExpr, ScheduleError};

/// A single recurring alarm. Immutable once parsed; editing the
/// schedule means building new alarms.
///
/// The save-line format is `m h dom mon dow`, optionally followed by a
/// standalone `, 0` / `, 1` buzzer-override token. An absent override
/// falls back to the global buzzer policy at fire time.
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    expression: String,
    buzzer: Option<bool>,
    expr: CronExpr,
}

impl Alarm {
    /// A line that parses whole is a plain expression: commas inside
    /// fields ("0 9 * * 6,0") belong to the field grammar, not to the
    /// buzzer override. The override is the trailing `, 0` / `, 1`
    /// token, which can never parse as part of the five fields.
    pub fn parse(line: &str) -> Result<Self, ScheduleError> {
        let line = line.trim();
        let whole_err = match CronExpr::parse(line) {
            Ok(expr) => {
                return Ok(Self {
                    expression: line.to_string(),
                    buzzer: None,
                    expr,
                })
            }
            Err(err) => err,
        };

        // Split at the last comma so comma lists in the minute/day
        // fields stay intact.
        if let Some((head, tail)) = line.rsplit_once(',') {
            let buzzer = match tail.trim() {
                "0" => Some(false),
                "1" => Some(true),
                _ => None,
            };
            if let Some(buzzer) = buzzer {
                let expr_text = head.trim();
                let expr = CronExpr::parse(expr_text)?;
                return Ok(Self {
                    expression: expr_text.to_string(),
                    buzzer: Some(buzzer),
                    expr,
                });
            }
        }
        Err(whole_err)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn buzzer_override(&self) -> Option<bool> {
        self.buzzer
    }

    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        self.expr.next_after(after)
    }

    pub fn save_line(&self) -> String {
        match self.buzzer {
            Some(buzzer) => format!("{} , {}", self.expression, u8::from(buzzer)),
            None => self.expression.clone(),
        }
    }
}

/// The earliest upcoming occurrence across an alarm set, together with
/// the buzzer policy of the alarm that produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextFire {
    pub at: NaiveDateTime,
    pub buzzer: bool,
}

/// Insertion-ordered collection of alarms. Order is display order only;
/// the earliest next occurrence always wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlarmSet {
    alarms: Vec<Alarm>,
}

impl AlarmSet {
    /// Parses every line or fails without producing a set, so a caller
    /// replacing an existing set can keep it untouched on error.
    pub fn parse_all(lines: &[String]) -> Result<Self, ScheduleError> {
        let alarms = lines
            .iter()
            .map(|line| Alarm::parse(line))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { alarms })
    }

    /// Parses the persisted save-file text, skipping comment and blank
    /// lines. Strict about what remains; the caller decides whether a
    /// corrupt file means "start empty".
    pub fn from_save_text(text: &str) -> Result<Self, ScheduleError> {
        let lines: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        Self::parse_all(&lines)
    }

    pub fn save_lines(&self) -> Vec<String> {
        self.alarms.iter().map(Alarm::save_line).collect()
    }

    pub fn alarms(&self) -> &[Alarm] {
        &self.alarms
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    /// The minimum of all member next occurrences. `Empty` when there is
    /// nothing to schedule (including the degenerate case where every
    /// member is beyond the search horizon); the caller must leave the
    /// fire timer unarmed then.
    pub fn next_fire(
        &self,
        after: NaiveDateTime,
        default_buzzer: bool,
    ) -> Result<NextFire, ScheduleError> {
        let mut best: Option<NextFire> = None;
        for alarm in &self.alarms {
            let Some(at) = alarm.next_after(after) else {
                continue;
            };
            if best.map(|fire| at < fire.at).unwrap_or(true) {
                best = Some(NextFire {
                    at,
                    buzzer: alarm.buzzer_override().unwrap_or(default_buzzer),
                });
            }
        }
        best.ok_or(ScheduleError::Empty)
    }

    /// The next `n` occurrences across the whole set in chronological
    /// order, re-evaluating every member at each advanced cursor. A
    /// display aid: an empty set yields an empty sequence, not an error.
    pub fn upcoming(&self, n: usize, after: NaiveDateTime) -> Vec<NaiveDateTime> {
        let mut result = Vec::with_capacity(n);
        let mut cursor = after;
        for _ in 0..n {
            let Some(next) = self
                .alarms
                .iter()
                .filter_map(|alarm| alarm.next_after(cursor))
                .min()
            else {
                break;
            };
            result.push(next);
            cursor = next;
        }
        result
    }
}
