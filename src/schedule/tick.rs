// levelbak/src/schedule/tick.rs
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::fmt;
use std::str::FromStr;

use crate::errors::TickParseError;

/// A schedule predicate with one-minute resolution.
///
/// Keyword forms (`hourly`, `daily@02:00`, `weekly@Sun 03:30`, `monthly@1`) and
/// five-field cron expressions are compiled into the same field masks, so matching
/// is a handful of bit tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    source: String,
    minutes: Field,
    hours: Field,
    days_of_month: Field,
    months: Field,
    days_of_week: Field,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    restricted: bool,
}

impl Field {
    fn any(min: u32, max: u32) -> Self {
        Self {
            bits: mask(min, max, 1),
            restricted: false,
        }
    }

    fn only(value: u32) -> Self {
        Self {
            bits: 1 << value,
            restricted: true,
        }
    }

    fn contains(&self, value: u32) -> bool {
        self.bits & (1 << value) != 0
    }
}

fn mask(from: u32, to: u32, step: u32) -> u64 {
    (from..=to)
        .step_by(step as usize)
        .fold(0u64, |acc, v| acc | (1 << v))
}

const WEEKDAYS: [(&str, &str); 7] = [
    ("sun", "sunday"),
    ("mon", "monday"),
    ("tue", "tuesday"),
    ("wed", "wednesday"),
    ("thu", "thursday"),
    ("fri", "friday"),
    ("sat", "saturday"),
];

impl Tick {
    pub fn parse(input: &str) -> Result<Self, TickParseError> {
        let text = input.trim();
        if text.is_empty() {
            return Err(TickParseError::new(input, "empty expression"));
        }

        let lowered = text.to_ascii_lowercase();
        let (keyword, arg) = match lowered.split_once('@') {
            Some((k, a)) => (k.trim(), Some(a.trim())),
            None => (lowered.as_str(), None),
        };

        let mut tick = Tick {
            source: text.to_string(),
            minutes: Field::only(0),
            hours: Field::only(0),
            days_of_month: Field::any(1, 31),
            months: Field::any(1, 12),
            days_of_week: Field::any(0, 6),
        };

        match (keyword, arg) {
            ("hourly", None) => tick.hours = Field::any(0, 23),
            ("hourly", Some(minute)) => {
                tick.hours = Field::any(0, 23);
                tick.minutes = Field::only(parse_number(input, minute, 0, 59, "minute")?);
            }
            ("daily", None) => {}
            ("daily", Some(time)) => tick.set_time(input, time)?,
            ("weekly", Some(arg)) => {
                let (day, time) = split_day_and_time(arg);
                let weekday = WEEKDAYS
                    .iter()
                    .position(|(short, long)| day == *short || day == *long)
                    .ok_or_else(|| TickParseError::new(input, format!("unknown weekday {day:?}")))?;
                tick.days_of_week = Field::only(weekday as u32);
                if let Some(time) = time {
                    tick.set_time(input, time)?;
                }
            }
            ("monthly", Some(arg)) => {
                let (day, time) = split_day_and_time(arg);
                tick.days_of_month = Field::only(parse_number(input, day, 1, 31, "day of month")?);
                if let Some(time) = time {
                    tick.set_time(input, time)?;
                }
            }
            ("weekly", None) | ("monthly", None) => {
                return Err(TickParseError::new(input, format!("{keyword} requires a day, e.g. {keyword}@1")));
            }
            _ if arg.is_none() && text.split_whitespace().count() == 5 => {
                tick = parse_cron(input, text)?;
            }
            _ => return Err(TickParseError::new(input, "unrecognised schedule expression")),
        }

        Ok(tick)
    }

    /// Source text as written in the configuration.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, now: &NaiveDateTime) -> bool {
        if !self.minutes.contains(now.minute())
            || !self.hours.contains(now.hour())
            || !self.months.contains(now.month())
        {
            return false;
        }

        let dom = self.days_of_month.contains(now.day());
        let dow = self.days_of_week.contains(now.weekday().num_days_from_sunday());
        if self.days_of_month.restricted && self.days_of_week.restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    fn set_time(&mut self, input: &str, time: &str) -> Result<(), TickParseError> {
        let (hour, minute) = time
            .split_once(':')
            .ok_or_else(|| TickParseError::new(input, format!("expected HH:MM, got {time:?}")))?;
        self.hours = Field::only(parse_number(input, hour, 0, 23, "hour")?);
        self.minutes = Field::only(parse_number(input, minute, 0, 59, "minute")?);
        Ok(())
    }
}

impl FromStr for Tick {
    type Err = TickParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tick::parse(s)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn split_day_and_time(arg: &str) -> (&str, Option<&str>) {
    match arg.split_once(char::is_whitespace) {
        Some((day, time)) => (day.trim(), Some(time.trim())),
        None => (arg, None),
    }
}

fn parse_number(input: &str, text: &str, min: u32, max: u32, what: &str) -> Result<u32, TickParseError> {
    let value: u32 = text
        .trim()
        .parse()
        .map_err(|_| TickParseError::new(input, format!("{what} {text:?} is not a number")))?;
    if value < min || value > max {
        return Err(TickParseError::new(
            input,
            format!("{what} {value} out of range {min}-{max}"),
        ));
    }
    Ok(value)
}

fn parse_cron(input: &str, text: &str) -> Result<Tick, TickParseError> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    let mut days_of_week = parse_cron_field(input, fields[4], 0, 7, "day of week")?;
    // 7 is an alias for Sunday
    if days_of_week.contains(7) {
        days_of_week.bits = (days_of_week.bits & !(1 << 7)) | 1;
    }

    Ok(Tick {
        source: text.to_string(),
        minutes: parse_cron_field(input, fields[0], 0, 59, "minute")?,
        hours: parse_cron_field(input, fields[1], 0, 23, "hour")?,
        days_of_month: parse_cron_field(input, fields[2], 1, 31, "day of month")?,
        months: parse_cron_field(input, fields[3], 1, 12, "month")?,
        days_of_week,
    })
}

fn parse_cron_field(input: &str, text: &str, min: u32, max: u32, what: &str) -> Result<Field, TickParseError> {
    let mut bits = 0u64;
    // A field led by `*` counts as unrestricted for the day-of-month/day-of-week rule,
    // even with a step, as in classic cron.
    let restricted = !text.starts_with('*');

    for part in text.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step = parse_number(input, step, 1, max, "step")?;
                (range, Some(step))
            }
            None => (part, None),
        };

        let (from, to) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let a = parse_number(input, a, min, max, what)?;
            let b = parse_number(input, b, min, max, what)?;
            if a > b {
                return Err(TickParseError::new(input, format!("{what} range {a}-{b} is reversed")));
            }
            (a, b)
        } else {
            let a = parse_number(input, range, min, max, what)?;
            // "5/15" means every 15 starting at 5
            (a, if step.is_some() { max } else { a })
        };

        bits |= mask(from, to, step.unwrap_or(1));
    }

    Ok(Field { bits, restricted })
}
