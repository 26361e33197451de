use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::RepackError;

pub const ROOM_COUNT: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct RoomNumber(u8);

impl RoomNumber {
    pub fn new(value: u8) -> Result<Self, RepackError> {
        if (1..=ROOM_COUNT).contains(&value) {
            Ok(Self(value))
        } else {
            Err(RepackError::InvalidRoom(value.to_string()))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = RoomNumber> {
        (1..=ROOM_COUNT).map(RoomNumber)
    }
}

impl TryFrom<u8> for RoomNumber {
    type Error = RepackError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomNumber> for u8 {
    fn from(room: RoomNumber) -> Self {
        room.0
    }
}

impl fmt::Display for RoomNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RoomNumber {
    type Err = RepackError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let trimmed = trimmed
            .strip_prefix('R')
            .or_else(|| trimmed.strip_prefix('r'))
            .unwrap_or(trimmed);
        let number = trimmed
            .parse::<u8>()
            .map_err(|_| RepackError::InvalidRoom(value.to_string()))?;
        Self::new(number)
    }
}

/// How a sensor's per-minute readings collapse into one 5-minute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Mean,
    Sample,
}

impl Aggregation {
    /// Label used on the aggregation row of the header block.
    pub fn label(self) -> &'static str {
        match self {
            Aggregation::Mean => "Avg",
            Aggregation::Sample => "Smp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Temperature,
    Humidity,
    Co2,
}

impl SensorKind {
    pub const ALL: [SensorKind; 3] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::Co2,
    ];

    /// Substring identifying the sensor in a raw archive filename.
    pub fn marker(self) -> &'static str {
        match self {
            SensorKind::Temperature => "zone_temp",
            SensorKind::Humidity => "zone_humidity",
            SensorKind::Co2 => "co2_sensor",
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            SensorKind::Temperature => "Temperature",
            SensorKind::Humidity => "Humidity",
            SensorKind::Co2 => "CO2",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            SensorKind::Temperature => "DegC",
            SensorKind::Humidity => "%RH",
            SensorKind::Co2 => "ppm",
        }
    }

    pub fn aggregation(self) -> Aggregation {
        match self {
            SensorKind::Temperature | SensorKind::Co2 => Aggregation::Mean,
            SensorKind::Humidity => Aggregation::Sample,
        }
    }

    pub fn from_filename(filename: &str) -> Option<SensorKind> {
        Self::ALL
            .into_iter()
            .find(|kind| filename.contains(kind.marker()))
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Temperature => write!(f, "temperature"),
            SensorKind::Humidity => write!(f, "humidity"),
            SensorKind::Co2 => write!(f, "co2"),
        }
    }
}

/// Daily archive name, `<prefix>_<YYYY>_<MM>_<DD>.zip`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveName {
    prefix: String,
    date: NaiveDate,
}

impl ArchiveName {
    pub fn new(prefix: &str, date: NaiveDate) -> Self {
        Self {
            prefix: prefix.trim_end_matches('_').to_string(),
            date,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn parse(filename: &str) -> Result<Self, RepackError> {
        let invalid = || RepackError::InvalidArchiveName(filename.to_string());
        let stem = filename
            .trim()
            .strip_suffix(".zip")
            .ok_or_else(invalid)?;
        let mut parts = stem.rsplitn(4, '_');
        let day = parts.next().ok_or_else(invalid)?;
        let month = parts.next().ok_or_else(invalid)?;
        let year = parts.next().ok_or_else(invalid)?;
        let prefix = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;

        let is_numeric = |value: &str, len: usize| {
            value.len() == len && value.chars().all(|ch| ch.is_ascii_digit())
        };
        if !is_numeric(year, 4) || !is_numeric(month, 2) || !is_numeric(day, 2) {
            return Err(invalid());
        }
        let date = NaiveDate::from_ymd_opt(
            year.parse().map_err(|_| invalid())?,
            month.parse().map_err(|_| invalid())?,
            day.parse().map_err(|_| invalid())?,
        )
        .ok_or_else(invalid)?;

        Ok(Self {
            prefix: prefix.to_string(),
            date,
        })
    }
}

impl fmt::Display for ArchiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}.zip", self.prefix, self.date.format("%Y_%m_%d"))
    }
}

/// `MON` + `YEAR` token used in monthly output filenames, e.g. `NOV2017`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonthToken {
    year: i32,
    month: u32,
}

impl MonthToken {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for MonthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MONTHS: [&str; 12] = [
            "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
        ];
        let index = (self.month as usize).saturating_sub(1).min(11);
        write!(f, "{}{}", MONTHS[index], self.year)
    }
}

/// Per-room monthly file, `<facility>_R<room>_ENVVARS_<MONTHYEAR>.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteFileName {
    pub facility: String,
    pub room: RoomNumber,
    pub month: MonthToken,
}

impl RemoteFileName {
    pub fn new(facility: &str, room: RoomNumber, date: NaiveDate) -> Self {
        Self {
            facility: facility.to_string(),
            room,
            month: MonthToken::from_date(date),
        }
    }

    /// Station identifier written in the header block, e.g. `S39_R3`.
    pub fn station(&self) -> String {
        format!("{}_R{}", self.facility, self.room)
    }
}

impl fmt::Display for RemoteFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_R{}_ENVVARS_{}.csv",
            self.facility, self.room, self.month
        )
    }
}
