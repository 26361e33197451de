//! Resampling of per-minute sensor exports onto the daily 5-minute grid.
//!
//! Buckets are right-closed and right-labeled: the value stamped `00:05:00`
//! summarises readings in `(00:00:00, 00:05:00]`. A day therefore runs from
//! `00:05:00` to `00:00:00` of the following day, 288 points in total.

use camino::Utf8Path;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::Serialize;

use crate::domain::{Aggregation, RoomNumber, SensorKind};
use crate::error::{Issue, RepackError};
use crate::fileset::RoomFileSet;

pub const STEP_MINUTES: i64 = 5;
pub const POINTS_PER_DAY: usize = 288;
pub const SENTINEL: f64 = f64::NAN;

const STEP_MILLIS: i64 = STEP_MINUTES * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiveMinuteGrid {
    date: NaiveDate,
}

impl FiveMinuteGrid {
    pub fn for_date(date: NaiveDate) -> Self {
        Self { date }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Midnight opening the day; not itself a grid point.
    pub fn start(&self) -> NaiveDateTime {
        self.date.and_time(chrono::NaiveTime::MIN)
    }

    pub fn timestamp(&self, index: usize) -> NaiveDateTime {
        self.start() + TimeDelta::minutes(STEP_MINUTES * (index as i64 + 1))
    }

    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        (0..POINTS_PER_DAY).map(|i| self.timestamp(i)).collect()
    }

    /// Grid slot whose window `(label - 5min, label]` contains `ts`.
    pub fn bucket_index(&self, ts: NaiveDateTime) -> Option<usize> {
        let millis = (ts - self.start()).num_milliseconds();
        if millis <= 0 {
            return None;
        }
        let index = ((millis - 1) / STEP_MILLIS) as usize;
        (index < POINTS_PER_DAY).then_some(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawReading {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedSeries {
    pub readings: Vec<RawReading>,
    /// Rows whose timestamp could not be parsed.
    pub skipped: usize,
}

/// Parses a raw BMS export with `DateTime` and `Value` columns.
pub fn read_sensor_csv<R: std::io::Read>(
    reader: R,
    formats: &[String],
) -> Result<ParsedSeries, RepackError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|err| RepackError::Csv(err.to_string()))?
        .clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|header| header.eq_ignore_ascii_case(name))
            .ok_or_else(|| RepackError::Csv(format!("missing {name} column")))
    };
    let time_col = column("DateTime")?;
    let value_col = column("Value")?;

    let mut parsed = ParsedSeries::default();
    for record in rdr.records() {
        let record = record.map_err(|err| RepackError::Csv(err.to_string()))?;
        let Some(timestamp) = record
            .get(time_col)
            .and_then(|raw| parse_timestamp(raw, formats))
        else {
            parsed.skipped += 1;
            continue;
        };
        let value = record
            .get(value_col)
            .and_then(|raw| raw.parse::<f64>().ok())
            .unwrap_or(SENTINEL);
        parsed.readings.push(RawReading { timestamp, value });
    }
    Ok(parsed)
}

pub fn parse_timestamp(raw: &str, formats: &[String]) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    formats
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

/// Normalized `YYYY-MM-DD HH:MM:SS` rendering used in output files.
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// One sensor's values on the day grid, in grid order.
#[derive(Debug, Clone, Serialize)]
pub struct AlignedSeries {
    pub kind: SensorKind,
    #[serde(skip)]
    pub values: Vec<f64>,
    /// Readings that landed on the grid.
    pub observed: usize,
    /// Readings outside the day.
    pub dropped: usize,
}

impl AlignedSeries {
    pub fn sentinel(kind: SensorKind) -> Self {
        Self {
            kind,
            values: vec![SENTINEL; POINTS_PER_DAY],
            observed: 0,
            dropped: 0,
        }
    }

    pub fn is_all_sentinel(&self) -> bool {
        self.values.iter().all(|value| value.is_nan())
    }
}

/// Aligned series for one room, each sensor independently optional upstream
/// but always present here (sentinel-filled when the file was absent).
#[derive(Debug, Clone)]
pub struct AlignedRoom {
    pub room: RoomNumber,
    pub temperature: AlignedSeries,
    pub humidity: AlignedSeries,
    pub co2: AlignedSeries,
    pub issues: Vec<Issue>,
}

impl AlignedRoom {
    pub fn series(&self, kind: SensorKind) -> &AlignedSeries {
        match kind {
            SensorKind::Temperature => &self.temperature,
            SensorKind::Humidity => &self.humidity,
            SensorKind::Co2 => &self.co2,
        }
    }

    pub fn missing_sensors(&self) -> Vec<SensorKind> {
        SensorKind::ALL
            .into_iter()
            .filter(|kind| self.series(*kind).observed == 0)
            .collect()
    }
}

pub struct SeriesAligner<'a> {
    grid: FiveMinuteGrid,
    formats: &'a [String],
}

impl<'a> SeriesAligner<'a> {
    pub fn new(grid: FiveMinuteGrid, formats: &'a [String]) -> Self {
        Self { grid, formats }
    }

    pub fn grid(&self) -> FiveMinuteGrid {
        self.grid
    }

    /// Places readings on the grid by timestamp. Slots without a reading keep
    /// the sentinel.
    pub fn align_readings(&self, kind: SensorKind, readings: &[RawReading]) -> AlignedSeries {
        let mut series = AlignedSeries::sentinel(kind);
        let mut sums = vec![0.0_f64; POINTS_PER_DAY];
        let mut counts = vec![0_usize; POINTS_PER_DAY];
        let mut latest: Vec<Option<NaiveDateTime>> = vec![None; POINTS_PER_DAY];

        for reading in readings {
            let Some(index) = self.grid.bucket_index(reading.timestamp) else {
                series.dropped += 1;
                continue;
            };
            series.observed += 1;
            match kind.aggregation() {
                Aggregation::Mean => {
                    if !reading.value.is_nan() {
                        sums[index] += reading.value;
                        counts[index] += 1;
                    }
                }
                Aggregation::Sample => {
                    if latest[index].is_none_or(|seen| reading.timestamp >= seen) {
                        latest[index] = Some(reading.timestamp);
                        series.values[index] = reading.value;
                    }
                }
            }
        }

        if kind.aggregation() == Aggregation::Mean {
            for (index, value) in series.values.iter_mut().enumerate() {
                if counts[index] > 0 {
                    *value = sums[index] / counts[index] as f64;
                }
            }
        }

        if series.dropped > 0 {
            tracing::debug!(
                sensor = %kind,
                dropped = series.dropped,
                "readings outside {} ignored",
                self.grid.date()
            );
        }
        series
    }

    pub fn align_file(
        &self,
        kind: SensorKind,
        path: &Utf8Path,
    ) -> Result<(AlignedSeries, usize), RepackError> {
        let file = std::fs::File::open(path.as_std_path())
            .map_err(|err| RepackError::Filesystem(format!("{path}: {err}")))?;
        let parsed = read_sensor_csv(file, self.formats)?;
        Ok((self.align_readings(kind, &parsed.readings), parsed.skipped))
    }

    /// Aligns every sensor of a room. Absent or unreadable files become
    /// sentinel columns and are reported as issues.
    pub fn align_room(&self, files: &RoomFileSet) -> AlignedRoom {
        let room = files.room;
        let mut issues = Vec::new();
        let mut align = |kind: SensorKind| -> AlignedSeries {
            let Some(path) = files.sensor(kind) else {
                return AlignedSeries::sentinel(kind);
            };
            match self.align_file(kind, path) {
                Ok((series, skipped)) => {
                    if skipped > 0 {
                        let issue = Issue::UnparsedRows {
                            room,
                            sensor: kind,
                            skipped,
                        };
                        tracing::warn!("{issue}");
                        issues.push(issue);
                    }
                    series
                }
                Err(err) => {
                    let issue = Issue::UnreadableFile {
                        room,
                        sensor: kind,
                        reason: err.to_string(),
                    };
                    tracing::error!("{issue}");
                    issues.push(issue);
                    AlignedSeries::sentinel(kind)
                }
            }
        };

        let temperature = align(SensorKind::Temperature);
        let humidity = align(SensorKind::Humidity);
        let co2 = align(SensorKind::Co2);

        AlignedRoom {
            room,
            temperature,
            humidity,
            co2,
            issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_timestamp_formats;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 11, 1).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        date().and_hms_opt(h, m, s).unwrap()
    }

    fn minute_readings(count: usize, value: impl Fn(usize) -> f64) -> Vec<RawReading> {
        (0..count)
            .map(|i| RawReading {
                timestamp: at(0, 0, 0) + TimeDelta::minutes(i as i64 + 1),
                value: value(i),
            })
            .collect()
    }

    #[test]
    fn grid_bounds() {
        let grid = FiveMinuteGrid::for_date(date());
        let stamps = grid.timestamps();
        assert_eq!(stamps.len(), POINTS_PER_DAY);
        assert_eq!(stamps[0], at(0, 5, 0));
        assert_eq!(
            stamps[POINTS_PER_DAY - 1],
            date().succ_opt().unwrap().and_hms_opt(0, 0, 0).unwrap()
        );
        assert!(stamps.windows(2).all(|w| w[1] - w[0] == TimeDelta::minutes(5)));
    }

    #[test]
    fn buckets_are_right_closed() {
        let grid = FiveMinuteGrid::for_date(date());
        assert_eq!(grid.bucket_index(at(0, 0, 0)), None);
        assert_eq!(grid.bucket_index(at(0, 0, 30)), Some(0));
        assert_eq!(grid.bucket_index(at(0, 5, 0)), Some(0));
        assert_eq!(grid.bucket_index(at(0, 5, 1)), Some(1));
        assert_eq!(grid.bucket_index(at(23, 59, 0)), Some(287));
        let next_midnight = date().succ_opt().unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(grid.bucket_index(next_midnight), Some(287));
        assert_eq!(grid.bucket_index(next_midnight + TimeDelta::seconds(1)), None);
    }

    #[test]
    fn mean_of_full_day() {
        let formats = default_timestamp_formats();
        let aligner = SeriesAligner::new(FiveMinuteGrid::for_date(date()), &formats);
        let readings = minute_readings(1440, |i| i as f64);
        let series = aligner.align_readings(SensorKind::Temperature, &readings);
        assert_eq!(series.values.len(), POINTS_PER_DAY);
        // minutes 00:01..00:05 carry 0..4
        assert_eq!(series.values[0], 2.0);
        assert_eq!(series.values[1], 7.0);
        assert_eq!(series.observed, 1440);
    }

    #[test]
    fn gaps_stay_sentinel() {
        let formats = default_timestamp_formats();
        let aligner = SeriesAligner::new(FiveMinuteGrid::for_date(date()), &formats);
        let readings = minute_readings(10, |_| 400.0);
        let series = aligner.align_readings(SensorKind::Co2, &readings);
        assert_eq!(series.values.len(), POINTS_PER_DAY);
        assert_eq!(series.values[0], 400.0);
        assert_eq!(series.values[1], 400.0);
        assert!(series.values[2..].iter().all(|v| v.is_nan()));
    }

    #[test]
    fn sample_takes_closing_reading() {
        let formats = default_timestamp_formats();
        let aligner = SeriesAligner::new(FiveMinuteGrid::for_date(date()), &formats);
        let readings = minute_readings(5, |i| 50.0 + i as f64);
        let series = aligner.align_readings(SensorKind::Humidity, &readings);
        assert_eq!(series.values[0], 54.0);
    }

    #[test]
    fn nan_values_are_skipped_in_mean() {
        let formats = default_timestamp_formats();
        let aligner = SeriesAligner::new(FiveMinuteGrid::for_date(date()), &formats);
        let readings = minute_readings(5, |i| if i == 0 { f64::NAN } else { 20.0 });
        let series = aligner.align_readings(SensorKind::Temperature, &readings);
        assert_eq!(series.values[0], 20.0);
    }

    #[test]
    fn readings_outside_day_are_dropped() {
        let formats = default_timestamp_formats();
        let aligner = SeriesAligner::new(FiveMinuteGrid::for_date(date()), &formats);
        let readings = vec![
            RawReading {
                timestamp: at(0, 0, 0),
                value: 1.0,
            },
            RawReading {
                timestamp: at(0, 0, 0) + TimeDelta::days(2),
                value: 1.0,
            },
        ];
        let series = aligner.align_readings(SensorKind::Temperature, &readings);
        assert_eq!(series.dropped, 2);
        assert!(series.is_all_sentinel());
    }

    #[test]
    fn parses_day_first_export() {
        let formats = default_timestamp_formats();
        let csv = "DateTime,Value\n01/11/2017 00:01:00,21.5\n01/11/2017 00:02,21.7\nbad,1\n01/11/2017 00:03:00,\n";
        let parsed = read_sensor_csv(csv.as_bytes(), &formats).unwrap();
        assert_eq!(parsed.readings.len(), 3);
        assert_eq!(parsed.skipped, 1);
        assert_eq!(parsed.readings[0].timestamp, at(0, 1, 0));
        assert_eq!(parsed.readings[1].value, 21.7);
        assert!(parsed.readings[2].value.is_nan());
    }

    #[test]
    fn missing_value_column_is_an_error() {
        let formats = default_timestamp_formats();
        let err = read_sensor_csv("DateTime,Reading\n".as_bytes(), &formats).unwrap_err();
        assert!(matches!(err, RepackError::Csv(_)));
    }

    #[test]
    fn normalized_timestamp_format() {
        let formats = default_timestamp_formats();
        let ts = parse_timestamp("01/11/2017 13:05:00", &formats).unwrap();
        assert_eq!(format_timestamp(ts), "2017-11-01 13:05:00");
    }
}
