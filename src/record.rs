use std::io::{Read, Write};

use chrono::{NaiveDate, NaiveDateTime};

use crate::domain::{RemoteFileName, RoomNumber, SensorKind};
use crate::error::RepackError;
use crate::series::{AlignedRoom, FiveMinuteGrid, format_timestamp, parse_timestamp};

pub const COLUMNS: [&str; 5] = ["DateTime", "Room", "Temperature", "Humidity", "CO2"];
pub const SENTINEL_TEXT: &str = "NAN";

const ROW_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy)]
pub struct RoomRow {
    pub date_time: NaiveDateTime,
    pub room: RoomNumber,
    pub temperature: f64,
    pub humidity: f64,
    pub co2: f64,
}

impl RoomRow {
    /// Field-wise equality where two sentinels compare equal.
    pub fn same_as(&self, other: &RoomRow) -> bool {
        let same = |a: f64, b: f64| (a.is_nan() && b.is_nan()) || a == b;
        self.date_time == other.date_time
            && self.room == other.room
            && same(self.temperature, other.temperature)
            && same(self.humidity, other.humidity)
            && same(self.co2, other.co2)
    }

    fn fields(&self) -> [String; 5] {
        [
            format_timestamp(self.date_time),
            self.room.to_string(),
            format_value(self.temperature),
            format_value(self.humidity),
            format_value(self.co2),
        ]
    }
}

/// One room's day on the 5-minute grid.
#[derive(Debug, Clone)]
pub struct RoomRecord {
    pub date: NaiveDate,
    pub room: RoomNumber,
    pub rows: Vec<RoomRow>,
}

impl RoomRecord {
    /// Rows are keyed by grid slot, so every column lines up with the
    /// synthesized DateTime regardless of how many readings each file had.
    pub fn build(grid: &FiveMinuteGrid, aligned: &AlignedRoom) -> Self {
        let rows = grid
            .timestamps()
            .into_iter()
            .enumerate()
            .map(|(index, date_time)| RoomRow {
                date_time,
                room: aligned.room,
                temperature: aligned.temperature.values[index],
                humidity: aligned.humidity.values[index],
                co2: aligned.co2.values[index],
            })
            .collect();

        Self {
            date: grid.date(),
            room: aligned.room,
            rows,
        }
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.rows.first().map(|row| row.date_time)
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.rows.last().map(|row| row.date_time)
    }
}

/// Station metadata for the 4-line TOA5-style block opening a monthly file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
    pub station: String,
    pub source: String,
}

impl HeaderBlock {
    pub fn for_file(name: &RemoteFileName, source: &str) -> Self {
        Self {
            station: name.station(),
            source: source.to_string(),
        }
    }

    fn rows(&self) -> [[String; 5]; 4] {
        let units = [
            "TS".to_string(),
            String::new(),
            SensorKind::Temperature.unit().to_string(),
            SensorKind::Humidity.unit().to_string(),
            SensorKind::Co2.unit().to_string(),
        ];
        let aggregation = [
            String::new(),
            "Smp".to_string(),
            SensorKind::Temperature.aggregation().label().to_string(),
            SensorKind::Humidity.aggregation().label().to_string(),
            SensorKind::Co2.aggregation().label().to_string(),
        ];
        [
            [
                "TOA5".to_string(),
                self.station.clone(),
                "BMS".to_string(),
                self.source.clone(),
                "ENVVARS".to_string(),
            ],
            COLUMNS.map(str::to_string),
            units,
            aggregation,
        ]
    }
}

/// Lines written ahead of the data rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderMode {
    Block(HeaderBlock),
    ColumnNames,
    None,
}

pub fn write_rows<W: Write>(
    writer: W,
    rows: &[RoomRow],
    header: &HeaderMode,
) -> Result<(), RepackError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    match header {
        HeaderMode::Block(block) => {
            for line in block.rows() {
                wtr.write_record(&line)
                    .map_err(|err| RepackError::Csv(err.to_string()))?;
            }
        }
        HeaderMode::ColumnNames => wtr
            .write_record(COLUMNS)
            .map_err(|err| RepackError::Csv(err.to_string()))?,
        HeaderMode::None => {}
    }

    for row in rows {
        wtr.write_record(row.fields())
            .map_err(|err| RepackError::Csv(err.to_string()))?;
    }
    wtr.flush()
        .map_err(|err| RepackError::Filesystem(err.to_string()))
}

pub fn to_csv_bytes(rows: &[RoomRow], header: &HeaderMode) -> Result<Vec<u8>, RepackError> {
    let mut buffer = Vec::new();
    write_rows(&mut buffer, rows, header)?;
    Ok(buffer)
}

/// Reads data rows back from an output file, skipping any header lines.
pub fn read_rows<R: Read>(reader: R) -> Result<Vec<RoomRow>, RepackError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let formats = [ROW_TIMESTAMP_FORMAT.to_string()];

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|err| RepackError::Csv(err.to_string()))?;
        let Some(date_time) = record.get(0).and_then(|raw| parse_timestamp(raw, &formats)) else {
            continue;
        };
        if record.len() != COLUMNS.len() {
            return Err(RepackError::Csv(format!(
                "expected {} fields, found {} at {date_time}",
                COLUMNS.len(),
                record.len()
            )));
        }
        let room = record
            .get(1)
            .unwrap_or_default()
            .parse::<RoomNumber>()?;
        let value = |index: usize| parse_value(record.get(index).unwrap_or_default());
        rows.push(RoomRow {
            date_time,
            room,
            temperature: value(2),
            humidity: value(3),
            co2: value(4),
        });
    }
    Ok(rows)
}

/// Shortest text that parses back to the same `f64`; the sentinel is `NAN`.
pub fn format_value(value: f64) -> String {
    if !value.is_finite() {
        return SENTINEL_TEXT.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    value.to_string()
}

fn parse_value(raw: &str) -> f64 {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case(SENTINEL_TEXT) || raw.is_empty() {
        return f64::NAN;
    }
    raw.parse().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{AlignedSeries, POINTS_PER_DAY};

    fn aligned(room: u8) -> AlignedRoom {
        let filled = |kind, base: f64| {
            let mut series = AlignedSeries::sentinel(kind);
            for (i, value) in series.values.iter_mut().enumerate() {
                *value = base + (i % 10) as f64 / 2.0;
            }
            series.observed = POINTS_PER_DAY * 5;
            series
        };
        AlignedRoom {
            room: RoomNumber::new(room).unwrap(),
            temperature: filled(SensorKind::Temperature, 21.0),
            humidity: AlignedSeries::sentinel(SensorKind::Humidity),
            co2: filled(SensorKind::Co2, 410.0),
            issues: Vec::new(),
        }
    }

    fn grid() -> FiveMinuteGrid {
        FiveMinuteGrid::for_date(NaiveDate::from_ymd_opt(2017, 11, 1).unwrap())
    }

    #[test]
    fn build_has_one_row_per_slot() {
        let record = RoomRecord::build(&grid(), &aligned(4));
        assert_eq!(record.rows.len(), POINTS_PER_DAY);
        assert_eq!(
            format_timestamp(record.first_timestamp().unwrap()),
            "2017-11-01 00:05:00"
        );
        assert_eq!(
            format_timestamp(record.last_timestamp().unwrap()),
            "2017-11-02 00:00:00"
        );
        assert!(record.rows.iter().all(|row| row.room.get() == 4));
    }

    #[test]
    fn header_block_layout() {
        let date = NaiveDate::from_ymd_opt(2017, 11, 1).unwrap();
        let name = RemoteFileName::new("S39", RoomNumber::new(3).unwrap(), date);
        let record = RoomRecord::build(&grid(), &aligned(3));
        let header = HeaderMode::Block(HeaderBlock::for_file(&name, "BMS_S39"));
        let text = String::from_utf8(to_csv_bytes(&record.rows, &header).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "TOA5,S39_R3,BMS,BMS_S39,ENVVARS");
        assert_eq!(lines[1], "DateTime,Room,Temperature,Humidity,CO2");
        assert_eq!(lines[2], "TS,,DegC,%RH,ppm");
        assert_eq!(lines[3], ",Smp,Avg,Smp,Avg");
        assert_eq!(lines[4], "2017-11-01 00:05:00,3,21,NAN,410");
        assert_eq!(lines.len(), 4 + POINTS_PER_DAY);
    }

    #[test]
    fn csv_round_trip() {
        let record = RoomRecord::build(&grid(), &aligned(6));
        for header in [HeaderMode::ColumnNames, HeaderMode::None] {
            let bytes = to_csv_bytes(&record.rows, &header).unwrap();
            let rows = read_rows(bytes.as_slice()).unwrap();
            assert_eq!(rows.len(), record.rows.len());
            assert!(rows.iter().zip(&record.rows).all(|(a, b)| a.same_as(b)));
        }
    }

    #[test]
    fn round_trip_keeps_full_precision() {
        let mut record = RoomRecord::build(&grid(), &aligned(2));
        for (i, row) in record.rows.iter_mut().enumerate() {
            row.temperature = 21.0 + 1.0 / 3.0 + i as f64 / 7.0;
            row.co2 = 400.0 / 3.0;
        }
        let bytes = to_csv_bytes(&record.rows, &HeaderMode::ColumnNames).unwrap();
        let rows = read_rows(bytes.as_slice()).unwrap();
        assert_eq!(rows.len(), POINTS_PER_DAY);
        assert!(rows.iter().zip(&record.rows).all(|(a, b)| a.same_as(b)));
        assert_eq!(rows[0].temperature, 21.0 + 1.0 / 3.0);
    }

    #[test]
    fn value_formatting() {
        assert_eq!(format_value(21.0), "21");
        assert_eq!(format_value(21.25), "21.25");
        assert_eq!(format_value(1.0 / 3.0), "0.3333333333333333");
        assert_eq!(format_value(-0.0), "0");
        assert_eq!(format_value(-0.00001), "-0.00001");
        assert_eq!(format_value(f64::NAN), "NAN");
    }
}
