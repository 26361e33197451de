use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::domain::{RoomNumber, SensorKind};
use crate::error::{Issue, RepackError};

pub const FILES_PER_ROOM: usize = 3;

/// The raw sensor files found for one room in an unpacked archive.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomFileSet {
    pub room: RoomNumber,
    pub matched: Vec<String>,
    pub temperature: Option<Utf8PathBuf>,
    pub humidity: Option<Utf8PathBuf>,
    pub co2: Option<Utf8PathBuf>,
    pub issues: Vec<Issue>,
}

impl RoomFileSet {
    /// Picks the files belonging to `room` out of a staging listing.
    ///
    /// The listing is sorted first so the result does not depend on
    /// directory iteration order.
    pub fn from_listing(
        listing: &[String],
        staging_dir: &Utf8Path,
        room_file_prefix: &str,
        room: RoomNumber,
    ) -> Result<Self, RepackError> {
        let pattern = room_pattern(room_file_prefix, room)?;
        let mut matched: Vec<String> = listing
            .iter()
            .filter(|name| pattern.is_match(name))
            .cloned()
            .collect();
        matched.sort();

        let mut set = Self {
            room,
            matched: Vec::new(),
            temperature: None,
            humidity: None,
            co2: None,
            issues: Vec::new(),
        };

        if matched.len() != FILES_PER_ROOM {
            let issue = Issue::RoomFileCount {
                room,
                found: matched.len(),
            };
            tracing::error!("{issue}");
            set.issues.push(issue);
        }

        for filename in &matched {
            let Some(kind) = SensorKind::from_filename(filename) else {
                let issue = Issue::UnknownFile {
                    filename: filename.clone(),
                };
                tracing::warn!("{issue}");
                set.issues.push(issue);
                continue;
            };
            if set.sensor(kind).is_some() {
                let issue = Issue::DuplicateSensorFile {
                    room,
                    sensor: kind,
                    filename: filename.clone(),
                };
                tracing::warn!("{issue}");
                set.issues.push(issue);
                continue;
            }
            *set.slot_mut(kind) = Some(staging_dir.join(filename));
        }

        for kind in SensorKind::ALL {
            if set.sensor(kind).is_none() {
                set.issues.push(Issue::MissingSensor { room, sensor: kind });
            }
        }

        set.matched = matched;
        Ok(set)
    }

    pub fn sensor(&self, kind: SensorKind) -> Option<&Utf8Path> {
        match kind {
            SensorKind::Temperature => self.temperature.as_deref(),
            SensorKind::Humidity => self.humidity.as_deref(),
            SensorKind::Co2 => self.co2.as_deref(),
        }
    }

    pub fn is_complete(&self) -> bool {
        SensorKind::ALL
            .into_iter()
            .all(|kind| self.sensor(kind).is_some())
    }

    fn slot_mut(&mut self, kind: SensorKind) -> &mut Option<Utf8PathBuf> {
        match kind {
            SensorKind::Temperature => &mut self.temperature,
            SensorKind::Humidity => &mut self.humidity,
            SensorKind::Co2 => &mut self.co2,
        }
    }
}

/// `room_1` must not pick up `room_10`, so the number has to be followed by a
/// non-digit or the end of the name.
fn room_pattern(prefix: &str, room: RoomNumber) -> Result<Regex, RepackError> {
    Regex::new(&format!(r"^{}{}(\D|$)", regex::escape(prefix), room.get()))
        .map_err(|err| RepackError::ConfigParse(format!("room file pattern: {err}")))
}
