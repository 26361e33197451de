use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::{MissingArchivePolicy, PublishSettings, RunConfig};
use crate::domain::{RemoteFileName, RoomNumber, SensorKind};
use crate::error::{Issue, RepackError};
use crate::existence::{RemoteExistenceChecker, WritePolicy};
use crate::fetcher::ArchiveFetcher;
use crate::fileset::RoomFileSet;
use crate::fs_util;
use crate::locator::{Archive, ArchiveLocator};
use crate::notify::{Notification, Notifier};
use crate::publish::PublishStep;
use crate::record::RoomRecord;
use crate::repository::RepositoryClient;
use crate::series::{FiveMinuteGrid, SeriesAligner};
use crate::store::Store;

/// How the archives of a run are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// One archive per day in `[from, to)`, found by its file name.
    #[default]
    ArchiveDate,
    /// The single archive uploaded between `from` and `to`, inclusive.
    UploadWindow,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// First date processed.
    pub from: NaiveDate,
    /// Exclusive end of the range, or the inclusive end of an upload window.
    pub to: NaiveDate,
    pub selection: Selection,
    pub dry_run: bool,
    /// Overrides `publish.enabled` from the config when set.
    pub upload: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub selection: Selection,
    pub dry_run: bool,
    pub dates: Vec<DateReport>,
}

impl RunSummary {
    pub fn issue_count(&self) -> usize {
        self.dates
            .iter()
            .map(|date| {
                date.issues.len() + date.rooms.iter().map(|room| room.issues.len()).sum::<usize>()
            })
            .sum()
    }

    pub fn files_written(&self) -> usize {
        self.dates
            .iter()
            .flat_map(|date| &date.rooms)
            .filter(|room| room.rows > 0)
            .count()
    }

    /// Plain-text body for the terminal notification.
    pub fn message(&self) -> String {
        let mut lines = vec![format!(
            "BMS repack finished for {} to {}: {} dates, {} files written, {} issues",
            self.from,
            self.to,
            self.dates.len(),
            self.files_written(),
            self.issue_count()
        )];
        for date in &self.dates {
            for issue in &date.issues {
                lines.push(format!("{}: {issue}", date.date));
            }
            for room in &date.rooms {
                for issue in &room.issues {
                    lines.push(format!("{}: {issue}", date.date));
                }
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DateReport {
    pub date: NaiveDate,
    pub archive: Option<String>,
    pub extracted: usize,
    pub rooms: Vec<RoomReport>,
    pub issues: Vec<Issue>,
}

impl DateReport {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            archive: None,
            extracted: 0,
            rooms: Vec::new(),
            issues: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomReport {
    pub room: RoomNumber,
    pub file: String,
    pub policy: WritePolicy,
    pub rows: usize,
    pub uploaded: bool,
    pub missing_sensors: Vec<SensorKind>,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocateResult {
    pub date: NaiveDate,
    pub archive: Archive,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub removed: usize,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<C: RepositoryClient, N: Notifier> {
    config: RunConfig,
    store: Store,
    client: C,
    notifier: N,
}

impl<C: RepositoryClient, N: Notifier> App<C, N> {
    pub fn new(config: RunConfig, store: Store, client: C, notifier: N) -> Self {
        Self {
            config,
            store,
            client,
            notifier,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Processes every date in `[from, to)` and sends the terminal
    /// notification. Dry runs only locate archives and notify nobody.
    pub fn run(
        &self,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, RepackError> {
        let empty = match options.selection {
            Selection::ArchiveDate => options.from >= options.to,
            Selection::UploadWindow => options.from > options.to,
        };
        if empty {
            return Err(RepackError::InvalidDateRange {
                from: options.from.to_string(),
                to: options.to.to_string(),
            });
        }

        let result = self.run_dates(options, sink);
        if options.dry_run {
            return result;
        }
        match &result {
            Ok(summary) => self.send(&Notification::success(summary.message())),
            Err(err) => self.send(&Notification::error(format!(
                "BMS repack failed for {} to {}: {err}",
                options.from, options.to
            ))),
        }
        result
    }

    pub fn locate(
        &self,
        date: NaiveDate,
        sink: &dyn ProgressSink,
    ) -> Result<LocateResult, RepackError> {
        sink.event(ProgressEvent {
            message: format!("phase=Locate; searching archive for {date}"),
            elapsed: None,
        });
        let archive = ArchiveLocator::new(&self.client, &self.config.archive_prefix).locate(date)?;
        Ok(LocateResult { date, archive })
    }

    pub fn clear(&self, sink: &dyn ProgressSink) -> Result<ClearResult, RepackError> {
        sink.event(ProgressEvent {
            message: "phase=Store; clearing staging directory".to_string(),
            elapsed: None,
        });
        let removed = self.store.clear_staging()?;
        Ok(ClearResult { removed })
    }

    fn run_dates(
        &self,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, RepackError> {
        if !options.dry_run {
            self.store.ensure_roots()?;
        }
        let publish = self.publish_settings(options);

        let mut dates = Vec::new();
        match options.selection {
            Selection::ArchiveDate => {
                for date in options.from.iter_days().take_while(|date| *date < options.to) {
                    let started = Instant::now();
                    sink.event(ProgressEvent {
                        message: format!("phase=Date; processing {date}"),
                        elapsed: None,
                    });
                    let report = self.process_date(date, options.dry_run, &publish, sink)?;
                    sink.event(ProgressEvent {
                        message: format!("phase=Date; {date} done, {} rooms", report.rooms.len()),
                        elapsed: Some(started.elapsed()),
                    });
                    dates.push(report);
                }
            }
            Selection::UploadWindow => {
                let started = Instant::now();
                sink.event(ProgressEvent {
                    message: format!(
                        "phase=Locate; archive uploaded {} to {}",
                        options.from, options.to
                    ),
                    elapsed: None,
                });
                let located = ArchiveLocator::new(&self.client, &self.config.archive_prefix)
                    .locate_uploaded(options.from, options.to);
                let report = self.process_located(
                    options.from,
                    located,
                    options.dry_run,
                    &publish,
                    sink,
                )?;
                sink.event(ProgressEvent {
                    message: format!("phase=Date; {} done", report.date),
                    elapsed: Some(started.elapsed()),
                });
                dates.push(report);
            }
        }

        Ok(RunSummary {
            from: options.from,
            to: options.to,
            selection: options.selection,
            dry_run: options.dry_run,
            dates,
        })
    }

    fn process_date(
        &self,
        date: NaiveDate,
        dry_run: bool,
        publish: &PublishSettings,
        sink: &dyn ProgressSink,
    ) -> Result<DateReport, RepackError> {
        let located = ArchiveLocator::new(&self.client, &self.config.archive_prefix).locate(date);
        self.process_located(date, located, dry_run, publish, sink)
    }

    /// Applies the missing-archive policy, then fetches and publishes the
    /// archive. The report carries the archive's own date when one was found.
    fn process_located(
        &self,
        requested: NaiveDate,
        located: Result<Archive, RepackError>,
        dry_run: bool,
        publish: &PublishSettings,
        sink: &dyn ProgressSink,
    ) -> Result<DateReport, RepackError> {
        let archive = match located {
            Ok(archive) => archive,
            Err(err @ RepackError::ArchiveCardinality { .. })
                if self.config.on_missing_archive == MissingArchivePolicy::Skip =>
            {
                let issue = Issue::ArchiveSkipped {
                    date: requested,
                    reason: err.to_string(),
                };
                tracing::warn!("{issue}");
                let mut report = DateReport::new(requested);
                report.issues.push(issue);
                return Ok(report);
            }
            Err(err) => return Err(err),
        };
        let mut report = DateReport::new(archive.date);
        report.archive = Some(archive.filename.clone());
        if dry_run {
            return Ok(report);
        }

        let removed = self.store.clear_staging()?;
        tracing::debug!(removed, "staging cleared");

        sink.event(ProgressEvent {
            message: format!("phase=Fetch; downloading {}", archive.filename),
            elapsed: None,
        });
        let fetcher =
            ArchiveFetcher::new(&self.client, &self.store, self.config.expected_file_count);
        let fetched = fetcher.fetch(&archive)?;
        report.extracted = fetched.extracted.len();
        report.issues.extend(fetched.issues);

        let listing = fs_util::list_files(self.store.staging_root().as_std_path())?;
        let aligner = SeriesAligner::new(
            FiveMinuteGrid::for_date(archive.date),
            &self.config.timestamp_formats,
        );
        let checker = RemoteExistenceChecker::new(&self.client, self.config.existence);
        let publisher = PublishStep::new(
            &self.client,
            &self.store,
            publish,
            self.config.header_block,
            &self.config.archive_prefix,
        );

        for room in RoomNumber::all() {
            sink.event(ProgressEvent {
                message: format!("phase=Room; room {room}"),
                elapsed: None,
            });
            let files = RoomFileSet::from_listing(
                &listing,
                self.store.staging_root(),
                &self.config.room_file_prefix,
                room,
            )?;
            if !files.is_complete() {
                tracing::debug!(room = %room, "incomplete sensor set");
            }
            let name = RemoteFileName::new(&self.config.facility, room, archive.date);
            let remote = checker.check(&name)?;
            let aligned = aligner.align_room(&files);
            let record = RoomRecord::build(&aligner.grid(), &aligned);
            let outcome = publisher.publish(&record, &name, &remote)?;

            let mut issues = files.issues;
            issues.extend(aligned.issues.iter().cloned());
            report.rooms.push(RoomReport {
                room,
                file: outcome.file,
                policy: outcome.policy,
                rows: outcome.rows_written,
                uploaded: outcome.uploaded,
                missing_sensors: aligned.missing_sensors(),
                issues,
            });
        }

        Ok(report)
    }

    fn publish_settings(&self, options: &RunOptions) -> PublishSettings {
        let mut settings = self.config.publish.clone();
        if let Some(upload) = options.upload {
            settings.enabled = upload;
        }
        settings
    }

    fn send(&self, notification: &Notification) {
        if let Err(err) = self.notifier.notify(notification) {
            tracing::error!(error = %err, "failed to send notification");
        }
    }
}
