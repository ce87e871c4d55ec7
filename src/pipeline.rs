//! Drives book units through the build and send stages.
//!
//! Units are processed one at a time. A failing stage drops the unit from the
//! run with a skip reason; the run itself carries on with the next unit.

use crate::book::{BookUnit, BuildContext, SendOutcome, Stage};
use crate::catalog::{CatalogEntry, HostMetadata};
use crate::config::PipelineConfig;
use crate::device::DeviceLocator;
use crate::error::{DeviceError, StageError};
use crate::remote::Connections;
use crate::xray::IndexBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receives progress as a fraction in `0.0..1.0` plus a status line.
pub trait ProgressReporter {
    fn report(&self, fraction: f64, message: &str);
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _fraction: f64, _message: &str) {}
}

/// Cooperative cancellation, checked before every stage.
#[derive(Debug, Default, Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened during a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Books that finished every stage.
    pub updated: Vec<String>,
    /// Books whose X-Ray was copied to the device.
    pub sent: Vec<String>,
    /// One line per dropped book.
    pub skipped: Vec<String>,
    /// The run stopped early on request.
    pub cancelled: bool,
}

/// A run over a set of books.
pub struct Pipeline<'a, B: IndexBuilder> {
    builder: &'a B,
    host: &'a dyn HostMetadata,
    locator: Option<&'a DeviceLocator>,
    connections: &'a mut Connections,
    options: PipelineConfig,
    cancel: CancelFlag,
    units: Vec<BookUnit<B>>,
    rejected: Vec<String>,
}

impl<'a, B: IndexBuilder> Pipeline<'a, B> {
    pub fn new(
        builder: &'a B,
        host: &'a dyn HostMetadata,
        connections: &'a mut Connections,
        options: PipelineConfig,
    ) -> Self {
        Self {
            builder,
            host,
            locator: None,
            connections,
            options,
            cancel: CancelFlag::new(),
            units: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Sets the locator used to find an attached device.
    pub fn with_device(mut self, locator: &'a DeviceLocator) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Creates a unit per entry. Incomplete entries are kept as skip reasons.
    pub fn add_books<'e>(
        &mut self,
        entries: impl IntoIterator<Item = &'e CatalogEntry>,
        documents_dir: &Path,
    ) {
        for entry in entries {
            match BookUnit::from_entry(entry, documents_dir) {
                Ok(unit) => self.units.push(unit),
                Err(reason) => {
                    tracing::warn!(book_id = entry.id, %reason, "Rejected catalog entry");
                    self.rejected.push(reason);
                }
            }
        }
    }

    /// Units still active in this run.
    pub fn units(&self) -> &[BookUnit<B>] {
        &self.units
    }

    /// Builds an X-Ray for every unit, then sends it to the device when
    /// enabled.
    ///
    /// Progress for stage `k` of unit `i` is `(i * stages + k) / (n * stages)`.
    /// Without an attached device the send stage is skipped quietly.
    pub async fn create_indexes(&mut self, progress: &dyn ProgressReporter) -> RunReport {
        let mut report = RunReport {
            skipped: std::mem::take(&mut self.rejected),
            ..RunReport::default()
        };

        let mut stages = Stage::BUILD.to_vec();
        if self.options.send_to_device {
            stages.push(Stage::SendToDevice);
        }
        let stage_count = stages.len();

        let units = std::mem::take(&mut self.units);
        let total = units.len();
        let mut survivors = Vec::with_capacity(total);
        let mut ctx = BuildContext {
            builder: self.builder,
            host: self.host,
            connections: &mut *self.connections,
            spoilers: self.options.spoilers,
        };

        let mut pending = units.into_iter().enumerate();
        while let Some((i, mut unit)) = pending.next() {
            let name = unit.display_name();
            let mut failure = None;
            let mut sent = false;

            for &stage in &stages {
                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    break;
                }

                let fraction = (i * stage_count + stage.offset()) as f64 / (total * stage_count) as f64;
                let result = if stage == Stage::SendToDevice {
                    match locate(self.locator) {
                        Some(root) => {
                            progress.report(fraction, &stage.status(&name));
                            match unit
                                .send_to_device(&root, &mut ctx, self.options.create_missing_index)
                                .await
                            {
                                Ok(outcome) => {
                                    sent = matches!(outcome, SendOutcome::Sent { .. });
                                    Ok(())
                                }
                                Err(err) => Err(err),
                            }
                        }
                        None => Ok(()),
                    }
                } else {
                    progress.report(fraction, &stage.status(&name));
                    unit.run_stage(stage, &mut ctx).await
                };

                if let Err(err) = result {
                    failure = Some((stage, err));
                    break;
                }
            }

            if report.cancelled {
                tracing::info!(book = %name, "Run cancelled");
                survivors.push(unit);
                survivors.extend(pending.map(|(_, unit)| unit));
                break;
            }

            if let Some((stage, err)) = failure {
                report.skipped.push(skip_reason(&name, stage, &err));
                continue;
            }

            report.updated.push(name.clone());
            if sent {
                report.sent.push(name);
            }
            survivors.push(unit);
        }

        self.units = survivors;
        report
    }

    /// Sends existing X-Rays to the attached device, building missing ones
    /// when enabled.
    ///
    /// Fails as a whole when no device is attached.
    pub async fn send_indexes(
        &mut self,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport, DeviceError> {
        let root = self.locator.ok_or(DeviceError::NotFound)?.require()?;

        let mut report = RunReport {
            skipped: std::mem::take(&mut self.rejected),
            ..RunReport::default()
        };

        let units = std::mem::take(&mut self.units);
        let total = units.len();
        let mut survivors = Vec::with_capacity(total);
        let mut ctx = BuildContext {
            builder: self.builder,
            host: self.host,
            connections: &mut *self.connections,
            spoilers: self.options.spoilers,
        };

        let mut pending = units.into_iter().enumerate();
        while let Some((i, mut unit)) = pending.next() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                survivors.push(unit);
                survivors.extend(pending.map(|(_, unit)| unit));
                break;
            }

            let name = unit.display_name();
            progress.report(
                i as f64 / total as f64,
                &Stage::SendToDevice.status(&name),
            );

            match unit
                .send_to_device(&root, &mut ctx, self.options.create_missing_index)
                .await
            {
                Ok(SendOutcome::Sent { .. }) => {
                    report.updated.push(name.clone());
                    report.sent.push(name);
                    survivors.push(unit);
                }
                Ok(outcome) => {
                    tracing::debug!(book = %name, ?outcome, "Nothing sent");
                    survivors.push(unit);
                }
                Err(err) => {
                    report
                        .skipped
                        .push(skip_reason(&name, Stage::SendToDevice, &err));
                }
            }
        }

        self.units = survivors;
        Ok(report)
    }
}

fn locate(locator: Option<&DeviceLocator>) -> Option<PathBuf> {
    match locator?.find() {
        Ok(root) => root,
        Err(err) => {
            tracing::warn!(error = %err, "Could not look for an attached device");
            None
        }
    }
}

fn skip_reason(name: &str, stage: Stage, err: &StageError) -> String {
    let reason = match stage {
        Stage::SendToDevice => format!("{} skipped because could not send X-Ray to device: {}.", name, err),
        _ => format!("{} skipped because {}.", name, err),
    };
    tracing::warn!(book = %name, ?stage, error = %err, "Skipped book");
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asin::Asin;
    use crate::config::RemoteConfig;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct NoHost;

    impl HostMetadata for NoHost {
        fn identifier(&self, _book_id: u64) -> Option<String> {
            None
        }
    }

    struct NeverBuilds;

    #[async_trait]
    impl IndexBuilder for NeverBuilds {
        type RemoteData = ();
        type BookData = ();

        async fn parse_remote_data(
            &self,
            _connections: &mut Connections,
            _url: &str,
            _spoilers: bool,
        ) -> anyhow::Result<()> {
            anyhow::bail!("unreachable in these tests")
        }

        fn parse_book_data(&self, _book_path: &Path, _remote: &()) -> anyhow::Result<()> {
            anyhow::bail!("unreachable in these tests")
        }

        fn write_index(
            &self,
            _index_dir: &Path,
            _asin: &Asin,
            _remote_url: &str,
            _book: &(),
        ) -> anyhow::Result<PathBuf> {
            anyhow::bail!("unreachable in these tests")
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(f64, String)>>);

    impl ProgressReporter for Recorder {
        fn report(&self, fraction: f64, message: &str) {
            self.0.lock().unwrap().push((fraction, message.to_string()));
        }
    }

    fn connections() -> Connections {
        Connections::open(&RemoteConfig::default()).unwrap()
    }

    fn entries() -> Vec<CatalogEntry> {
        vec![
            CatalogEntry {
                id: 1,
                title: "One".to_string(),
                title_sort: "One".to_string(),
                author: "A".to_string(),
                author_sort: "A".to_string(),
                path: Some(PathBuf::from("/nonexistent/one.mobi")),
                asin: Some("B000000001".to_string()),
            },
            CatalogEntry {
                id: 2,
                ..CatalogEntry::default()
            },
        ]
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let builder = NeverBuilds;
        let mut connections = connections();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let mut pipeline = Pipeline::new(&builder, &NoHost, &mut connections, PipelineConfig::default())
            .with_cancel(cancel);
        pipeline.add_books(&entries(), Path::new("documents"));
        assert_eq!(pipeline.units().len(), 1);

        let recorder = Recorder::default();
        let report = pipeline.create_indexes(&recorder).await;
        assert!(report.cancelled);
        assert!(recorder.0.lock().unwrap().is_empty());
        assert_eq!(pipeline.units().len(), 1);
        assert_eq!(
            report.skipped,
            vec!["Unknown book with id 2 missing book path, title and/or author.".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_patch_skips_unit() {
        let builder = NeverBuilds;
        let mut connections = connections();
        let options = PipelineConfig {
            send_to_device: false,
            ..PipelineConfig::default()
        };

        let mut pipeline = Pipeline::new(&builder, &NoHost, &mut connections, options);
        pipeline.add_books(&entries()[..1], Path::new("documents"));

        let recorder = Recorder::default();
        let report = pipeline.create_indexes(&recorder).await;
        assert!(!report.cancelled);
        assert!(pipeline.units().is_empty());
        assert!(report.updated.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].starts_with("One - A skipped because "));

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], (0.0, "Updating One - A ASIN".to_string()));
    }

    #[tokio::test]
    async fn test_send_without_device_is_fatal() {
        let builder = NeverBuilds;
        let mut connections = connections();
        let mut pipeline =
            Pipeline::new(&builder, &NoHost, &mut connections, PipelineConfig::default());
        pipeline.add_books(&entries(), Path::new("documents"));

        let result = pipeline.send_indexes(&NoProgress).await;
        assert!(matches!(result, Err(DeviceError::NotFound)));
        assert_eq!(pipeline.units().len(), 1);
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let handle = flag.clone();
        assert!(!flag.is_cancelled());
        handle.cancel();
        assert!(flag.is_cancelled());
    }
}
