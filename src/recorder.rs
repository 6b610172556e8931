use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::drivers::{AcquiredBlock, DaqError, TimeSeriesFrame};
use crate::types::Scaling;

/// How long a file message stays in the status bar.
pub const MESSAGE_TTL: Duration = Duration::from_secs(5);

/// One acquisition as written to disk. Channel values are raw volts;
/// `prefactor` and `unit` describe how they were displayed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub prefactor: f64,
    #[serde(alias = "scaling")]
    pub unit: String,
    pub rate: f64,
    pub points: usize,
    #[serde(default)]
    pub dropped: u64,
    pub channels: BTreeMap<String, Vec<f64>>,
}

impl Snapshot {
    pub fn capture(block: &AcquiredBlock, scaling: &Scaling) -> Self {
        let frame = &block.frame;
        let channels = frame
            .channel_labels
            .iter()
            .cloned()
            .zip(frame.samples.iter().cloned())
            .collect();
        Self {
            prefactor: scaling.prefactor,
            unit: scaling.unit.clone(),
            rate: frame.sample_rate_hz,
            points: frame.points(),
            dropped: block.dropped,
            channels,
        }
    }

    pub fn validate(&self) -> Result<(), DaqError> {
        if self.channels.is_empty() {
            return Err(DaqError::InvalidSnapshot("no channels".into()));
        }
        if !(self.rate.is_finite() && self.rate > 0.0) {
            return Err(DaqError::InvalidSnapshot(format!("rate {}", self.rate)));
        }
        if !self.prefactor.is_finite() {
            return Err(DaqError::InvalidSnapshot(format!(
                "prefactor {}",
                self.prefactor
            )));
        }
        if let Some((name, values)) = self
            .channels
            .iter()
            .find(|(_, values)| values.len() != self.points)
        {
            return Err(DaqError::InvalidSnapshot(format!(
                "{name} has {} points, expected {}",
                values.len(),
                self.points
            )));
        }
        Ok(())
    }

    pub fn scaling(&self) -> Scaling {
        Scaling {
            prefactor: self.prefactor,
            unit: self.unit.clone(),
        }
    }

    /// Channels in input order (AIN2 before AIN10).
    pub fn to_frame(&self) -> TimeSeriesFrame {
        let mut channels: Vec<(&String, &Vec<f64>)> = self.channels.iter().collect();
        channels.sort_by_key(|(name, _)| channel_sort_key(name));
        TimeSeriesFrame {
            sample_rate_hz: self.rate,
            channel_labels: channels.iter().map(|(name, _)| (*name).clone()).collect(),
            samples: channels.into_iter().map(|(_, values)| values.clone()).collect(),
        }
    }
}

fn channel_sort_key(name: &str) -> (String, u32) {
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    let (prefix, number) = name.split_at(name.len() - digits);
    (prefix.to_owned(), number.parse().unwrap_or(0))
}

/// Writes `snapshot` to `path` through a temporary file in the same folder.
/// On failure the temporary file is removed and `path` is left untouched.
pub fn save_once(snapshot: &Snapshot, path: &Path) -> Result<(), DaqError> {
    snapshot.validate()?;
    let folder = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(folder)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, snapshot)?;
        writer.flush()?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    info!(
        "wrote {} ({} channels x {} points)",
        path.display(),
        snapshot.channels.len(),
        snapshot.points
    );
    Ok(())
}

pub fn load_one(path: &Path) -> Result<Snapshot, DaqError> {
    let reader = BufReader::new(File::open(path)?);
    let snapshot: Snapshot = serde_json::from_reader(reader)?;
    snapshot.validate()?;
    Ok(snapshot)
}

/// First free `<folder>/<stamp>_<NN>.json` for the given time.
pub fn next_filename(folder: &Path, now: DateTime<Local>) -> PathBuf {
    let stamp = now.format("%Y-%m-%dT%H%M%S");
    let mut index = 0u32;
    loop {
        let candidate = folder.join(format!("{stamp}_{index:02}.json"));
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}

/// Save-all queue plus the file part of the status bar.
#[derive(Default)]
pub struct Recorder {
    folder: Option<PathBuf>,
    pending: VecDeque<Snapshot>,
    message: Option<(String, Instant)>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_saving_all(&self) -> bool {
        self.folder.is_some()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn set_save_all(&mut self, folder: PathBuf) -> Result<(), DaqError> {
        fs::create_dir_all(&folder)?;
        if self.folder.as_ref().is_some_and(|old| *old != folder) {
            self.flush();
        }
        info!("saving all acquisitions to {}", folder.display());
        self.folder = Some(folder);
        self.message = None;
        Ok(())
    }

    /// Turns save-all off after writing whatever is still queued.
    pub fn clear_save_all(&mut self) {
        self.flush();
        if let Some(folder) = self.folder.take() {
            info!("stopped saving to {}", folder.display());
        }
    }

    /// Queues a completed block; ignored unless save-all is on.
    pub fn enqueue(&mut self, snapshot: Snapshot) {
        if self.folder.is_some() {
            self.pending.push_back(snapshot);
        }
    }

    /// Writes the oldest queued snapshot. Returns false when nothing was queued.
    pub fn write_next(&mut self) -> bool {
        let Some(folder) = self.folder.clone() else {
            return false;
        };
        let Some(snapshot) = self.pending.pop_front() else {
            return false;
        };
        let path = next_filename(&folder, Local::now());
        if let Err(e) = save_once(&snapshot, &path) {
            error!("failed to write {}: {e}", path.display());
            self.note(format!("Failed to write {}: {e}", path.display()));
        }
        true
    }

    pub fn flush(&mut self) {
        let queued = self.pending.len();
        while self.write_next() {}
        if queued > 0 {
            info!("flushed {queued} queued acquisitions");
        }
        if !self.pending.is_empty() {
            warn!("dropping {} unsaved acquisitions", self.pending.len());
            self.pending.clear();
        }
    }

    /// "Save last": one file at a path chosen by the user.
    pub fn save_one(&mut self, snapshot: &Snapshot, path: &Path) -> Result<(), DaqError> {
        match save_once(snapshot, path) {
            Ok(()) => {
                self.note(format!("Saved {}.", path.display()));
                Ok(())
            }
            Err(e) => {
                error!("failed to write {}: {e}", path.display());
                self.note(format!("Failed to write {}: {e}", path.display()));
                Err(e)
            }
        }
    }

    pub fn note(&mut self, message: String) {
        self.message = Some((message, Instant::now()));
    }

    pub fn status(&self, now: Instant) -> String {
        if let Some((message, at)) = &self.message {
            if now.saturating_duration_since(*at) < MESSAGE_TTL {
                return message.clone();
            }
        }
        match &self.folder {
            Some(folder) => format!("Saving all to {}.", folder.display()),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::fft;
    use chrono::TimeZone;

    fn block() -> AcquiredBlock {
        AcquiredBlock {
            frame: TimeSeriesFrame {
                sample_rate_hz: 1000.0,
                channel_labels: vec!["AIN0".into(), "AIN1".into()],
                samples: vec![vec![0.25, -1.5, 3.0, 0.0], vec![1.0, 2.0, -0.125, 7.5]],
            },
            dropped: 3,
        }
    }

    fn scaling() -> Scaling {
        Scaling {
            prefactor: 0.1,
            unit: "m$^2$/s".into(),
        }
    }

    #[test]
    fn saved_raw_values_reproduce_displayed_series() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last.json");
        let block = block();
        let displayed = fft::compute(&block.frame, scaling().prefactor).unwrap();
        save_once(&Snapshot::capture(&block, &scaling()), &path).unwrap();

        let loaded = load_one(&path).unwrap();
        assert_eq!(loaded.points, 4);
        assert_eq!(loaded.dropped, 3);
        assert_eq!(loaded.unit, "m$^2$/s");
        let frame = loaded.to_frame();
        assert_eq!(frame.samples, block.frame.samples);
        let replayed = fft::compute(&frame, loaded.prefactor).unwrap();
        assert_eq!(replayed.scaled, displayed.scaled);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_save_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        // a directory in the way makes the final rename fail
        let path = dir.path().join("x.json");
        fs::create_dir(&path).unwrap();
        let mut recorder = Recorder::new();
        let result = recorder.save_one(&Snapshot::capture(&block(), &scaling()), &path);
        assert!(matches!(result, Err(DaqError::Io(_))));
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["x.json"]);
        assert!(path.is_dir());
        assert!(recorder.status(Instant::now()).starts_with("Failed to write "));
    }

    #[test]
    fn writes_keys_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("order.json");
        save_once(&Snapshot::capture(&block(), &scaling()), &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let keys = ["\"prefactor\"", "\"unit\"", "\"rate\"", "\"points\"", "\"dropped\"", "\"channels\""];
        let positions: Vec<usize> = keys.iter().map(|k| text.find(k).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn load_accepts_scaling_alias_and_rejects_bad_counts() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("old.json");
        fs::write(
            &good,
            r#"{"prefactor": 2.0, "scaling": "V", "rate": 10.0, "points": 2,
                "channels": {"AIN10": [1.0, 2.0], "AIN2": [3.0, 4.0]}}"#,
        )
        .unwrap();
        let snapshot = load_one(&good).unwrap();
        assert_eq!(snapshot.unit, "V");
        assert_eq!(snapshot.dropped, 0);
        assert_eq!(snapshot.to_frame().channel_labels, vec!["AIN2", "AIN10"]);

        let bad = dir.path().join("bad.json");
        fs::write(
            &bad,
            r#"{"prefactor": 1.0, "unit": "V", "rate": 10.0, "points": 3,
                "channels": {"AIN0": [1.0, 2.0]}}"#,
        )
        .unwrap();
        assert!(matches!(load_one(&bad), Err(DaqError::InvalidSnapshot(_))));
        assert!(matches!(
            load_one(&dir.path().join("missing.json")),
            Err(DaqError::Io(_))
        ));
    }

    #[test]
    fn filenames_take_first_free_index() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let first = next_filename(dir.path(), now);
        assert_eq!(first.file_name().unwrap(), "2024-03-09T140507_00.json");
        fs::write(&first, "{}").unwrap();
        let second = next_filename(dir.path(), now);
        assert_eq!(second.file_name().unwrap(), "2024-03-09T140507_01.json");
    }

    #[test]
    fn save_all_writes_one_per_call_and_flushes_on_clear() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("session");
        let mut recorder = Recorder::new();
        recorder.enqueue(Snapshot::capture(&block(), &scaling()));
        assert_eq!(recorder.pending(), 0);

        recorder.set_save_all(folder.clone()).unwrap();
        assert!(folder.is_dir());
        for _ in 0..3 {
            recorder.enqueue(Snapshot::capture(&block(), &scaling()));
        }
        assert!(recorder.write_next());
        assert_eq!(recorder.pending(), 2);
        assert_eq!(fs::read_dir(&folder).unwrap().count(), 1);

        recorder.clear_save_all();
        assert!(!recorder.is_saving_all());
        assert_eq!(recorder.pending(), 0);
        assert_eq!(fs::read_dir(&folder).unwrap().count(), 3);
        assert!(!recorder.write_next());
    }

    #[test]
    fn file_messages_expire() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new();
        let now = Instant::now();
        assert_eq!(recorder.status(now), "");
        recorder.set_save_all(dir.path().to_path_buf()).unwrap();
        let idle = format!("Saving all to {}.", dir.path().display());
        assert_eq!(recorder.status(now), idle);

        let path = dir.path().join("x.json");
        recorder.save_one(&Snapshot::capture(&block(), &scaling()), &path).unwrap();
        let shown = Instant::now();
        assert!(recorder.status(shown).starts_with("Saved "));
        assert_eq!(recorder.status(shown + MESSAGE_TTL), idle);
    }
}
