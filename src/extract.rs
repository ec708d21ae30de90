//! Bulk time-windowed extraction.
//!
//! [`iterate_over_series`] walks `[start, end)` in fixed windows. For every window the symbol
//! list is cut into chunks of `request_batch_size` and the chunks are fetched concurrently,
//! at most `parallel_factor` at a time, by [`execute_parallel_query`]. The rows of all chunks
//! become one [`Frame`] per window, which is handed to a [`WindowSink`].
//!
//! A failed fan-out retries the whole window, never a single chunk. Row order across chunks
//! follows completion order; sort afterwards if a stable order matters.

use crate::api::DataApi;
use crate::error::MarqueeError;
use crate::pagination::progress_bar;
use crate::rest::types::DataQuery;
use crate::types::{Frame, TimeCadence};

use chrono::{NaiveDateTime, TimeDelta, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::fmt;
use std::fs::{self, File};
use std::future::Future;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_REQUEST_BATCH_SIZE: usize = 4;
pub const MAX_REQUEST_BATCH_SIZE: usize = 4;
pub const DEFAULT_PARALLEL_FACTOR: usize = 5;
/// Extra attempts for a window after its first fan-out fails.
pub const WINDOW_RETRIES: u32 = 3;

/// Longest window accepted for intraday datasets.
pub fn max_intraday_delta() -> TimeDelta {
    TimeDelta::hours(5)
}

/// Half-open `[start, end)` slice of the extraction range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Window {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// Query covering this window. Date datasets query whole days, so the exclusive end
    /// becomes the previous calendar day.
    pub fn query(&self, cadence: TimeCadence) -> DataQuery {
        match cadence {
            TimeCadence::Date => {
                let first = self.start.date();
                let last = (self.end - TimeDelta::days(1)).date().max(first);
                DataQuery {
                    start_date: Some(first),
                    end_date: Some(last),
                    ..Default::default()
                }
            }
            TimeCadence::Time => DataQuery {
                start_time: Some(self.start.and_utc()),
                end_time: Some(self.end.and_utc()),
                ..Default::default()
            },
        }
    }

    /// Consecutive windows of `delta` from `start`; the last one is cut at `end`.
    fn split(
        start: NaiveDateTime,
        end: NaiveDateTime,
        delta: TimeDelta,
    ) -> Result<Vec<Window>, MarqueeError> {
        let mut windows = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let next = cursor.checked_add_signed(delta).ok_or_else(|| {
                MarqueeError::Value(format!("window after {cursor} is out of range"))
            })?;
            windows.push(Window::new(cursor, next.min(end)));
            cursor = next;
        }
        Ok(windows)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// What the extraction needs to know about a dataset up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetProfile {
    pub cadence: TimeCadence,
    pub history_start: Option<NaiveDateTime>,
    pub symbol_dimension: String,
}

/// Anything that can return the rows of a set of symbols over one window.
pub trait SeriesSource: Send + Sync {
    fn profile(&self) -> impl Future<Output = Result<DatasetProfile, MarqueeError>> + Send;

    fn fetch_series(
        &self,
        symbols: &[String],
        window: &Window,
    ) -> impl Future<Output = Result<Frame, MarqueeError>> + Send;
}

/// A dataset reached through [`DataApi`]. The profile comes from the cached definition.
#[derive(Debug, Clone)]
pub struct Dataset {
    api: DataApi,
    id: String,
}

impl Dataset {
    pub fn new(api: DataApi, id: impl Into<String>) -> Self {
        Self { api, id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl SeriesSource for Dataset {
    async fn profile(&self) -> Result<DatasetProfile, MarqueeError> {
        let definition = self.api.get_definition(&self.id).await?;
        Ok(DatasetProfile {
            cadence: definition.time_cadence()?,
            history_start: definition.history_start()?,
            symbol_dimension: definition.symbol_dimension()?.to_string(),
        })
    }

    async fn fetch_series(&self, symbols: &[String], window: &Window) -> Result<Frame, MarqueeError> {
        let profile = self.profile().await?;
        let query = window
            .query(profile.cadence)
            .with_where(profile.symbol_dimension, symbols.iter().cloned());
        self.api.query_data(&self.id, &query).await
    }
}

/// Receives one consolidated frame per window, in window order.
pub trait WindowSink {
    fn write_window(&mut self, window: &Window, frame: Frame) -> Result<(), MarqueeError>;
}

impl<F> WindowSink for F
where
    F: FnMut(&Window, Frame) -> Result<(), MarqueeError>,
{
    fn write_window(&mut self, window: &Window, frame: Frame) -> Result<(), MarqueeError> {
        self(window, frame)
    }
}

/// Writes each window to its own CSV file inside a timestamped directory.
#[derive(Debug, Clone)]
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    /// Create `<base>/<name>_<UTC timestamp>/`.
    pub fn create(base: impl AsRef<Path>, name: &str) -> Result<Self, MarqueeError> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let dir = base.as_ref().join(format!("{name}_{stamp}"));
        fs::create_dir_all(&dir)?;
        info!(path = %dir.display(), "writing extraction output");
        Ok(Self { dir })
    }

    /// [`create`](Self::create) under the current working directory.
    pub fn in_current_dir(name: &str) -> Result<Self, MarqueeError> {
        Self::create(std::env::current_dir()?, name)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, window: &Window) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.csv",
            window.start.format("%Y%m%dT%H%M%S"),
            window.end.format("%Y%m%dT%H%M%S")
        ))
    }
}

impl WindowSink for CsvSink {
    fn write_window(&mut self, window: &Window, frame: Frame) -> Result<(), MarqueeError> {
        let path = self.file_for(window);
        let file = File::create(&path)?;
        frame.write_csv(BufWriter::new(file))?;
        info!(path = %path.display(), rows = frame.len(), "wrote window");
        Ok(())
    }
}

/// Settings for [`iterate_over_series`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Window length; one day for date datasets and one hour for intraday ones when unset.
    pub delta: Option<TimeDelta>,
    pub request_batch_size: usize,
    pub parallel_factor: usize,
}

impl ExtractOptions {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            start,
            end,
            delta: None,
            request_batch_size: DEFAULT_REQUEST_BATCH_SIZE,
            parallel_factor: DEFAULT_PARALLEL_FACTOR,
        }
    }

    pub fn with_delta(mut self, delta: TimeDelta) -> Self {
        self.delta = Some(delta);
        self
    }

    pub fn with_request_batch_size(mut self, size: usize) -> Self {
        self.request_batch_size = size;
        self
    }

    pub fn with_parallel_factor(mut self, factor: usize) -> Self {
        self.parallel_factor = factor;
        self
    }

    fn resolve_delta(&self, cadence: TimeCadence) -> Result<TimeDelta, MarqueeError> {
        let delta = self.delta.unwrap_or(match cadence {
            TimeCadence::Date => TimeDelta::days(1),
            TimeCadence::Time => TimeDelta::hours(1),
        });
        if delta <= TimeDelta::zero() {
            return Err(MarqueeError::Value(format!(
                "window delta must be positive, got {delta}"
            )));
        }
        match cadence {
            TimeCadence::Time if delta > max_intraday_delta() => Err(MarqueeError::Value(format!(
                "intraday window {delta} exceeds five hours"
            ))),
            TimeCadence::Date if delta.num_seconds() % 86_400 != 0 || delta.subsec_nanos() != 0 => {
                Err(MarqueeError::Value(format!(
                    "date dataset window must be whole days, got {delta}"
                )))
            }
            _ => Ok(delta),
        }
    }
}

fn validate_fan_out(request_batch_size: usize, parallel_factor: usize) -> Result<(), MarqueeError> {
    if !(1..=MAX_REQUEST_BATCH_SIZE).contains(&request_batch_size) {
        return Err(MarqueeError::Value(format!(
            "request_batch_size must be 1..={MAX_REQUEST_BATCH_SIZE}, got {request_batch_size}"
        )));
    }
    if parallel_factor == 0 {
        return Err(MarqueeError::Value(
            "parallel_factor must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Fetch every chunk of `symbols` for one window and concatenate the rows.
///
/// Any chunk failure restarts the whole window, up to [`WINDOW_RETRIES`] more times.
/// After that the last error is returned inside [`MarqueeError::RetriesExhausted`] naming
/// the window.
pub async fn execute_parallel_query<S>(
    source: &S,
    symbols: &[String],
    window: &Window,
    request_batch_size: usize,
    parallel_factor: usize,
) -> Result<Frame, MarqueeError>
where
    S: SeriesSource + ?Sized,
{
    validate_fan_out(request_batch_size, parallel_factor)?;

    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let frames: Result<Vec<Frame>, MarqueeError> = stream::iter(symbols.chunks(request_batch_size))
            .map(|chunk| async move {
                debug!(window = %window, symbols = chunk.len(), "fetching chunk");
                source.fetch_series(chunk, window).await
            })
            .buffer_unordered(parallel_factor)
            .try_collect()
            .await;

        match frames {
            Ok(frames) => return Ok(Frame::concat(frames)),
            Err(err) if attempts <= WINDOW_RETRIES => {
                warn!(window = %window, attempt = attempts, error = %err, "retrying window");
            }
            Err(err) => {
                return Err(MarqueeError::RetriesExhausted {
                    operation: format!("window {window}"),
                    attempts,
                    source: Box::new(err),
                });
            }
        }
    }
}

/// Extract `symbols` over `options.start..options.end`, one sink write per window.
///
/// The start is moved forward to the dataset's history start when it is earlier. Argument
/// errors are raised before any series is fetched. Returns the number of windows written.
pub async fn iterate_over_series<S, K>(
    source: &S,
    symbols: &[String],
    options: &ExtractOptions,
    sink: &mut K,
) -> Result<usize, MarqueeError>
where
    S: SeriesSource + ?Sized,
    K: WindowSink + ?Sized,
{
    validate_fan_out(options.request_batch_size, options.parallel_factor)?;
    if options.end < options.start {
        return Err(MarqueeError::Value(format!(
            "end {} is before start {}",
            options.end, options.start
        )));
    }

    let profile = source.profile().await?;
    if profile.cadence == TimeCadence::Time && options.end <= options.start {
        return Err(MarqueeError::Value(format!(
            "intraday extraction needs end after start, got {} to {}",
            options.start, options.end
        )));
    }
    let delta = options.resolve_delta(profile.cadence)?;

    let start = match profile.history_start {
        Some(history) if history > options.start => {
            debug!(requested = %options.start, history = %history, "clamping start to history");
            history
        }
        _ => options.start,
    };
    let windows = Window::split(start, options.end, delta)?;

    let bar = progress_bar(Some(windows.len() as u64), "windows");
    for window in &windows {
        let frame = execute_parallel_query(
            source,
            symbols,
            window,
            options.request_batch_size,
            options.parallel_factor,
        )
        .await?;
        debug!(window = %window, rows = frame.len(), "window complete");
        sink.write_window(window, frame)?;
        bar.inc(1);
    }
    bar.finish_and_clear();
    Ok(windows.len())
}
