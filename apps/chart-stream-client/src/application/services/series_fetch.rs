//! Series Fetch Workflow
//!
//! Fetches historical series for a list of symbols over one transport
//! session, one symbol at a time, on a single chart session.
//!
//! # Command Sequence
//!
//! ```text
//! chart_create_session  cs
//! resolve_symbol        cs sds_sym_0 ={symbol}
//! create_series         cs sds_1 s0 sds_sym_0 <tf> <batch>
//!   ... update pages ... series_completed | symbol_error
//! resolve_symbol        cs sds_sym_1 ={symbol}
//! modify_series         cs sds_1 s1 sds_sym_1 <tf>
//!   ... update pages ... series_completed | symbol_error
//! ```
//!
//! Points are validated one at a time: an unreadable or unconvertible point is
//! logged and dropped, and its neighbours are kept.
//!
//! The workflow never times out on its own. Wrap the future in
//! `tokio::time::timeout` to bound it; dropping the future releases its
//! subscription.

use std::marker::PhantomData;
use std::time::Instant;

use serde::Deserialize;
use serde_json::Value;

use crate::application::ports::SessionPort;
use crate::domain::series::{
    Candle, ChartSessionId, IndicatorPoint, RawSeriesPoint, SeriesBuffer, SeriesError, Timeframe,
    batch_size,
};
use crate::infrastructure::metrics;
use crate::infrastructure::protocol::messages::{Command, Event, SERIES_SLOT, events};
use crate::infrastructure::protocol::SessionError;

/// Key of the point list inside a series slot.
const POINTS_FIELD: &str = "s";

// =============================================================================
// Series Kinds
// =============================================================================

/// A series the workflow can fetch: which update event carries its pages and
/// how a raw point becomes an output record.
pub trait SeriesKind {
    /// Event carrying pages of this series.
    const UPDATE_EVENT: &'static str;

    /// Short label for logs and metrics.
    const NAME: &'static str;

    /// Output record.
    type Output: Send;

    /// Map one raw point to an output record.
    ///
    /// # Errors
    ///
    /// Returns an error if the point cannot be mapped. The workflow drops
    /// such points and keeps the rest of the series.
    fn convert(point: &RawSeriesPoint) -> Result<Self::Output, SeriesError>;
}

/// OHLCV candles from `timescale_update`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Candles;

impl SeriesKind for Candles {
    const UPDATE_EVENT: &'static str = events::TIMESCALE_UPDATE;
    const NAME: &'static str = "candles";
    type Output = Candle;

    fn convert(point: &RawSeriesPoint) -> Result<Candle, SeriesError> {
        Candle::try_from(point)
    }
}

/// Indicator points from `study_update`, passed through unchanged (including
/// `null` outputs).
#[derive(Debug, Clone, Copy, Default)]
pub struct Indicators;

impl SeriesKind for Indicators {
    const UPDATE_EVENT: &'static str = events::STUDY_UPDATE;
    const NAME: &'static str = "indicators";
    type Output = IndicatorPoint;

    fn convert(point: &RawSeriesPoint) -> Result<IndicatorPoint, SeriesError> {
        Ok(point.clone())
    }
}

// =============================================================================
// Request / Response
// =============================================================================

/// Parameters of one fetch call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    /// Symbols in the order results are returned.
    pub symbols: Vec<String>,
    /// Points wanted per symbol; `None` (or `Some(0)`) returns whatever one
    /// batch delivers.
    pub amount: Option<usize>,
    /// Bar timeframe.
    pub timeframe: Timeframe,
}

impl FetchRequest {
    /// Request the default timeframe for `symbols`.
    #[must_use]
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Limit each symbol's result to `amount` points.
    #[must_use]
    pub const fn with_amount(mut self, amount: usize) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Use `timeframe` instead of the default.
    #[must_use]
    pub const fn with_timeframe(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = timeframe;
        self
    }

    /// Page size requested from the server.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        batch_size(self.amount)
    }
}

/// Results of one fetch together with the chart session that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome<T> {
    /// Chart session the commands were scoped to.
    pub chart_session: ChartSessionId,
    /// One result list per requested symbol, in request order.
    pub series: Vec<Vec<T>>,
}

/// Errors that end a fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// A command could not be queued.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The session ended before every symbol completed.
    #[error("session ended after {completed} of {requested} symbols")]
    StreamEnded {
        /// Symbols completed before the end.
        completed: usize,
        /// Symbols requested.
        requested: usize,
    },
}

// =============================================================================
// Public Entry Points
// =============================================================================

/// Fetch `K` series for every requested symbol.
///
/// # Errors
///
/// See [`FetchError`]. A symbol the server cannot resolve yields whatever
/// was accumulated for it (usually nothing) and does not fail the call.
pub async fn fetch_series<K, P>(
    session: &P,
    request: &FetchRequest,
) -> Result<Vec<Vec<K::Output>>, FetchError>
where
    K: SeriesKind,
    P: SessionPort + ?Sized,
{
    fetch_series_with_session::<K, P>(session, request)
        .await
        .map(|outcome| outcome.series)
}

/// Fetch candles for every requested symbol.
///
/// # Errors
///
/// See [`fetch_series`].
pub async fn fetch_candles<P>(
    session: &P,
    request: &FetchRequest,
) -> Result<Vec<Vec<Candle>>, FetchError>
where
    P: SessionPort + ?Sized,
{
    fetch_series::<Candles, P>(session, request).await
}

/// Fetch indicator points for every requested symbol.
///
/// # Errors
///
/// See [`fetch_series`].
pub async fn fetch_indicators<P>(
    session: &P,
    request: &FetchRequest,
) -> Result<Vec<Vec<IndicatorPoint>>, FetchError>
where
    P: SessionPort + ?Sized,
{
    fetch_series::<Indicators, P>(session, request).await
}

/// Fetch candles and report the chart session used.
///
/// # Errors
///
/// See [`fetch_series`].
pub async fn fetch_candles_with_session<P>(
    session: &P,
    request: &FetchRequest,
) -> Result<FetchOutcome<Candle>, FetchError>
where
    P: SessionPort + ?Sized,
{
    fetch_series_with_session::<Candles, P>(session, request).await
}

/// Fetch `K` series and report the chart session used.
///
/// # Errors
///
/// See [`fetch_series`].
#[tracing::instrument(
    skip_all,
    fields(series = K::NAME, symbols = request.symbols.len(), timeframe = %request.timeframe)
)]
pub async fn fetch_series_with_session<K, P>(
    session: &P,
    request: &FetchRequest,
) -> Result<FetchOutcome<K::Output>, FetchError>
where
    K: SeriesKind,
    P: SessionPort + ?Sized,
{
    let chart_session = ChartSessionId::generate();
    let Some(first) = request.symbols.first() else {
        return Ok(FetchOutcome {
            chart_session,
            series: Vec::new(),
        });
    };

    let started = Instant::now();
    // Subscribe before the first command so no update can be missed.
    let mut subscription = session.subscribe();
    let mut fetch = SeriesFetch::<K>::new(request, chart_session);

    tracing::debug!(chart_session = %fetch.chart_session, symbol = %first, "Starting series fetch");

    session.send(&Command::chart_create_session(&fetch.chart_session))?;
    session.send(&Command::resolve_symbol(&fetch.chart_session, 0, first))?;
    session.send(&Command::create_series(
        &fetch.chart_session,
        request.timeframe,
        request.batch_size(),
    ))?;

    loop {
        let Some(event) = subscription.recv().await else {
            tracing::warn!(completed = fetch.results.len(), "Session ended mid-fetch");
            return Err(FetchError::StreamEnded {
                completed: fetch.results.len(),
                requested: request.symbols.len(),
            });
        };

        if fetch.on_event(session, &event)? == Step::Done {
            break;
        }
    }

    subscription.unsubscribe();
    metrics::record_fetch_duration(K::NAME, started.elapsed());
    tracing::info!(
        chart_session = %fetch.chart_session,
        elapsed_ms = started.elapsed().as_millis(),
        "Series fetch complete"
    );

    Ok(fetch.finish())
}

// =============================================================================
// Workflow State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Done,
}

/// Per-call state: the symbol in flight, its accumulated pages and the
/// results of completed symbols.
struct SeriesFetch<'a, K: SeriesKind> {
    request: &'a FetchRequest,
    chart_session: ChartSessionId,
    current: usize,
    buffer: SeriesBuffer,
    results: Vec<Vec<K::Output>>,
    _kind: PhantomData<K>,
}

impl<'a, K: SeriesKind> SeriesFetch<'a, K> {
    fn new(request: &'a FetchRequest, chart_session: ChartSessionId) -> Self {
        Self {
            request,
            chart_session,
            current: 0,
            buffer: SeriesBuffer::new(request.batch_size()),
            results: Vec::with_capacity(request.symbols.len()),
            _kind: PhantomData,
        }
    }

    fn symbol(&self) -> &str {
        self.request
            .symbols
            .get(self.current)
            .map_or("", String::as_str)
    }

    fn on_event<P>(&mut self, session: &P, event: &Event) -> Result<Step, FetchError>
    where
        P: SessionPort + ?Sized,
    {
        let name = event.name.as_str();

        if name == K::UPDATE_EVENT {
            match extract_page(event) {
                Some(elements) => {
                    let page = self.read_page(elements);
                    tracing::trace!(symbol = self.symbol(), points = page.len(), "Page received");
                    self.buffer.absorb_page(page);
                }
                None => {
                    tracing::warn!(event = name, symbol = self.symbol(), "Update without a readable page");
                    metrics::record_skipped_update(K::NAME);
                }
            }
            Ok(Step::Continue)
        } else if name == events::SERIES_COMPLETED {
            self.complete_symbol(session)
        } else if name == events::SYMBOL_ERROR {
            tracing::warn!(
                symbol = self.symbol(),
                detail = ?event.params.get(2..),
                "Symbol could not be resolved"
            );
            metrics::record_symbol_error(K::NAME);
            self.complete_symbol(session)
        } else {
            Ok(Step::Continue)
        }
    }

    /// Parse page elements one by one, dropping the ones without the point shape.
    fn read_page(&self, elements: &[Value]) -> Vec<RawSeriesPoint> {
        let page: Vec<RawSeriesPoint> = elements
            .iter()
            .filter_map(|element| RawSeriesPoint::deserialize(element).ok())
            .collect();

        let unreadable = elements.len() - page.len();
        if unreadable > 0 {
            tracing::warn!(symbol = self.symbol(), unreadable, "Dropping unreadable series points");
            metrics::record_skipped_points(K::NAME, unreadable);
        }
        page
    }

    fn complete_symbol<P>(&mut self, session: &P) -> Result<Step, FetchError>
    where
        P: SessionPort + ?Sized,
    {
        let points = self.buffer.take(self.request.amount);
        let series: Vec<K::Output> = points
            .iter()
            .filter_map(|point| match K::convert(point) {
                Ok(output) => Some(output),
                Err(e) => {
                    tracing::warn!(symbol = self.symbol(), error = %e, "Dropping series point");
                    metrics::record_skipped_points(K::NAME, 1);
                    None
                }
            })
            .collect();

        tracing::debug!(symbol = self.symbol(), points = series.len(), "Symbol complete");
        metrics::record_series_points(K::NAME, series.len());
        self.results.push(series);
        self.current += 1;

        let Some(next) = self.request.symbols.get(self.current) else {
            return Ok(Step::Done);
        };

        session.send(&Command::resolve_symbol(&self.chart_session, self.current, next))?;
        session.send(&Command::modify_series(
            &self.chart_session,
            self.current,
            self.request.timeframe,
        ))?;
        Ok(Step::Continue)
    }

    fn finish(self) -> FetchOutcome<K::Output> {
        FetchOutcome {
            chart_session: self.chart_session,
            series: self.results,
        }
    }
}

/// Locate the page elements at `params[1].sds_1.s`.
fn extract_page(event: &Event) -> Option<&[Value]> {
    event
        .param(1)?
        .get(SERIES_SLOT)?
        .get(POINTS_FIELD)?
        .as_array()
        .map(Vec::as_slice)
}

// =============================================================================
// Tests
// =============================================================================
