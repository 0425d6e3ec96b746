//! Grid session: the cells of one master region, their baselines and the polling loop.

mod baseline;
mod poller;
mod view;

use std::{
    collections::{HashMap, HashSet},
    ops::ControlFlow,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::future::join_all;
use pillwatch_capture::{capture_error, capture_region, VideoSource};
use pillwatch_monitor::{CellMonitor, CycleOutcome, ToleranceMetric};
use pillwatch_notify::NotificationSink;
use pillwatch_ops::{settings, EventLog, SettingsStore, StoredBaseline};
use pillwatch_types::{
    config::SessionConfig,
    events::{CellTransitionEvent, LifecyclePhase, Notification, Severity, SystemEvent},
    frame::{EncodedImage, RawImage},
    geometry::{partition_grid, CellId, GridCell, GridPosition, Rectangle},
    status::BaselineStatus,
    PillwatchError, Result,
};
use pillwatch_vision::codec;
use tokio::{task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use baseline::{BaselineLedger, DecodeTicket, DecodedBaseline};
pub use view::{CellView, SessionView};

use crate::poller::Poller;

/// Outcome of [`GridSession::capture_all_baselines`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureSummary {
    pub captured: usize,
    pub failed: Vec<CellId>,
}

#[derive(Default)]
struct SessionState {
    master_region: Option<Rectangle>,
    cells: Vec<GridCell>,
    baselines: BaselineLedger,
    monitors: HashMap<CellId, CellMonitor>,
}

impl SessionState {
    fn reset_grid(&mut self, region: Option<Rectangle>, cells: Vec<GridCell>) {
        self.master_region = region;
        self.monitors = cells
            .iter()
            .map(|cell| (cell.id, CellMonitor::new()))
            .collect();
        self.cells = cells;
        self.baselines.clear();
        self.prune();
    }

    /// Drop any per-cell entry whose id is not part of the current grid.
    fn prune(&mut self) {
        let ids: HashSet<CellId> = self.cells.iter().map(|cell| cell.id).collect();
        self.baselines.retain(&ids);
        self.monitors.retain(|id, _| ids.contains(id));
    }

    fn cell(&self, id: &CellId) -> Option<&GridCell> {
        self.cells.iter().find(|cell| cell.id == *id)
    }

    fn batch(&self) -> Option<Uuid> {
        self.cells.first().map(|cell| cell.id.batch())
    }

    fn fits_cell(&self, id: &CellId, image: &RawImage) -> bool {
        self.cell(id)
            .map_or(false, |cell| cell.rect.pixel_size() == image.dimensions())
    }

    /// Reflect a settled decode in the cell's monitor.
    fn baseline_settled(&mut self, id: CellId, baseline: BaselineStatus) -> Option<CellTransitionEvent> {
        let label = self.cell(&id)?.label.clone();
        let monitor = self.monitors.get_mut(&id)?;
        let from = monitor.status();
        match baseline {
            BaselineStatus::Ready => monitor.baseline_ready(),
            BaselineStatus::Failed => monitor.baseline_failed(),
            BaselineStatus::Missing | BaselineStatus::Pending => monitor.baseline_cleared(),
        }
        let to = monitor.status();
        (from != to).then(|| CellTransitionEvent {
            cell: id,
            label,
            from,
            to,
            diff: None,
        })
    }

    fn evaluate(
        &mut self,
        frame: std::result::Result<&RawImage, &str>,
        metric: &ToleranceMetric,
        threshold_percent: f64,
    ) -> Vec<(GridCell, u64, CycleOutcome)> {
        let mut outcomes = Vec::new();
        for baseline in self.baselines.decoded() {
            let Some(cell) = self.cells.iter().find(|cell| cell.id == baseline.cell) else {
                continue;
            };
            let Some(monitor) = self.monitors.get_mut(&baseline.cell) else {
                continue;
            };
            let capture = match frame {
                Ok(frame) => capture_region(frame, &cell.rect),
                Err(reason) => Err(capture_error(reason)),
            };
            let outcome = monitor.evaluate(&baseline.image, capture, metric, threshold_percent);
            outcomes.push((cell.clone(), baseline.version, outcome));
        }
        outcomes.sort_by_key(|(cell, _, _)| cell.position());
        outcomes
    }
}

struct SessionInner<S, N> {
    config: SessionConfig,
    metric: ToleranceMetric,
    source: S,
    notifier: N,
    events: EventLog,
    settings: Option<Arc<dyn SettingsStore>>,
    state: Mutex<SessionState>,
    poller: Mutex<Option<Poller>>,
    decodes: Mutex<Vec<JoinHandle<()>>>,
}

/// Orchestrates every cell under one master region.
///
/// Cloning yields another handle to the same session. State changes made through
/// any handle are applied atomically with respect to the polling loop; baseline
/// writes invalidate in-flight decodes before they return.
pub struct GridSession<S, N>
where
    S: VideoSource + 'static,
    N: NotificationSink + 'static,
{
    inner: Arc<SessionInner<S, N>>,
}

impl<S, N> Clone for GridSession<S, N>
where
    S: VideoSource + 'static,
    N: NotificationSink + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, N> GridSession<S, N>
where
    S: VideoSource + 'static,
    N: NotificationSink + 'static,
{
    pub fn new(config: SessionConfig, source: S, notifier: N) -> Result<Self> {
        Self::build(config, source, notifier, None)
    }

    /// Like [`new`](Self::new) but mirrors the master region and baselines into `store`.
    pub fn with_settings(
        config: SessionConfig,
        source: S,
        notifier: N,
        store: Arc<dyn SettingsStore>,
    ) -> Result<Self> {
        Self::build(config, source, notifier, Some(store))
    }

    fn build(
        config: SessionConfig,
        source: S,
        notifier: N,
        settings: Option<Arc<dyn SettingsStore>>,
    ) -> Result<Self> {
        config.grid.validate()?;
        if config.detection.poll_interval_ms == 0 {
            return Err(PillwatchError::Configuration(
                "detection.poll_interval_ms must be greater than zero".into(),
            ));
        }
        let metric = ToleranceMetric::from(&config.detection);
        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                metric,
                source,
                notifier,
                events: EventLog::new(),
                settings,
                state: Mutex::new(SessionState::default()),
                poller: Mutex::new(None),
                decodes: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    pub fn notifier(&self) -> &N {
        &self.inner.notifier
    }

    pub fn events(&self) -> &EventLog {
        &self.inner.events
    }

    pub fn master_region(&self) -> Option<Rectangle> {
        self.inner.state().master_region
    }

    pub fn cells(&self) -> Vec<GridCell> {
        self.inner.state().cells.clone()
    }

    /// True while at least one cell has a decoded baseline.
    pub fn is_monitoring(&self) -> bool {
        self.inner.state().baselines.has_decoded()
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .poller()
            .as_ref()
            .map_or(false, Poller::is_running)
    }

    pub fn baseline_image(&self, id: &CellId) -> Option<Arc<RawImage>> {
        self.inner.state().baselines.decoded_image(id)
    }

    pub fn view(&self) -> SessionView {
        let polling = self.is_polling();
        let state = self.inner.state();
        SessionView {
            master_region: state.master_region,
            cells: state
                .cells
                .iter()
                .map(|cell| CellView {
                    cell: cell.clone(),
                    state: state
                        .monitors
                        .get(&cell.id)
                        .map(CellMonitor::state)
                        .unwrap_or_default(),
                    baseline: state.baselines.status(&cell.id),
                })
                .collect(),
            monitoring: state.baselines.has_decoded(),
            polling,
        }
    }

    /// Regenerate the grid from `region`, or drop it entirely with `None`.
    ///
    /// Every previous cell id, baseline and status is discarded; the new cells start
    /// at `NoBaseline`. An invalid region or label table leaves the session untouched.
    pub async fn set_master_region(&self, region: Option<Rectangle>) -> Result<Vec<GridCell>> {
        let cells = match &region {
            Some(rect) => partition_grid(Uuid::new_v4(), rect, &self.inner.config.grid)?,
            None => Vec::new(),
        };

        let stopped = {
            let mut poller = self.inner.poller();
            let mut state = self.inner.state();
            state.reset_grid(region, cells.clone());
            self.inner.sync_polling_locked(&mut poller, &mut state)
        };

        self.inner.persist_region(region.as_ref());
        self.inner.persist_baselines(&[]);

        let event = match &region {
            Some(rect) => {
                info!("master region {} split into {} cells", rect, cells.len());
                SystemEvent::region_set(rect, cells.len())
            }
            None => {
                info!("master region cleared");
                SystemEvent::lifecycle(LifecyclePhase::RegionCleared, String::from("grid removed"))
            }
        };
        self.inner.record(std::iter::once(event).chain(stopped)).await;
        Ok(cells)
    }

    /// Capture and encode a baseline for every cell from one camera frame.
    ///
    /// A cell whose capture fails gets no baseline; the others are unaffected. The
    /// whole baseline set is swapped in at once after every attempt has finished.
    pub async fn capture_all_baselines(&self) -> Result<CaptureSummary> {
        let (cells, batch) = {
            let state = self.inner.state();
            (state.cells.clone(), state.batch())
        };
        if cells.is_empty() {
            return Err(session_error("no master region set"));
        }

        let frame = self.inner.grab_frame().await?;
        let attempts = tokio::task::spawn_blocking(move || {
            cells
                .iter()
                .map(|cell| {
                    let encoded = capture_region(&frame, &cell.rect)
                        .and_then(|img| codec::encode(&img));
                    (cell.clone(), encoded)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|err| session_error(format!("baseline capture worker failed: {err}")))?;

        let mut summary = CaptureSummary::default();
        let mut incoming = HashMap::with_capacity(attempts.len());
        for (cell, encoded) in attempts {
            match encoded {
                Ok(encoded) => {
                    summary.captured += 1;
                    incoming.insert(cell.id, Some(encoded));
                }
                Err(err) => {
                    warn!("baseline capture for {} failed: {err}", cell.label);
                    summary.failed.push(cell.id);
                    incoming.insert(cell.id, None);
                }
            }
        }

        self.inner.install(batch, incoming).await?;
        info!(
            "captured {} baselines ({} failed)",
            summary.captured,
            summary.failed.len()
        );
        Ok(summary)
    }

    /// Install encoded baselines supplied from outside, e.g. a settings store.
    /// Cells missing from `baselines` end up without one; unknown ids are ignored.
    pub async fn set_baselines(&self, baselines: HashMap<CellId, Option<EncodedImage>>) -> Result<()> {
        self.inner.install(None, baselines).await
    }

    /// Re-capture a single cell without touching the others.
    pub async fn capture_cell_baseline(&self, id: CellId) -> Result<()> {
        let cell = self
            .inner
            .state()
            .cell(&id)
            .cloned()
            .ok_or_else(|| session_error(format!("unknown cell {id}")))?;
        let frame = self.inner.grab_frame().await?;
        let encoded = capture_region(&frame, &cell.rect).and_then(|img| codec::encode(&img))?;
        self.set_cell_baseline(id, Some(encoded)).await
    }

    pub async fn clear_cell_baseline(&self, id: CellId) -> Result<()> {
        self.set_cell_baseline(id, None).await
    }

    pub async fn set_cell_baseline(&self, id: CellId, encoded: Option<EncodedImage>) -> Result<()> {
        let (job, events) = {
            let mut poller = self.inner.poller();
            let mut state = self.inner.state();
            if state.cell(&id).is_none() {
                return Err(session_error(format!("unknown cell {id}")));
            }
            let job = state.baselines.set(id, encoded);
            let settled = if job.is_some() {
                BaselineStatus::Pending
            } else {
                BaselineStatus::Missing
            };
            let transition = state.baseline_settled(id, settled);
            let lifecycle = self.inner.sync_polling_locked(&mut poller, &mut state);
            let events: Vec<SystemEvent> = transition
                .map(SystemEvent::cell_transition)
                .into_iter()
                .chain(lifecycle)
                .collect();
            (job, events)
        };

        self.inner.spawn_decodes(job.into_iter().collect());
        self.inner.persist_current_baselines();
        self.inner.record(events).await;
        Ok(())
    }

    /// Drop every baseline but keep the grid.
    pub async fn clear_all_baselines(&self) -> Result<()> {
        let batch = self.inner.state().batch();
        self.inner.install(batch, HashMap::new()).await
    }

    /// Drop the grid, its baselines and the master region.
    pub async fn clear_all(&self) -> Result<()> {
        self.set_master_region(None).await.map(|_| ())
    }

    /// Wait until every decode issued so far has settled.
    pub async fn wait_for_decodes(&self) {
        loop {
            let pending = std::mem::take(&mut *self.inner.decodes());
            if pending.is_empty() {
                break;
            }
            for handle in pending {
                if let Err(err) = handle.await {
                    warn!("baseline decode task failed: {err}");
                }
            }
        }
    }

    /// Run one comparison cycle right away, independent of the timer.
    pub async fn evaluate_once(&self) -> Result<()> {
        self.inner.run_cycle(None).await
    }

    /// Start the polling timer if there is anything to compare. Idempotent.
    pub async fn start_polling(&self) -> bool {
        let started = {
            let mut poller = self.inner.poller();
            let mut state = self.inner.state();
            self.inner.sync_polling_locked(&mut poller, &mut state)
        };
        self.inner.record(started).await;
        self.is_polling()
    }

    /// Cancel the polling timer. It restarts on the next baseline change.
    pub async fn stop_polling(&self) {
        let stopped = self.inner.poller().take().map(|poller| {
            poller.stop();
            SystemEvent::lifecycle(
                LifecyclePhase::MonitoringStopped,
                String::from("polling stopped on request"),
            )
        });
        self.inner.record(stopped).await;
    }

    /// The camera went away: stop monitoring and drop the grid.
    pub async fn report_source_failure(&self, reason: impl Into<String>) {
        self.inner.hard_stop(reason.into()).await;
    }

    /// Re-apply the master region and baselines saved in the settings store.
    /// Returns whether a region was restored.
    pub async fn restore_from_settings(&self) -> Result<bool> {
        let Some(store) = self.inner.settings.clone() else {
            return Ok(false);
        };
        let Some(region) = settings::load_region(store.as_ref())? else {
            return Ok(false);
        };
        let stored = settings::load_baselines(store.as_ref())?;

        let cells = self.set_master_region(Some(region)).await?;
        if !stored.is_empty() {
            let by_position: HashMap<GridPosition, EncodedImage> = stored
                .into_iter()
                .map(|baseline| (baseline.position, baseline.image))
                .collect();
            let incoming = cells
                .iter()
                .map(|cell| (cell.id, by_position.get(&cell.position()).cloned()))
                .collect();
            self.set_baselines(incoming).await?;
        }
        info!("restored master region {region} from settings");
        Ok(true)
    }
}

impl<S, N> SessionInner<S, N>
where
    S: VideoSource + 'static,
    N: NotificationSink + 'static,
{
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn poller(&self) -> MutexGuard<'_, Option<Poller>> {
        self.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn decodes(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.decodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn record(&self, events: impl IntoIterator<Item = SystemEvent>) {
        self.events.record_all(events).await;
    }

    async fn alert(&self, notification: Notification) {
        self.events
            .record_event(SystemEvent::notification(notification.clone()))
            .await;
        if let Err(err) = self.notifier.notify(notification).await {
            warn!("notification delivery failed: {err}");
        }
    }

    async fn grab_frame(self: &Arc<Self>) -> Result<RawImage> {
        match self.source.current_frame().await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(capture_error("no camera frame available")),
            Err(err) if err.is_source_lost() => {
                self.hard_stop(err.to_string()).await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Bring the timer in line with the baselines: running iff something is decoded.
    /// Callers hold both locks, poller first.
    fn sync_polling_locked(
        self: &Arc<Self>,
        poller: &mut Option<Poller>,
        state: &mut SessionState,
    ) -> Option<SystemEvent> {
        let wanted = state.baselines.has_decoded();
        let running = poller.as_ref().map_or(false, Poller::is_running);
        match (wanted, running) {
            (true, false) => {
                state
                    .monitors
                    .values_mut()
                    .for_each(CellMonitor::reset_edge);
                *poller = Some(self.spawn_poller());
                info!(
                    "monitoring started, polling every {}ms",
                    self.config.detection.poll_interval_ms
                );
                Some(SystemEvent::lifecycle(
                    LifecyclePhase::MonitoringStarted,
                    format!("{} cells with baselines", state.baselines.decoded().len()),
                ))
            }
            (false, true) => {
                if let Some(active) = poller.take() {
                    active.stop();
                }
                info!("monitoring stopped");
                Some(SystemEvent::lifecycle(
                    LifecyclePhase::MonitoringStopped,
                    String::from("no decoded baselines"),
                ))
            }
            (false, false) => {
                poller.take();
                None
            }
            (true, true) => None,
        }
    }

    fn spawn_poller(self: &Arc<Self>) -> Poller {
        let period = Duration::from_millis(self.config.detection.poll_interval_ms);
        let weak = Arc::downgrade(self);
        Poller::spawn(period, move |token| {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                match inner.run_cycle(Some(&token)).await {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(err) if err.is_source_lost() => ControlFlow::Break(()),
                    Err(err) => {
                        warn!("polling cycle failed: {err}");
                        ControlFlow::Continue(())
                    }
                }
            }
        })
    }

    /// One comparison pass over every cell that currently has a decoded baseline.
    async fn run_cycle(self: &Arc<Self>, token: Option<&CancellationToken>) -> Result<()> {
        if !self.state().baselines.has_decoded() {
            return Ok(());
        }

        let frame = match self.source.current_frame().await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(String::from("no camera frame available")),
            Err(err) if err.is_source_lost() => {
                self.hard_stop(err.to_string()).await;
                return Err(err);
            }
            Err(err) => Err(err.to_string()),
        };

        let outcomes = {
            let mut state = self.state();
            if token.map_or(false, CancellationToken::is_cancelled) {
                debug!("polling cancelled before results were applied");
                return Ok(());
            }
            state.evaluate(
                frame.as_ref().map_err(String::as_str),
                &self.metric,
                self.config.detection.threshold_percent,
            )
        };

        let mut events = Vec::new();
        let mut alerts = Vec::new();
        for (cell, version, outcome) in &outcomes {
            if outcome.is_transition() {
                debug!(
                    "{} {} -> {} (diff {:?})",
                    cell.label, outcome.previous, outcome.state.status, outcome.state.diff
                );
                events.push(SystemEvent::cell_transition(CellTransitionEvent {
                    cell: cell.id,
                    label: cell.label.clone(),
                    from: outcome.previous,
                    to: outcome.state.status,
                    diff: outcome.state.diff,
                }));
            }
            if outcome.rising_edge {
                let diff = outcome.state.diff.unwrap_or_default();
                info!("{} changed ({diff:.1}% of pixels)", cell.label);
                alerts.push((
                    cell.id,
                    *version,
                    Notification::new(
                        format!("{}: pocket contents changed ({diff:.1}% of pixels differ)", cell.label),
                        Severity::Info,
                        self.config.notifications.change_display_ms,
                    ),
                ));
            }
        }
        debug!("evaluated {} cells", outcomes.len());

        self.record(events).await;
        for (cell, version, alert) in alerts {
            // the baseline may have been replaced or cleared since evaluation
            let current = !token.map_or(false, CancellationToken::is_cancelled)
                && self.state().baselines.is_current(&cell, version);
            if !current {
                debug!("dropping change alert for {cell}, baseline is gone");
                continue;
            }
            self.alert(alert).await;
        }
        Ok(())
    }

    /// Camera-level failure: stop polling, drop the grid and raise one alert.
    async fn hard_stop(self: &Arc<Self>, reason: String) {
        let stopped = {
            let mut poller = self.poller();
            let mut state = self.state();
            state.reset_grid(None, Vec::new());
            self.sync_polling_locked(&mut poller, &mut state)
        };
        error!("video source lost: {reason}; monitoring stopped");

        self.record(
            [SystemEvent::lifecycle(LifecyclePhase::SourceLost, reason.clone())]
                .into_iter()
                .chain(stopped),
        )
        .await;
        self.alert(Notification::new(
            format!("Camera unavailable: {reason}. Monitoring stopped."),
            Severity::Error,
            self.config.notifications.error_display_ms,
        ))
        .await;
    }

    /// Atomically replace the whole baseline set. With `expected_batch`, refuse if the
    /// grid was regenerated in the meantime.
    async fn install(
        self: &Arc<Self>,
        expected_batch: Option<Uuid>,
        mut incoming: HashMap<CellId, Option<EncodedImage>>,
    ) -> Result<()> {
        let (jobs, events) = {
            let mut poller = self.poller();
            let mut state = self.state();
            if expected_batch.is_some() && state.batch() != expected_batch {
                return Err(session_error(
                    "grid was regenerated while baselines were being captured",
                ));
            }

            let before = incoming.len();
            incoming.retain(|id, _| state.cell(id).is_some());
            if incoming.len() != before {
                warn!(
                    "ignoring {} baselines for cells outside the current grid",
                    before - incoming.len()
                );
            }

            let cells = state.cells.clone();
            let jobs = state.baselines.replace_all(&cells, incoming);
            let mut events: Vec<SystemEvent> = cells
                .iter()
                .filter_map(|cell| {
                    let baseline = state.baselines.status(&cell.id);
                    state.baseline_settled(cell.id, baseline)
                })
                .map(SystemEvent::cell_transition)
                .collect();
            let phase = if jobs.is_empty() {
                LifecyclePhase::BaselinesCleared
            } else {
                LifecyclePhase::BaselinesReplaced
            };
            events.push(SystemEvent::lifecycle(
                phase,
                format!("{} baselines pending decode", state.baselines.pending()),
            ));
            events.extend(self.sync_polling_locked(&mut poller, &mut state));
            (jobs, events)
        };

        self.spawn_decodes(jobs);
        self.persist_current_baselines();
        self.record(events).await;
        Ok(())
    }

    /// Decode every job concurrently and apply the results in one step.
    fn spawn_decodes(self: &Arc<Self>, jobs: Vec<(DecodeTicket, EncodedImage)>) {
        if jobs.is_empty() {
            return;
        }
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let results = join_all(
                jobs.into_iter()
                    .map(|(ticket, encoded)| async move { (ticket, codec::decode(encoded).await) }),
            )
            .await;
            if let Some(inner) = weak.upgrade() {
                inner.apply_decodes(results).await;
            }
        });

        let mut decodes = self.decodes();
        decodes.retain(|handle| !handle.is_finished());
        decodes.push(handle);
    }

    async fn apply_decodes(self: &Arc<Self>, results: Vec<(DecodeTicket, Option<RawImage>)>) {
        let events = {
            let mut poller = self.poller();
            let mut state = self.state();
            let mut events = Vec::new();
            for (ticket, image) in results {
                let image = image.filter(|img| {
                    let fits = state.fits_cell(&ticket.cell, img);
                    if !fits {
                        warn!(
                            "baseline for {} is {:?}, not the cell's size",
                            ticket.cell,
                            img.dimensions()
                        );
                    }
                    fits
                });
                match state.baselines.complete(&ticket, image) {
                    Some(baseline) => {
                        if baseline == BaselineStatus::Failed {
                            warn!("baseline for {} could not be decoded", ticket.cell);
                        }
                        if let Some(transition) = state.baseline_settled(ticket.cell, baseline) {
                            events.push(SystemEvent::cell_transition(transition));
                        }
                    }
                    None => debug!("discarding stale decode for {}", ticket.cell),
                }
            }
            events.extend(self.sync_polling_locked(&mut poller, &mut state));
            events
        };
        self.record(events).await;
    }

    fn persist_region(&self, region: Option<&Rectangle>) {
        let Some(store) = &self.settings else {
            return;
        };
        if let Err(err) = settings::save_region(store.as_ref(), region) {
            warn!("failed to persist master region: {err}");
        }
    }

    fn persist_baselines(&self, baselines: &[StoredBaseline]) {
        let Some(store) = &self.settings else {
            return;
        };
        if let Err(err) = settings::save_baselines(store.as_ref(), baselines) {
            warn!("failed to persist baselines: {err}");
        }
    }

    fn persist_current_baselines(&self) {
        if self.settings.is_none() {
            return;
        }
        let stored: Vec<StoredBaseline> = self
            .state()
            .baselines
            .encoded_by_position()
            .into_iter()
            .map(|(position, image)| StoredBaseline { position, image })
            .collect();
        self.persist_baselines(&stored);
    }
}

impl<S, N> Drop for SessionInner<S, N> {
    fn drop(&mut self) {
        if let Ok(mut poller) = self.poller.lock() {
            if let Some(active) = poller.take() {
                active.stop();
            }
        }
        if let Ok(mut decodes) = self.decodes.lock() {
            for handle in decodes.drain(..) {
                handle.abort();
            }
        }
    }
}

pub fn session_error(message: impl Into<String>) -> PillwatchError {
    PillwatchError::Session(message.into())
}
