//! BatchQueue - 溜まった payload をサイズか経過時間でまとめて流す
//!
//! # 流れ
//! 1. `append()` は backlog に積み、呼び出し元のスレッドでトリガを評価する
//!    （backlog 長 >= max size、または期限切れ）
//! 2. 発火したら backlog を丸ごと取り出し、別の tokio task で work に渡す。
//!    期限は now + max age に張り直す
//! 3. age watchdog が [`AGE_POLL_INTERVAL`] ごとに tick を送るので、
//!    流入が止まったキューも max age 経過後に flush される
//! 4. `close()` は両ループを止め、実行中の flush が全部返るまで待つ。
//!    発火しなかった payload は捨てる

mod backlog;

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use self::backlog::{Applied, BatchBacklog, Signal};
use crate::domain::payload::unpack;
use crate::domain::{Lifecycle, Payload, PayloadId};
use crate::error::ConfigError;
use crate::in_flight::{InFlight, InFlightGuard};
use crate::loops::{LoopGroup, shutdown_requested};
use crate::observability::BatchStats;
use crate::ports::{
    BatchWork, Clock, EventSink, Events, IdGenerator, SystemClock, TracingEventSink,
    default_id_generator,
};
use crate::sender::PayloadSender;
use crate::settings::{BatchSettings, ResolvedBatch};

/// age watchdog が期限を確認する間隔
pub const AGE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// バッチングキュー（トリガの方針は [module docs](self) を参照）
///
/// clone は同じキューを共有する軽いハンドル。
///
/// # 使用例
/// ```ignore
/// let queue = BatchQueue::builder()
///     .tag("QueueA")
///     .max_size(150)
///     .max_age_secs(3)
///     .work(|jobs: Vec<Job>| async move { handle(jobs).await })
///     .build();
/// queue.start()?;
/// queue.append(queue.new_payload(job));
/// queue.close().await;
/// ```
pub struct BatchQueue<T> {
    shared: Arc<BatchShared<T>>,
}

impl<T> Clone for BatchQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct BatchShared<T> {
    settings: ResolvedBatch,
    notes: Vec<String>,
    work: Option<Arc<dyn BatchWork<T>>>,
    events: Events,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    backlog: Mutex<BatchBacklog<T>>,
    in_flight: Arc<InFlight>,
    runtime: OnceLock<Handle>,
    loops: Mutex<Option<LoopGroup>>,
    tx: mpsc::UnboundedSender<Payload<T>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Payload<T>>>>,
}

/// [`BatchQueue`] の Builder
pub struct BatchQueueBuilder<T> {
    settings: BatchSettings,
    work: Option<Arc<dyn BatchWork<T>>>,
    event_sink: Option<Arc<dyn EventSink>>,
    clock: Option<Arc<dyn Clock>>,
    id_generator: Option<Arc<dyn IdGenerator>>,
}

impl<T: Send + 'static> BatchQueueBuilder<T> {
    pub fn new() -> Self {
        Self {
            settings: BatchSettings::default(),
            work: None,
            event_sink: None,
            clock: None,
            id_generator: None,
        }
    }

    /// 設定をまとめて差し替える（JSON から読んだものなど）
    pub fn settings(mut self, settings: BatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.settings.tag = tag.into();
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.settings.max_size = max_size;
        self
    }

    pub fn max_age_secs(mut self, secs: u64) -> Self {
        self.settings.max_age_secs = secs;
        self
    }

    pub fn work<W: BatchWork<T> + 'static>(mut self, work: W) -> Self {
        self.work = Some(Arc::new(work));
        self
    }

    /// 未指定なら [`TracingEventSink`]
    pub fn event_sink<S: EventSink + 'static>(mut self, sink: S) -> Self {
        self.event_sink = Some(Arc::new(sink));
        self
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn id_generator<G: IdGenerator + 'static>(mut self, id_generator: G) -> Self {
        self.id_generator = Some(Arc::new(id_generator));
        self
    }

    /// 未起動のキューを作る。検証は [`BatchQueue::start`] で行う
    pub fn build(self) -> BatchQueue<T> {
        let resolved = self.settings.resolve();
        let settings = resolved.settings;
        let sink = self
            .event_sink
            .unwrap_or_else(|| Arc::new(TracingEventSink));
        let (tx, rx) = mpsc::unbounded_channel();

        let shared = BatchShared {
            backlog: Mutex::new(BatchBacklog::new(
                settings.max_size,
                settings.max_age,
                Instant::now(),
            )),
            events: Events::new(settings.tag.clone(), sink),
            settings,
            notes: resolved.notes,
            work: self.work,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            ids: self.id_generator.unwrap_or_else(default_id_generator),
            in_flight: InFlight::new(),
            runtime: OnceLock::new(),
            loops: Mutex::new(None),
            tx,
            rx: Mutex::new(Some(rx)),
        };
        BatchQueue {
            shared: Arc::new(shared),
        }
    }
}

impl<T: Send + 'static> Default for BatchQueueBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> BatchQueue<T> {
    pub fn builder() -> BatchQueueBuilder<T> {
        BatchQueueBuilder::new()
    }

    /// 検証し、適用したデフォルトを報告して、バックグラウンドループを起動する
    ///
    /// tokio runtime の中から呼ぶこと。runtime を覚えておくので、
    /// 以後の append はどのスレッドからでも dispatch できる。
    pub fn start(&self) -> Result<(), ConfigError> {
        let shared = &self.shared;
        if shared.work.is_none() {
            return Err(ConfigError::MissingWorkHandler);
        }
        let handle = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        {
            let mut backlog = shared.lock();
            if backlog.lifecycle() != Lifecycle::Idle {
                return Err(ConfigError::AlreadyStarted);
            }
            // Running になる前に runtime を置く（append からの dispatch が参照する）
            let _ = shared.runtime.set(handle.clone());
            backlog.start(Instant::now());
        }
        for note in &shared.notes {
            shared.events.emit(note);
        }

        let mut loops = LoopGroup::new(handle);
        {
            let shared = Arc::clone(shared);
            let shutdown = loops.subscribe();
            loops.spawn("age-watchdog", shared.age_watchdog(shutdown));
        }
        let rx = shared.rx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(rx) = rx {
            let shared = Arc::clone(shared);
            let shutdown = loops.subscribe();
            loops.spawn("append-listener", shared.listen(rx, shutdown));
        }
        *shared.loops.lock().unwrap_or_else(PoisonError::into_inner) = Some(loops);

        shared.events.emit("BP Queue: Started");
        Ok(())
    }

    /// `data` を新しい ID 付きの payload に包む。backlog には触らない
    pub fn new_payload(&self, data: T) -> Payload<T> {
        Payload::new(self.shared.ids.generate(), data)
    }

    /// payload を積んで flush トリガを評価する
    ///
    /// 失敗しない。`close()` 開始後は payload を捨てて reject イベントを出す。
    pub fn append(&self, payload: Payload<T>) {
        self.shared.apply(Signal::Append(payload));
    }

    /// 何も積まずにトリガだけ評価する
    pub fn tick(&self) {
        self.shared.apply(Signal::Tick);
    }

    /// listener task 経由で append する producer ハンドル
    pub fn sender(&self) -> PayloadSender<T> {
        PayloadSender::new(self.shared.tx.clone())
    }

    /// トリガを通さず `batch` をいま work に渡す
    ///
    /// `close()` からは実行中の work として見える。work の status code を返す。
    pub async fn run(&self, batch: Vec<Payload<T>>) -> Result<i32, ConfigError> {
        let _guard = self.shared.in_flight.enter();
        self.shared.run_batch(batch).await
    }

    /// 両ループを止め、実行中の flush が全部返るまで待つ
    ///
    /// まだ発火していない backlog は捨てる。二回目以降の呼び出しは何もしない。
    pub async fn close(&self) {
        let shared = &self.shared;
        if !shared.lock().begin_close() {
            return;
        }
        shared.events.emit("Buffer Queue: Stopping...");

        // listener が居なくても sender 側を閉じる
        drop(shared.rx.lock().unwrap_or_else(PoisonError::into_inner).take());
        let loops = shared.loops.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(loops) = loops {
            loops.shutdown_and_join().await;
        }

        shared.in_flight.wait_idle().await;

        let abandoned = shared.lock().finish_close();
        if abandoned > 0 {
            shared
                .events
                .emit(format!("Buffer Queue: {abandoned} untriggered payloads abandoned"));
        }
        shared.events.emit("Buffer Queue: All Work completed");
    }

    pub fn size(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn tag(&self) -> &str {
        &self.shared.settings.tag
    }

    pub fn max_size(&self) -> usize {
        self.shared.settings.max_size
    }

    pub fn max_age(&self) -> Duration {
        self.shared.settings.max_age
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lock().lifecycle()
    }

    pub fn stats(&self) -> BatchStats {
        let backlog = self.shared.lock();
        BatchStats {
            tag: self.shared.settings.tag.clone(),
            backlog: backlog.len(),
            in_flight: self.shared.in_flight.count(),
            batches_flushed: backlog.batches_flushed(),
            payloads_flushed: backlog.payloads_flushed(),
        }
    }
}

impl<T: Send + 'static> BatchShared<T> {
    fn lock(&self) -> MutexGuard<'_, BatchBacklog<T>> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(self: &Arc<Self>, signal: Signal<T>) {
        // guard はロックを持ったまま取る（close の begin_close と順序を揃える）
        let (applied, guard) = {
            let mut backlog = self.lock();
            let applied = backlog.apply(signal, Instant::now());
            let guard = match &applied {
                Applied::Flushed { batch, .. } if !batch.is_empty() => {
                    Some(self.in_flight.enter())
                }
                _ => None,
            };
            (applied, guard)
        };
        match applied {
            Applied::Rejected(id) => {
                tracing::debug!(tag = %self.settings.tag, %id, "append after close dropped");
                self.events
                    .emit(format!("Payload rejected [id]: {id}. Queue is closed"));
            }
            Applied::Held { queued } => self.report_queued(queued),
            Applied::Flushed { queued, batch } => {
                self.report_queued(queued);
                match guard {
                    Some(guard) => self.dispatch(batch, guard),
                    None => tracing::trace!(
                        tag = %self.settings.tag,
                        "age deadline passed with an empty backlog"
                    ),
                }
            }
        }
    }

    fn report_queued(&self, queued: Option<PayloadId>) {
        if let Some(id) = queued {
            self.events.emit(format!("Payload Queued [id]: {id}"));
        }
    }

    /// flush した batch を専用 task に渡す
    ///
    /// `guard` は batch を backlog から取り出したのと同じロック区間で取ったもの。
    /// task が終わるまで保持する。
    fn dispatch(self: &Arc<Self>, batch: Vec<Payload<T>>, guard: InFlightGuard) {
        let Some(handle) = self.runtime.get() else {
            tracing::error!(tag = %self.settings.tag, size = batch.len(), "flush without a runtime, batch dropped");
            return;
        };
        let shared = Arc::clone(self);
        handle.spawn(async move {
            let _guard = guard;
            if let Err(e) = shared.run_batch(batch).await {
                tracing::error!(tag = %shared.settings.tag, error = %e, "flush failed");
            }
        });
    }

    async fn run_batch(&self, batch: Vec<Payload<T>>) -> Result<i32, ConfigError> {
        let work = self.work.as_ref().ok_or(ConfigError::MissingWorkHandler)?;
        self.events.emit(format!(
            "Batch Push [{}]: Running. Queue Size: {} @ {}",
            self.settings.tag,
            batch.len(),
            self.clock.now().to_rfc3339()
        ));
        let status = work.work(unpack(batch)).await;
        self.events.emit(format!(
            "Batch Push [{}]: Finished. Result Code: {status} @ {}",
            self.settings.tag,
            self.clock.now().to_rfc3339()
        ));
        Ok(status)
    }

    async fn age_watchdog(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + AGE_POLL_INTERVAL, AGE_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {
                    let expired = self.lock().is_expired(Instant::now());
                    if expired {
                        self.apply(Signal::Tick);
                    }
                }
            }
        }
    }

    async fn listen(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<Payload<T>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                received = rx.recv() => match received {
                    Some(payload) => self.apply(Signal::Append(payload)),
                    None => break,
                },
            }
        }
    }
}
