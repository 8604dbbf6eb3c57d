//! RateQueue - payload を一定間隔で 1 件ずつ流す
//!
//! # 流れ
//! 1. `append()` は上限付き FIFO の末尾に積む。満杯なら [`AppendError::QueueFull`]。
//!    append からは dispatch しない
//! 2. dispatch ループが `1000ms / rate` 眠っては先頭 1 件を work に渡す
//! 3. `pause()` 中もタイマーは回るが tick は空振りする。
//!    `restart()` で手つかずの backlog の先頭から再開する
//! 4. `close()` はループを止めてから backlog を全速で drain する
//!    （`discard_on_close` なら捨てる）
//!
//! # 同時実行
//! - work の呼び出しは dispatch ループ・`run_next()`・close の drain のどれからでも
//!   `dispatching` ゲートを通る。同時に走る work は常に 1 つ
//! - close の drain もゲートを取るので、実行中の `run_next()` が close より長生きしない

mod backlog;

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use self::backlog::RateBacklog;
use crate::domain::{Lifecycle, Payload};
use crate::error::{AppendError, ConfigError};
use crate::loops::{LoopGroup, shutdown_requested};
use crate::observability::RateStats;
use crate::ports::{
    Clock, EventSink, Events, IdGenerator, RateWork, SystemClock, TracingEventSink,
    default_id_generator,
};
use crate::sender::PayloadSender;
use crate::settings::{RateSettings, ResolvedRate};

/// 流量制御キュー（[module docs](self) を参照）
///
/// clone は同じキューを共有する軽いハンドル。
pub struct RateQueue<T> {
    shared: Arc<RateShared<T>>,
}

impl<T> Clone for RateQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct RateShared<T> {
    settings: ResolvedRate,
    notes: Vec<String>,
    work: Option<Arc<dyn RateWork<T>>>,
    events: Events,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    backlog: Mutex<RateBacklog<T>>,
    dispatching: tokio::sync::Mutex<()>,
    interval: OnceLock<Duration>,
    loops: Mutex<Option<LoopGroup>>,
    tx: mpsc::UnboundedSender<Payload<T>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Payload<T>>>>,
}

/// [`RateQueue`] の Builder
pub struct RateQueueBuilder<T> {
    settings: RateSettings,
    work: Option<Arc<dyn RateWork<T>>>,
    event_sink: Option<Arc<dyn EventSink>>,
    clock: Option<Arc<dyn Clock>>,
    id_generator: Option<Arc<dyn IdGenerator>>,
}

impl<T: Send + 'static> RateQueueBuilder<T> {
    pub fn new() -> Self {
        Self {
            settings: RateSettings::default(),
            work: None,
            event_sink: None,
            clock: None,
            id_generator: None,
        }
    }

    pub fn settings(mut self, settings: RateSettings) -> Self {
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

    pub fn requests_per_second(mut self, rate: u32) -> Self {
        self.settings.requests_per_second = rate;
        self
    }

    pub fn discard_on_close(mut self, discard: bool) -> Self {
        self.settings.discard_on_close = discard;
        self
    }

    pub fn work<W: RateWork<T> + 'static>(mut self, work: W) -> Self {
        self.work = Some(Arc::new(work));
        self
    }

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

    pub fn build(self) -> RateQueue<T> {
        let resolved = self.settings.resolve();
        let settings = resolved.settings;
        let sink = self
            .event_sink
            .unwrap_or_else(|| Arc::new(TracingEventSink));
        let (tx, rx) = mpsc::unbounded_channel();

        let shared = RateShared {
            backlog: Mutex::new(RateBacklog::new(settings.max_size)),
            dispatching: tokio::sync::Mutex::new(()),
            events: Events::new(settings.tag.clone(), sink),
            settings,
            notes: resolved.notes,
            work: self.work,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            ids: self.id_generator.unwrap_or_else(default_id_generator),
            interval: OnceLock::new(),
            loops: Mutex::new(None),
            tx,
            rx: Mutex::new(Some(rx)),
        };
        RateQueue {
            shared: Arc::new(shared),
        }
    }
}

impl<T: Send + 'static> Default for RateQueueBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> RateQueue<T> {
    pub fn builder() -> RateQueueBuilder<T> {
        RateQueueBuilder::new()
    }

    /// rate と work を検証し、dispatch ループを起動する
    ///
    /// start 前に `pause()` されていれば paused のまま起動する。
    pub fn start(&self) -> Result<(), ConfigError> {
        let shared = &self.shared;
        let pacing = shared.settings.pacing()?;
        if shared.work.is_none() {
            return Err(ConfigError::MissingWorkHandler);
        }
        let handle = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        {
            let mut backlog = shared.lock();
            if backlog.lifecycle() != Lifecycle::Idle {
                return Err(ConfigError::AlreadyStarted);
            }
            backlog.start();
        }
        let _ = shared.interval.set(pacing.interval);

        for note in &shared.notes {
            shared.events.emit(note);
        }
        if pacing.clamped {
            shared.events.emit(format!(
                "RequestsPerSecond: Max value of {} was used",
                pacing.requests_per_second
            ));
        }

        let mut loops = LoopGroup::new(handle);
        {
            let shared = Arc::clone(shared);
            let shutdown = loops.subscribe();
            loops.spawn("rate-dispatch", shared.dispatch_loop(pacing.interval, shutdown));
        }
        let rx = shared.rx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(rx) = rx {
            let shared = Arc::clone(shared);
            let shutdown = loops.subscribe();
            loops.spawn("append-listener", shared.listen(rx, shutdown));
        }
        *shared.loops.lock().unwrap_or_else(PoisonError::into_inner) = Some(loops);

        tracing::debug!(
            tag = %shared.settings.tag,
            interval_ms = pacing.interval.as_millis() as u64,
            "rate queue started"
        );
        shared.events.emit("RateQueue: Started");
        Ok(())
    }

    pub fn new_payload(&self, data: T) -> Payload<T> {
        Payload::new(self.shared.ids.generate(), data)
    }

    /// FIFO の末尾に積む
    ///
    /// `start()` 前でも積める（最初の tick まで待つ）。
    pub fn append(&self, payload: Payload<T>) -> Result<(), AppendError> {
        self.shared.append(payload)
    }

    pub fn sender(&self) -> PayloadSender<T> {
        PayloadSender::new(self.shared.tx.clone())
    }

    /// 先頭をいま dispatch する。空・pause 中・未起動なら `None`
    ///
    /// dispatch ループと同じゲートを通るので、ループの work と重ならない。
    pub async fn run_next(&self) -> Option<i32> {
        self.shared.dispatch_next().await
    }

    pub fn pause(&self) {
        if self.shared.lock().set_active(false) {
            self.shared.events.emit("RateQueue: Paused");
        }
    }

    pub fn restart(&self) {
        if self.shared.lock().set_active(true) {
            self.shared.events.emit("RateQueue: Restarted");
        }
    }

    /// 受付を止め、残りを drain するか捨てる
    ///
    /// - drain はタイマーも pause も無視する
    /// - 一度も start していないキューは work が未検証なので、溜まった分は捨てる
    /// - 実行中の `run_next()` が返るのを待ってから drain / discard する
    pub async fn close(&self) {
        let shared = &self.shared;
        let Some(previous) = shared.lock().begin_close() else {
            return;
        };
        shared.events.emit("Rate Queue: Stopping...");

        drop(shared.rx.lock().unwrap_or_else(PoisonError::into_inner).take());
        let loops = shared.loops.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(loops) = loops {
            loops.shutdown_and_join().await;
        }

        let _gate = shared.dispatching.lock().await;
        if shared.settings.discard_on_close || previous == Lifecycle::Idle {
            let discarded = shared.lock().discard();
            shared
                .events
                .emit(format!("Discarded Payloads in Queue: {discarded}"));
        } else {
            let pending = shared.lock().len();
            shared
                .events
                .emit(format!("Pending Payloads in Queue: {pending}"));
            loop {
                // ロックは dispatch 前に手放す
                let next = shared.lock().pop_front();
                let Some(payload) = next else {
                    break;
                };
                shared.dispatch(payload).await;
            }
        }

        shared.lock().finish_close();
        shared.events.emit("Rate Queue: All Work completed");
    }

    pub fn size(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().is_active()
    }

    pub fn tag(&self) -> &str {
        &self.shared.settings.tag
    }

    pub fn max_size(&self) -> usize {
        self.shared.settings.max_size
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lock().lifecycle()
    }

    pub fn stats(&self) -> RateStats {
        let backlog = self.shared.lock();
        RateStats {
            tag: self.shared.settings.tag.clone(),
            backlog: backlog.len(),
            active: backlog.is_active(),
            dispatched: backlog.dispatched(),
            rejected: backlog.rejected(),
            interval: self.shared.interval.get().copied(),
        }
    }
}

impl<T: Send + 'static> RateShared<T> {
    fn lock(&self) -> MutexGuard<'_, RateBacklog<T>> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, payload: Payload<T>) -> Result<(), AppendError> {
        let id = payload.id();
        let result = self.lock().push(payload);
        match &result {
            Ok(()) => self.events.emit(format!("Payload Queued [id]: {id}")),
            Err(AppendError::QueueFull { .. }) => self
                .events
                .emit(format!("Payload {id} failed. RateQueue is full")),
            Err(AppendError::Closed { .. }) => self
                .events
                .emit(format!("Payload {id} failed. RateQueue is closed")),
        }
        result
    }

    async fn dispatch(&self, payload: Payload<T>) -> Option<i32> {
        let Some(work) = self.work.as_ref() else {
            tracing::error!(tag = %self.settings.tag, id = %payload.id(), "no work handler, payload dropped");
            return None;
        };
        let id = payload.id();
        let status = work.work(payload.into_data()).await;
        self.events.emit(format!(
            "Pushed [{id}] @ {}. Result: {status}",
            self.clock.now().to_rfc3339()
        ));
        Some(status)
    }

    async fn dispatch_next(&self) -> Option<i32> {
        let _gate = self.dispatching.lock().await;
        let next = self.lock().pop_next();
        self.dispatch(next?).await
    }

    async fn dispatch_loop(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = tokio::time::sleep(interval) => {}
            }
            // work 実行中は shutdown で中断しない
            self.dispatch_next().await;
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
                    Some(payload) => {
                        if let Err(e) = self.append(payload) {
                            tracing::debug!(tag = %self.settings.tag, error = %e, "channel append refused");
                        }
                    }
                    None => break,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::NoopEventSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{Instant, sleep};

    struct Recorder {
        calls: Arc<AtomicUsize>,
        order: Arc<Mutex<Vec<u32>>>,
    }

    fn recording_queue(max_size: usize, rate: u32) -> (RateQueueBuilder<u32>, Recorder) {
        let calls = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let builder = RateQueue::builder()
            .tag("QueueA")
            .max_size(max_size)
            .requests_per_second(rate)
            .event_sink(NoopEventSink)
            .work({
                let calls = Arc::clone(&calls);
                let order = Arc::clone(&order);
                move |item: u32| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    order.lock().unwrap().push(item);
                    async { 0 }
                }
            });
        (builder, Recorder { calls, order })
    }

    impl Recorder {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn order(&self) -> Vec<u32> {
            self.order.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn zero_rate_is_rejected_first() {
        let queue: RateQueue<u32> = RateQueue::builder().tag("QueueB").build();
        assert_eq!(queue.start(), Err(ConfigError::InvalidRate(0)));
    }

    #[tokio::test]
    async fn start_without_work_fails() {
        let queue: RateQueue<u32> = RateQueue::builder().requests_per_second(5).build();
        assert_eq!(queue.start(), Err(ConfigError::MissingWorkHandler));
        assert!(!queue.is_active());
    }

    #[tokio::test]
    async fn start_marks_active_and_reports_clamp() {
        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let queue = RateQueue::builder()
            .tag("fast")
            .requests_per_second(5000)
            .work(|_: u32| async { 0 })
            .event_sink({
                let log = Arc::clone(&log);
                move |m: &str| log.lock().unwrap().push(m.to_string())
            })
            .build();
        queue.start().unwrap();

        assert!(queue.is_active());
        assert_eq!(queue.stats().interval, Some(Duration::from_millis(1)));
        assert_eq!(queue.max_size(), 100_000);
        let log = log.lock().unwrap().clone();
        assert!(log.contains(&"[fast] RequestsPerSecond: Max value of 1000 was used".to_string()));
        assert_eq!(log.last().unwrap(), "[fast] RateQueue: Started");
        queue.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn one_per_second_dispatches_two_in_2400ms() {
        let (builder, recorder) = recording_queue(5, 1);
        let queue = builder.build();
        queue.start().unwrap();
        for n in 1..=4 {
            queue.append(queue.new_payload(n)).unwrap();
        }

        sleep(Duration::from_millis(2400)).await;
        assert_eq!(recorder.calls(), 2);
        assert_eq!(queue.size(), 2);
        queue.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_order_is_append_order() {
        let (builder, recorder) = recording_queue(100, 10);
        let queue = builder.build();
        queue.start().unwrap();
        let started = Instant::now();
        for n in 0..5 {
            queue.append(queue.new_payload(n)).unwrap();
        }

        // K/R 秒 + 1 interval
        sleep(Duration::from_millis(600)).await;
        assert_eq!(recorder.order(), vec![0, 1, 2, 3, 4]);
        assert!(started.elapsed() <= Duration::from_millis(600));
        queue.close().await;
    }

    #[tokio::test]
    async fn full_queue_rejects_and_keeps_size() {
        let (builder, _recorder) = recording_queue(2, 10);
        let queue = builder.build();
        queue.append(queue.new_payload(1)).unwrap();
        queue.append(queue.new_payload(2)).unwrap();

        let third = queue.new_payload(3);
        let id = third.id();
        assert_eq!(
            queue.append(third),
            Err(AppendError::QueueFull { id, capacity: 2 })
        );
        assert_eq!(queue.size(), 2);
        assert_eq!(queue.stats().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_backlog_and_restart_resumes_in_order() {
        let (builder, recorder) = recording_queue(5, 2);
        let queue = builder.build();
        queue.start().unwrap();
        queue.pause();
        for n in 1..=3 {
            queue.append(queue.new_payload(n)).unwrap();
        }

        sleep(Duration::from_secs(3)).await;
        assert_eq!(recorder.calls(), 0);
        assert_eq!(queue.size(), 3);

        queue.restart();
        sleep(Duration::from_secs(2)).await;
        assert_eq!(recorder.order(), vec![1, 2, 3]);
        assert_eq!(queue.size(), 0);
        queue.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn run_next_directly() {
        let (builder, recorder) = recording_queue(20, 1);
        let queue = builder.build();
        queue.append(queue.new_payload(1)).unwrap();
        assert_eq!(queue.run_next().await, None);

        queue.start().unwrap();
        for n in 2..=4 {
            queue.append(queue.new_payload(n)).unwrap();
        }
        assert_eq!(queue.run_next().await, Some(0));
        assert_eq!(queue.run_next().await, Some(0));
        assert_eq!(queue.size(), 2);
        assert_eq!(recorder.order(), vec![1, 2]);
        queue.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_drains_backlog_without_waiting_for_timer() {
        let (builder, recorder) = recording_queue(20, 1);
        let queue = builder.build();
        queue.start().unwrap();
        for n in 1..=5 {
            queue.append(queue.new_payload(n)).unwrap();
        }

        let started = Instant::now();
        queue.close().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(queue.size(), 0);
        assert_eq!(recorder.order(), vec![1, 2, 3, 4, 5]);
        assert_eq!(queue.lifecycle(), Lifecycle::Closed);
        assert!(!queue.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn close_drains_even_while_paused() {
        let (builder, recorder) = recording_queue(20, 1);
        let queue = builder.build();
        queue.start().unwrap();
        queue.pause();
        for n in 1..=3 {
            queue.append(queue.new_payload(n)).unwrap();
        }
        queue.close().await;
        assert_eq!(recorder.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn close_with_discard_drops_backlog() {
        let (builder, recorder) = recording_queue(20, 1);
        let queue = builder.discard_on_close(true).build();
        queue.start().unwrap();
        for n in 1..=5 {
            queue.append(queue.new_payload(n)).unwrap();
        }
        queue.close().await;
        assert_eq!(queue.size(), 0);
        assert_eq!(recorder.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn append_after_close_is_refused() {
        let (builder, _recorder) = recording_queue(20, 1);
        let queue = builder.build();
        queue.start().unwrap();
        queue.close().await;

        let late = queue.new_payload(1);
        let id = late.id();
        assert_eq!(queue.append(late), Err(AppendError::Closed { id }));
        queue.restart();
        assert!(!queue.is_active());
        queue.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sender_feeds_the_fifo() {
        let (builder, recorder) = recording_queue(20, 10);
        let queue = builder.build();
        queue.start().unwrap();
        let sender = queue.sender();
        for n in 0..3 {
            sender.send(queue.new_payload(n)).unwrap();
        }
        sleep(Duration::from_millis(500)).await;
        assert_eq!(recorder.order(), vec![0, 1, 2]);

        queue.close().await;
        assert!(sender.send(queue.new_payload(3)).is_err());
    }

    #[tokio::test]
    async fn closing_unstarted_queue_discards() {
        let (builder, recorder) = recording_queue(20, 1);
        let queue = builder.build();
        queue.append(queue.new_payload(1)).unwrap();
        queue.close().await;
        assert_eq!(queue.size(), 0);
        assert_eq!(recorder.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_before_start_is_kept() {
        let (builder, recorder) = recording_queue(5, 10);
        let queue = builder.build();
        queue.pause();
        queue.append(queue.new_payload(1)).unwrap();
        queue.start().unwrap();
        assert!(!queue.is_active());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.calls(), 0);

        queue.restart();
        sleep(Duration::from_millis(200)).await;
        assert_eq!(recorder.order(), vec![1]);
        queue.close().await;
    }

    /// work 中の同時実行数を数える
    struct Overlap {
        running: AtomicUsize,
        peak: AtomicUsize,
        done: AtomicUsize,
    }

    fn overlapping_queue(rate: u32) -> (RateQueue<u32>, Arc<Overlap>) {
        let overlap = Arc::new(Overlap {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
        });
        let queue = RateQueue::builder()
            .max_size(20)
            .requests_per_second(rate)
            .event_sink(NoopEventSink)
            .work({
                let overlap = Arc::clone(&overlap);
                move |_: u32| {
                    let overlap = Arc::clone(&overlap);
                    async move {
                        let now = overlap.running.fetch_add(1, Ordering::SeqCst) + 1;
                        overlap.peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(500)).await;
                        overlap.running.fetch_sub(1, Ordering::SeqCst);
                        overlap.done.fetch_add(1, Ordering::SeqCst);
                        0
                    }
                }
            })
            .build();
        (queue, overlap)
    }

    #[tokio::test(start_paused = true)]
    async fn run_next_never_overlaps_the_dispatch_loop() {
        let (queue, overlap) = overlapping_queue(10);
        queue.start().unwrap();
        for n in 0..4 {
            queue.append(queue.new_payload(n)).unwrap();
        }
        let direct: Vec<_> = (0..2)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.run_next().await })
            })
            .collect();

        sleep(Duration::from_secs(3)).await;
        for handle in direct {
            handle.await.unwrap();
        }
        assert_eq!(overlap.done.load(Ordering::SeqCst), 4);
        assert_eq!(overlap.peak.load(Ordering::SeqCst), 1);
        queue.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_waits_for_running_run_next() {
        let (queue, overlap) = overlapping_queue(1);
        queue.start().unwrap();
        queue.append(queue.new_payload(1)).unwrap();

        let direct = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.run_next().await })
        };
        while overlap.running.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        queue.close().await;
        assert_eq!(overlap.done.load(Ordering::SeqCst), 1);
        assert_eq!(direct.await.unwrap(), Some(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_keep_per_producer_order() {
        const PRODUCERS: u32 = 4;
        const PER_PRODUCER: u32 = 100;
        const CAPACITY: usize = 50;

        let seen = Arc::new(Mutex::new(Vec::<(u32, u32)>::new()));
        let queue = RateQueue::builder()
            .max_size(CAPACITY)
            .requests_per_second(1000)
            .event_sink(NoopEventSink)
            .work({
                let seen = Arc::clone(&seen);
                move |item: (u32, u32)| {
                    seen.lock().unwrap().push(item);
                    async { 0 }
                }
            })
            .build();
        queue.start().unwrap();

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = queue.clone();
                tokio::task::spawn_blocking(move || {
                    for i in 0..PER_PRODUCER {
                        let mut payload = queue.new_payload((p, i));
                        // 満杯なら少し待って再試行（append で payload は消費される）
                        loop {
                            match queue.append(payload) {
                                Ok(()) => break,
                                Err(AppendError::QueueFull { .. }) => {
                                    std::thread::sleep(Duration::from_millis(1));
                                    payload = queue.new_payload((p, i));
                                }
                                Err(e) => panic!("unexpected append error: {e}"),
                            }
                        }
                        assert!(queue.size() <= CAPACITY);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }
        queue.close().await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), (PRODUCERS * PER_PRODUCER) as usize);
        for p in 0..PRODUCERS {
            let order: Vec<u32> = seen.iter().filter(|(q, _)| *q == p).map(|(_, i)| *i).collect();
            assert_eq!(order, (0..PER_PRODUCER).collect::<Vec<_>>());
        }
        assert_eq!(queue.size(), 0);
    }
}
