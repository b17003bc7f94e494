//! Time-windowed aggregation and dispatch.
//!
//! The dispatcher is the single consumer of the event buffer: every
//! `window_interval` it atomically drains the buffer, assembles one
//! multimodal payload in arrival order, sends it with the full transcript
//! history, and appends the user turn plus the reply. Cycles are
//! single-flight: the next tick is not serviced until the current cycle
//! finishes.

use crate::client::ChatClient;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::events::{ChatEvent, EventBuffer, EventKind};
use crate::frames::{extract, FfmpegSource, VideoSource};
use crate::media::{data_url, encode_image};
use crate::transcript::{ContentPart, Message, Transcript};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::spawn_blocking;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Opens a video path as a frame source. The default opener decodes via
/// ffmpeg; tests substitute synthetic sources.
pub type VideoOpener = Arc<dyn Fn(&Path) -> Result<Box<dyn VideoSource>> + Send + Sync>;

/// Result of one dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No events arrived during the window; no API call, no transcript
    /// change.
    EmptyWindow,
    /// One request went out and the reply was appended.
    Dispatched { events: usize, parts: usize },
}

/// Temp directories created while assembling one payload. Removed when
/// the guard drops, on every exit path.
#[derive(Debug, Default)]
struct TempArtifacts {
    dirs: Vec<PathBuf>,
}

impl TempArtifacts {
    fn track(&mut self, dir: PathBuf) {
        self.dirs.push(dir);
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        for dir in self.dirs.drain(..) {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => debug!("removed temp dir {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove temp dir {}: {}", dir.display(), e),
            }
        }
    }
}

pub struct Dispatcher {
    config: BridgeConfig,
    buffer: EventBuffer,
    client: Arc<dyn ChatClient>,
    transcript: Transcript,
    video_opener: VideoOpener,
    cycle_count: u64,
}

impl Dispatcher {
    pub fn new(
        config: BridgeConfig,
        buffer: EventBuffer,
        client: Arc<dyn ChatClient>,
        transcript: Transcript,
    ) -> Self {
        Self {
            config,
            buffer,
            client,
            transcript,
            video_opener: Arc::new(|path| Ok(Box::new(FfmpegSource::open(path)?))),
            cycle_count: 0,
        }
    }

    /// Replace the video opener. Lets tests drive the full video path
    /// with a synthetic source.
    pub fn with_video_opener(mut self, opener: VideoOpener) -> Self {
        self.video_opener = opener;
        self
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Run the interval loop until an interrupt is observed. Cycle
    /// failures are logged and the loop continues; they never crash the
    /// process. Returns the final transcript.
    pub async fn run(self) -> Transcript {
        let interrupt = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for interrupt: {e}");
                std::future::pending::<()>().await;
            }
        };
        self.run_until(interrupt).await
    }

    /// Like [`run`](Self::run), but with an explicit shutdown future.
    ///
    /// The future is pinned once and polled across iterations, so a
    /// shutdown arriving while a cycle is in flight is observed as soon
    /// as that cycle finishes; it is never dropped between ticks.
    pub async fn run_until<F>(mut self, shutdown: F) -> Transcript
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.config.window_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately; consume it so the first
        // window actually spans the configured interval
        ticker.tick().await;

        tokio::pin!(shutdown);

        info!(
            "dispatch loop started, window = {:?}",
            self.config.window_interval
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(CycleOutcome::EmptyWindow) => {
                            debug!("window closed with no events");
                        }
                        Ok(CycleOutcome::Dispatched { events, parts }) => {
                            info!("dispatched {events} events as {parts} parts");
                        }
                        Err(e) => {
                            error!("cycle failed, window discarded: {e}");
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("interrupt received, stopping dispatch loop");
                    break;
                }
            }
        }
        self.transcript
    }

    /// One drain → assemble → dispatch → append pass.
    ///
    /// All-or-nothing per window: a single unreadable media source or a
    /// remote failure aborts the whole cycle, the transcript is left
    /// untouched and the drained events are discarded.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        self.cycle_count += 1;
        let events = self.buffer.drain();
        if events.is_empty() {
            return Ok(CycleOutcome::EmptyWindow);
        }

        if let (Some(first), Some(last)) = (events.first(), events.last()) {
            debug!(
                "cycle {}: drained {} events spanning {:?}",
                self.cycle_count,
                events.len(),
                last.timestamp.duration_since(first.timestamp)
            );
        }

        let mut artifacts = TempArtifacts::default();
        let parts = self.assemble(&events, &mut artifacts).await?;
        let part_count = parts.len();

        let user = Message::user_parts(parts);
        let mut request = self.transcript.messages().to_vec();
        request.push(user.clone());

        let reply = self.client.complete(&self.config.model, &request).await?;
        drop(artifacts);

        self.transcript.push(user);
        self.transcript.push(Message::assistant(reply));

        Ok(CycleOutcome::Dispatched {
            events: events.len(),
            parts: part_count,
        })
    }

    /// Turn the drained events into one ordered content-part sequence.
    /// Cross-type arrival order is preserved; keyframes from one video
    /// stay contiguous in extraction order.
    async fn assemble(
        &self,
        events: &[ChatEvent],
        artifacts: &mut TempArtifacts,
    ) -> Result<Vec<ContentPart>> {
        let mut parts = Vec::new();
        for (n, event) in events.iter().enumerate() {
            match &event.kind {
                EventKind::Text(text) => {
                    parts.push(ContentPart::text(text.clone()));
                }
                EventKind::Image(path) => {
                    let b64 = self.encode_one(path.clone()).await?;
                    parts.push(ContentPart::image(data_url(&b64)));
                }
                EventKind::Video(path) => {
                    let dir = std::env::temp_dir().join(format!(
                        "chatbridge-frames-{}-{}-{}",
                        std::process::id(),
                        self.cycle_count,
                        n
                    ));
                    artifacts.track(dir.clone());
                    let frames = self.extract_and_encode(path.clone(), dir).await?;
                    debug!("video {} contributed {} keyframes", path.display(), frames.len());
                    for b64 in frames {
                        parts.push(ContentPart::image(data_url(&b64)));
                    }
                }
            }
        }
        Ok(parts)
    }

    async fn encode_one(&self, path: PathBuf) -> Result<String> {
        let max_dims = self.config.max_dims;
        let quality = self.config.jpeg_quality;
        run_blocking(move || encode_image(&path, max_dims, quality)).await
    }

    async fn extract_and_encode(&self, path: PathBuf, dir: PathBuf) -> Result<Vec<String>> {
        let strategy = self.config.frame_strategy;
        let max_frames = self.config.max_frames;
        let max_dims = self.config.max_dims;
        let quality = self.config.jpeg_quality;
        let opener = Arc::clone(&self.video_opener);
        run_blocking(move || {
            let mut source = opener(&path)?;
            let frame_paths = extract(source.as_mut(), &dir, strategy, max_frames)?;
            frame_paths
                .iter()
                .map(|p| encode_image(p, max_dims, quality))
                .collect()
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| BridgeError::Other(format!("blocking task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{MessageContent, Role};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct MockClient {
        calls: AtomicUsize,
        last_request: Mutex<Option<Vec<Message>>>,
        fail: bool,
    }

    impl MockClient {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
                fail,
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ChatClient for MockClient {
        async fn complete(&self, _model: &str, messages: &[Message]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(messages.to_vec());
            if self.fail {
                Err(BridgeError::RemoteCallFailed("boom".into()))
            } else {
                Ok("mock reply".into())
            }
        }
    }

    fn dispatcher(client: Arc<MockClient>) -> (Dispatcher, EventBuffer) {
        let buffer = EventBuffer::new();
        let config = BridgeConfig {
            model: "test-model".into(),
            ..BridgeConfig::default()
        };
        let transcript = Transcript::new("preamble");
        let d = Dispatcher::new(config, buffer.clone(), client, transcript);
        (d, buffer)
    }

    fn write_test_image(dir: &std::path::Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();
        path
    }

    #[tokio::test]
    async fn test_empty_window_makes_no_call_and_appends_nothing() {
        let client = MockClient::new(false);
        let (mut d, _buffer) = dispatcher(client.clone());

        let outcome = d.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::EmptyWindow);
        assert_eq!(client.call_count(), 0);
        assert_eq!(d.transcript().len(), 1);
    }

    #[tokio::test]
    async fn test_successful_cycle_appends_user_then_assistant() {
        let client = MockClient::new(false);
        let (mut d, buffer) = dispatcher(client.clone());
        buffer.push(ChatEvent::text("hello"));

        let outcome = d.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Dispatched {
                events: 1,
                parts: 1
            }
        );
        assert_eq!(client.call_count(), 1);

        let messages = d.transcript().messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[2].role, Role::Assistant);
        assert!(
            matches!(&messages[2].content, MessageContent::Text(t) if t == "mock reply")
        );
    }

    #[tokio::test]
    async fn test_failed_remote_call_appends_nothing() {
        let client = MockClient::new(true);
        let (mut d, buffer) = dispatcher(client.clone());
        buffer.push(ChatEvent::text("hello"));

        let err = d.run_cycle().await.unwrap_err();
        assert!(matches!(err, BridgeError::RemoteCallFailed(_)));
        assert_eq!(client.call_count(), 1);
        assert_eq!(d.transcript().len(), 1);

        // the failed window is gone; the next cycle starts clean
        let outcome = d.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::EmptyWindow);
    }

    #[tokio::test]
    async fn test_parts_preserve_cross_kind_arrival_order() {
        let media = tempdir().unwrap();
        let img = write_test_image(media.path(), "p1.png");

        let client = MockClient::new(false);
        let (mut d, buffer) = dispatcher(client.clone());
        buffer.push(ChatEvent::text("a"));
        buffer.push(ChatEvent::image(&img));
        buffer.push(ChatEvent::text("b"));

        d.run_cycle().await.unwrap();

        let request = client.last_request.lock().unwrap().clone().unwrap();
        // system preamble + the new user turn
        assert_eq!(request.len(), 2);
        let MessageContent::Parts(parts) = &request[1].content else {
            panic!("expected multimodal user content");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[0], ContentPart::Text { text } if text == "a"));
        assert!(matches!(
            &parts[1],
            ContentPart::ImageUrl { image_url }
                if image_url.url.starts_with("data:image/jpeg;base64,")
        ));
        assert!(matches!(&parts[2], ContentPart::Text { text } if text == "b"));
    }

    #[tokio::test]
    async fn test_request_carries_full_history() {
        let client = MockClient::new(false);
        let (mut d, buffer) = dispatcher(client.clone());

        buffer.push(ChatEvent::text("first"));
        d.run_cycle().await.unwrap();
        buffer.push(ChatEvent::text("second"));
        d.run_cycle().await.unwrap();

        let request = client.last_request.lock().unwrap().clone().unwrap();
        // preamble, first user, first reply, second user
        assert_eq!(request.len(), 4);
        assert_eq!(request[0].role, Role::System);
        assert_eq!(request[3].role, Role::User);
        assert_eq!(d.transcript().len(), 5);
    }

    #[tokio::test]
    async fn test_unreadable_image_aborts_cycle_before_dispatch() {
        let client = MockClient::new(false);
        let (mut d, buffer) = dispatcher(client.clone());
        buffer.push(ChatEvent::text("fine"));
        buffer.push(ChatEvent::image("/no/such/image.jpg"));

        let err = d.run_cycle().await.unwrap_err();
        assert!(matches!(err, BridgeError::SourceNotFound(_)));
        assert_eq!(client.call_count(), 0);
        assert_eq!(d.transcript().len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_video_aborts_cycle_before_dispatch() {
        let client = MockClient::new(false);
        let (mut d, buffer) = dispatcher(client.clone());
        buffer.push(ChatEvent::video("/no/such/video.mp4"));

        let err = d.run_cycle().await.unwrap_err();
        assert!(matches!(err, BridgeError::SourceNotFound(_)));
        assert_eq!(client.call_count(), 0);
        assert_eq!(d.transcript().len(), 1);
    }

    /// Fixed-length synthetic video: solid 8x8 frames, red channel
    /// carrying the frame index.
    struct StubVideo {
        next: u64,
        total: u64,
    }

    impl VideoSource for StubVideo {
        fn fps(&self) -> f64 {
            10.0
        }

        fn frame_count(&self) -> u64 {
            self.total
        }

        fn next_frame(&mut self) -> Result<Option<image::RgbImage>> {
            if self.next >= self.total {
                return Ok(None);
            }
            let shade = (self.next % 256) as u8;
            self.next += 1;
            Ok(Some(image::RgbImage::from_pixel(
                8,
                8,
                image::Rgb([shade, 0, 0]),
            )))
        }
    }

    fn stub_opener(total: u64) -> VideoOpener {
        Arc::new(move |_path| Ok(Box::new(StubVideo { next: 0, total })))
    }

    fn leftover_frame_dirs() -> usize {
        let prefix = format!("chatbridge-frames-{}-", std::process::id());
        std::fs::read_dir(std::env::temp_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
            .count()
    }

    #[tokio::test]
    async fn test_video_cycle_emits_contiguous_keyframes_and_removes_temp_dirs() {
        let client = MockClient::new(false);
        let (d, buffer) = dispatcher(client.clone());
        let mut d = d.with_video_opener(stub_opener(4));
        buffer.push(ChatEvent::text("intro"));
        buffer.push(ChatEvent::video("/synthetic/clip.mp4"));

        let outcome = d.run_cycle().await.unwrap();
        // 4 source frames, stride clamps to 1 -> 4 keyframes after the text
        assert_eq!(
            outcome,
            CycleOutcome::Dispatched {
                events: 2,
                parts: 5
            }
        );

        let request = client.last_request.lock().unwrap().clone().unwrap();
        let MessageContent::Parts(parts) = &request[1].content else {
            panic!("expected multimodal user content");
        };
        assert!(matches!(&parts[0], ContentPart::Text { text } if text == "intro"));
        for part in &parts[1..] {
            assert!(matches!(
                part,
                ContentPart::ImageUrl { image_url }
                    if image_url.url.starts_with("data:image/jpeg;base64,")
            ));
        }

        assert_eq!(leftover_frame_dirs(), 0);
        assert_eq!(d.transcript().len(), 3);
    }

    /// Slow remote call so a shutdown can land while the cycle is in
    /// flight.
    struct SlowClient {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ChatClient for SlowClient {
        async fn complete(&self, _model: &str, _messages: &[Message]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Ok("slow reply".into())
        }
    }

    #[tokio::test]
    async fn test_shutdown_during_inflight_cycle_is_not_lost() {
        let client = Arc::new(SlowClient {
            calls: AtomicUsize::new(0),
        });
        let buffer = EventBuffer::new();
        let config = BridgeConfig {
            model: "test-model".into(),
            window_interval: std::time::Duration::from_millis(10),
            ..BridgeConfig::default()
        };
        let d = Dispatcher::new(
            config,
            buffer.clone(),
            client.clone(),
            Transcript::new("preamble"),
        );
        buffer.push(ChatEvent::text("hello"));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(d.run_until(async {
            let _ = rx.await;
        }));

        // let the cycle start, then deliver the one and only shutdown
        // while the remote call is still pending
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        tx.send(()).unwrap();

        let transcript =
            tokio::time::timeout(std::time::Duration::from_secs(5), handle)
                .await
                .expect("dispatch loop did not observe the shutdown")
                .unwrap();

        // the in-flight cycle was allowed to finish, then the loop exited
        assert_eq!(transcript.len(), 3);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_temp_artifacts_removes_dirs_on_drop() {
        let base = tempdir().unwrap();
        let dir = base.path().join("cycle-frames");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("frame_0000.jpg"), b"jpeg").unwrap();

        {
            let mut artifacts = TempArtifacts::default();
            artifacts.track(dir.clone());
        }
        assert!(!dir.exists());
    }

    #[test]
    fn test_temp_artifacts_tolerates_never_created_dirs() {
        let base = tempdir().unwrap();
        let dir = base.path().join("never-created");

        let mut artifacts = TempArtifacts::default();
        artifacts.track(dir.clone());
        drop(artifacts);
        assert!(!dir.exists());
    }
}
