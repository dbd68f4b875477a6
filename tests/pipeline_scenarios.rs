//! End-to-end turns through the reply pipeline.

use futures_util::{StreamExt, stream};
use replystream::collaborators::{EmotionClassifier, FragmentStream, Role, Translator};
use replystream::pipeline::{
    ClientNotice, Collaborators, Emotion, Enrichment, PipelineConfig, ReplyPipeline, ReplyUnit,
    Segmenter, SentenceUnit, TurnRequest,
};
use replystream::{ReplyError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn fragments(parts: &[&str]) -> FragmentStream {
    let parts: Vec<Result<String>> = parts.iter().map(|s| Ok(s.to_string())).collect();
    stream::iter(parts).boxed()
}

/// Fragments followed by a source that never ends.
fn endless_fragments(parts: &[&str]) -> FragmentStream {
    let parts: Vec<Result<String>> = parts.iter().map(|s| Ok(s.to_string())).collect();
    stream::iter(parts).chain(stream::pending()).boxed()
}

async fn collect_turn(pipeline: &ReplyPipeline, source: FragmentStream) -> Vec<ReplyUnit> {
    tokio::time::timeout(
        Duration::from_secs(10),
        pipeline.run_turn(TurnRequest::new("hi", source)).collect::<Vec<_>>(),
    )
    .await
    .expect("turn should finish")
}

/// Aborted tasks finish asynchronously after the stream is dropped.
async fn wait_for_no_tasks(pipeline: &ReplyPipeline) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while pipeline.active_tasks() > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "{} tasks still alive",
            pipeline.active_tasks()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Sleeps per sequence index and records completion order.
struct DelayTranslator {
    delays: HashMap<u64, Duration>,
    completed: Mutex<Vec<u64>>,
}

impl DelayTranslator {
    fn new(delays: impl IntoIterator<Item = (u64, u64)>) -> Self {
        Self {
            delays: delays
                .into_iter()
                .map(|(index, ms)| (index, Duration::from_millis(ms)))
                .collect(),
            completed: Mutex::new(Vec::new()),
        }
    }

    fn completed(&self) -> Vec<u64> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Translator for DelayTranslator {
    async fn translate(&self, unit: Enrichment) -> Result<Enrichment> {
        if let Some(delay) = self.delays.get(&unit.sequence_index) {
            tokio::time::sleep(*delay).await;
        }
        self.completed.lock().unwrap().push(unit.sequence_index);
        Ok(unit)
    }
}

/// Tracks how many translations run at once.
#[derive(Default)]
struct ConcurrencyProbe {
    current: AtomicUsize,
    max: AtomicUsize,
}

#[async_trait::async_trait]
impl Translator for ConcurrencyProbe {
    async fn translate(&self, unit: Enrichment) -> Result<Enrichment> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(unit)
    }
}

struct LookupClassifier;

#[async_trait::async_trait]
impl EmotionClassifier for LookupClassifier {
    async fn classify(&self, tag: &str) -> Result<Emotion> {
        match tag {
            "高兴" => Ok(Emotion::new("happy", 0.92)),
            _ => Err(ReplyError::Classification {
                message: format!("unknown tag {}", tag),
            }),
        }
    }
}

fn assert_well_formed(units: &[ReplyUnit]) {
    let finals = units.iter().filter(|u| u.is_final).count();
    assert_eq!(finals, 1, "exactly one final unit expected: {:?}", units);
    assert!(units.last().is_some_and(|u| u.is_final), "final unit must be last");
    for pair in units.windows(2) {
        assert!(
            pair[0].sequence_index < pair[1].sequence_index,
            "indices must be strictly increasing: {:?}",
            units
        );
    }
}

#[tokio::test]
async fn single_tagged_sentence_is_one_enriched_unit() {
    let collaborators = Collaborators::passthrough().with_classifier(Arc::new(LookupClassifier));
    let pipeline = ReplyPipeline::new(PipelineConfig::default(), collaborators);

    let units = collect_turn(&pipeline, fragments(&["【高兴】你好<Hello>"])).await;

    assert_eq!(units.len(), 1);
    let unit = &units[0];
    assert_eq!(unit.sequence_index, 0);
    assert_eq!(unit.origin_tag, "高兴");
    assert_eq!(unit.resolved_emotion, "happy");
    assert_eq!(unit.display_text, "你好");
    assert_eq!(unit.secondary_caption.as_deref(), Some("Hello"));
    assert!(unit.is_final);
}

#[tokio::test]
async fn source_failure_after_first_unit_yields_one_error_unit() {
    let (collaborators, memory, status) = Collaborators::recording();
    let pipeline = ReplyPipeline::new(PipelineConfig::default(), collaborators);
    let source = stream::iter(vec![
        Ok("【高兴】一".to_string()),
        Ok("【平静】".to_string()),
        Err(ReplyError::FragmentSource {
            message: "connection reset".to_string(),
        }),
    ])
    .boxed();

    let units = collect_turn(&pipeline, source).await;

    assert_eq!(units.len(), 2, "{:?}", units);
    assert_eq!(units[0].sequence_index, 0);
    assert_eq!(units[0].display_text, "一");
    assert!(!units[0].is_final);

    let error = &units[1];
    assert!(error.is_final);
    assert!(error.is_error());
    assert_eq!(error.resolved_emotion, "伤心");
    assert!(error.display_text.contains("connection reset"));
    assert_well_formed(&units);

    assert_eq!(
        status.notices(),
        vec![
            ClientNotice::Error {
                code: "network_error".to_string(),
                detail: "Fragment source failed: connection reset".to_string(),
            },
            ClientNotice::StatusReset {
                status: "input".to_string(),
            },
        ]
    );
    assert!(memory.entries().is_empty());

    assert_eq!(pipeline.active_tasks(), 0);
    assert_eq!(pipeline.live_turns(), 0);
}

#[tokio::test]
async fn immediate_source_failure_yields_only_error_unit() {
    let (collaborators, _memory, status) = Collaborators::recording();
    let pipeline = ReplyPipeline::new(PipelineConfig::default(), collaborators);
    let source = stream::iter(vec![Err(ReplyError::FragmentSource {
        message: "HTTP 401 Unauthorized".to_string(),
    })])
    .boxed();

    let units = collect_turn(&pipeline, source).await;

    assert_eq!(units.len(), 1);
    assert!(units[0].is_error());
    assert_eq!(units[0].sequence_index, 0);
    assert!(matches!(
        &status.notices()[0],
        ClientNotice::Error { code, .. } if code == "401"
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_early_units_still_publish_in_order() {
    let translator = Arc::new(DelayTranslator::new([(0, 150), (1, 75), (2, 0)]));
    let collaborators = Collaborators::passthrough().with_translator(translator.clone());
    let pipeline = ReplyPipeline::new(PipelineConfig::default().with_workers(3), collaborators);

    let units = collect_turn(&pipeline, fragments(&["【a】零", "【b】一", "【c】二"])).await;

    let order: Vec<u64> = units.iter().map(|u| u.sequence_index).collect();
    assert_eq!(order, vec![0, 1, 2]);
    assert_eq!(translator.completed(), vec![2, 1, 0]);
    assert_well_formed(&units);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reversed_latency_does_not_change_output_order() {
    let count = 8u64;
    let translator = Arc::new(DelayTranslator::new((0..count).map(|i| (i, (count - i) * 10))));
    let collaborators = Collaborators::passthrough().with_translator(translator.clone());
    let pipeline = ReplyPipeline::new(
        PipelineConfig::default()
            .with_workers(count as usize)
            .with_queue_capacity(count as usize),
        collaborators,
    );

    let reply: String = (0..count).map(|i| format!("【t{}】句{}", i, i)).collect();
    let units = collect_turn(&pipeline, fragments(&[reply.as_str()])).await;

    let order: Vec<u64> = units.iter().map(|u| u.sequence_index).collect();
    assert_eq!(order, (0..count).collect::<Vec<_>>());
    let texts: Vec<String> = units.iter().map(|u| u.display_text.clone()).collect();
    let expected: Vec<String> = (0..count).map(|i| format!("句{}", i)).collect();
    assert_eq!(texts, expected);
    assert_well_formed(&units);
}

#[tokio::test]
async fn trailing_untagged_text_becomes_final_unit() {
    let mut segmenter = Segmenter::new();
    assert!(segmenter.push_fragment("…嗯").is_empty());
    let (unit, _) = segmenter.finish();
    assert_eq!(unit, SentenceUnit::new("…嗯", 0, true));

    // Through the pipeline the untagged final index closes the turn
    let (collaborators, memory, _status) = Collaborators::recording();
    let pipeline = ReplyPipeline::new(PipelineConfig::default(), collaborators);
    let units = collect_turn(&pipeline, fragments(&["【高兴】好的【", "平静】嗯【", "…嗯"])).await;

    assert_eq!(units.len(), 3, "{:?}", units);
    assert_eq!(units[0].display_text, "好的");
    assert_eq!(units[1].display_text, "嗯");
    assert!(!units[1].is_final);
    assert_eq!(units[2].sequence_index, 2);
    assert!(units[2].is_final);
    assert!(!units[2].is_error());
    assert!(units[2].display_text.is_empty());
    assert_well_formed(&units);
    assert_eq!(
        memory.entries(),
        vec![(Role::Assistant, "【高兴】好的【平静】嗯【…嗯".to_string())]
    );
}

#[tokio::test]
async fn tagless_reply_closes_with_empty_final_unit() {
    let pipeline = ReplyPipeline::new(PipelineConfig::default(), Collaborators::passthrough());
    let units = collect_turn(&pipeline, fragments(&["…", "嗯"])).await;

    assert_eq!(units.len(), 1);
    assert!(units[0].is_final);
    assert!(!units[0].is_error());
    assert!(units[0].display_text.is_empty());
}

#[tokio::test]
async fn empty_intermediate_units_are_skipped() {
    let pipeline = ReplyPipeline::new(PipelineConfig::default(), Collaborators::passthrough());
    let units = collect_turn(&pipeline, fragments(&["【高兴】一【空】  【平静】二"])).await;

    let texts: Vec<&str> = units.iter().map(|u| u.display_text.as_str()).collect();
    assert_eq!(texts, vec!["一", "二"]);
    let order: Vec<u64> = units.iter().map(|u| u.sequence_index).collect();
    assert_eq!(order, vec![0, 2]);
    assert_well_formed(&units);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_flight_units_never_exceed_queue_capacity() {
    let probe = Arc::new(ConcurrencyProbe::default());
    let collaborators = Collaborators::passthrough().with_translator(probe.clone());
    let pipeline = ReplyPipeline::new(
        PipelineConfig::default()
            .with_workers(4)
            .with_queue_capacity(2),
        collaborators,
    );

    let reply: String = (0..10).map(|i| format!("【t】{}", i)).collect();
    let units = collect_turn(&pipeline, fragments(&[reply.as_str()])).await;

    assert_eq!(units.len(), 10);
    assert_well_formed(&units);
    let max = probe.max.load(Ordering::SeqCst);
    assert!(max <= 2, "{} units enriched at once with capacity 2", max);
    assert!(max >= 1);
}

#[tokio::test]
async fn classifier_failure_degrades_without_failing_turn() {
    let collaborators = Collaborators::passthrough().with_classifier(Arc::new(LookupClassifier));
    let pipeline = ReplyPipeline::new(PipelineConfig::default(), collaborators);

    let units = collect_turn(&pipeline, fragments(&["【高兴】好【未知】嗯"])).await;

    assert_eq!(units.len(), 2);
    assert_eq!(units[0].resolved_emotion, "happy");
    assert_eq!(units[1].resolved_emotion, "normal");
    assert_eq!(units[1].confidence, 0.5);
    assert!(!units[1].is_error());
}

#[tokio::test]
async fn dropping_stream_mid_turn_tears_everything_down() {
    let pipeline = ReplyPipeline::new(PipelineConfig::default(), Collaborators::passthrough());
    let mut stream = pipeline.run_turn(TurnRequest::new(
        "hi",
        endless_fragments(&["【高兴】一【平静】二"]),
    ));

    let first = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.sequence_index, 0);
    assert!(pipeline.active_tasks() > 0);
    assert_eq!(pipeline.live_turns(), 1);

    drop(stream);

    assert_eq!(pipeline.live_turns(), 0);
    wait_for_no_tasks(&pipeline).await;
}

#[tokio::test]
async fn cancellation_token_ends_turn() {
    let pipeline = ReplyPipeline::new(PipelineConfig::default(), Collaborators::passthrough());
    let cancel = CancellationToken::new();
    let mut stream = pipeline.run_turn(
        TurnRequest::new("hi", endless_fragments(&["【高兴】一【"]))
            .with_cancellation(cancel.clone()),
    );

    let first = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.display_text, "一");

    cancel.cancel();
    let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap();
    assert!(next.is_none());

    assert_eq!(pipeline.live_turns(), 0);
    assert_eq!(pipeline.active_tasks(), 0);
}

#[tokio::test]
async fn turns_are_independent() {
    let (collaborators, memory, _status) = Collaborators::recording();
    let pipeline = ReplyPipeline::new(PipelineConfig::default(), collaborators);

    let (a, b) = tokio::join!(
        collect_turn(&pipeline, fragments(&["【高兴】甲【平静】乙"])),
        collect_turn(&pipeline, fragments(&["【难过】丙"])),
    );

    assert_well_formed(&a);
    assert_well_formed(&b);
    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 1);
    assert_eq!(b[0].sequence_index, 0);
    assert_eq!(memory.entries().len(), 2);
    assert_eq!(pipeline.active_tasks(), 0);
}
