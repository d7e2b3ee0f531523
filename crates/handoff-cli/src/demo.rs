//! `handoff demo` - インメモリ構成 + 疑似エージェントで一連の流れを動かす
//!
//! 疑似エージェントは最初の数回を 503 で断り、その後は受け付けたレコードを
//! AgentProgressSink 経由で completed まで進めます。
//! 断られたレコードは Reclaimer が拾い直します。

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use clap::Args;
use handoff_core::app::{AppBuilder, NewRecording};
use handoff_core::config::Config;
use handoff_core::domain::{AnalysisResult, Decision, RecordStatus};
use handoff_core::impls::InMemoryTaskStore;
use handoff_core::ports::{
    AgentError, AgentProgressSink, AgentRequest, AgentTransport, Clock, IdGenerator, SystemClock,
    TaskStore, UlidGenerator,
};
use tokio::time::Instant;

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Recordings to upload
    #[arg(long, default_value_t = 3)]
    pub records: usize,

    /// 503 answers the simulated agent gives before it starts accepting
    #[arg(long, default_value_t = 4)]
    pub fail_first: usize,

    /// Simulated time per analysis stage, in milliseconds
    #[arg(long, default_value_t = 400)]
    pub stage_ms: u64,

    /// Give up waiting for the remaining records after this many seconds
    #[arg(long, default_value_t = 30)]
    pub wait_secs: u64,
}

struct SimulatedAgent {
    sink: Arc<dyn AgentProgressSink>,
    failures_left: AtomicUsize,
    stage_delay: Duration,
}

#[async_trait]
impl AgentTransport for SimulatedAgent {
    async fn submit(&self, request: &AgentRequest) -> Result<(), AgentError> {
        let refused = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(AgentError::Server {
                status: 503,
                body: "simulated overload".into(),
            });
        }

        tokio::spawn(analyze(
            Arc::clone(&self.sink),
            request.clone(),
            self.stage_delay,
        ));
        Ok(())
    }
}

/// The agent's side of the pipeline: asr -> llm -> tts -> completed.
async fn analyze(sink: Arc<dyn AgentProgressSink>, request: AgentRequest, stage_delay: Duration) {
    use RecordStatus::*;
    let id = request.record_id;

    let stages = [
        (Uploaded, ProcessingAsr),
        (ProcessingAsr, ProcessingLlm),
        (ProcessingLlm, ProcessingTts),
    ];
    for (n, (from, to)) in stages.into_iter().enumerate() {
        tokio::time::sleep(stage_delay).await;
        match sink.advance(id, from, to).await {
            Ok(true) => {}
            // reclaim 経由だと claim 済み（processing_asr）で届く
            Ok(false) if n == 0 => {}
            Ok(false) => {
                tracing::info!(record_id = %id, "record moved on without the agent, stopping");
                return;
            }
            Err(e) => {
                tracing::warn!(record_id = %id, error = %e, "agent progress write failed");
                return;
            }
        }
    }

    tokio::time::sleep(stage_delay).await;
    let result = AnalysisResult {
        transcript: format!("recording at {}", request.key),
        refined_text: "Please turn on the living room light".into(),
        confidence: 0.87,
        decision: Decision::Accept,
        response_text: "Turning on the living room light.".into(),
        tts_audio_url: Some(format!("tts/{}.mp3", request.record_id)),
    };
    if let Err(e) = sink.complete(id, ProcessingTts, result).await {
        tracing::warn!(record_id = %id, error = %e, "agent completion write failed");
    }
}

/// Shrink the timings so the whole run fits in a few seconds.
fn tune(config: &mut Config) {
    config.agent.base_delay_ms = 100;
    config.agent.max_delay_ms = 400;
    config.reclaimer.tick_interval_ms = 1_000;
    config.reclaimer.grace_window_ms = 1_500;
    config.reclaimer.pacing_delay_ms = 100;
    config.projector.poll_interval_ms = 250;
}

pub async fn run(mut config: Config, args: DemoArgs) -> Result<(), Box<dyn Error>> {
    tune(&mut config);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(SystemClock));
    let store = Arc::new(InMemoryTaskStore::new(Arc::clone(&clock), Arc::clone(&ids)));
    let agent = Arc::new(SimulatedAgent {
        sink: store.clone(),
        failures_left: AtomicUsize::new(args.fail_first),
        stage_delay: Duration::from_millis(args.stage_ms),
    });

    let app = AppBuilder::new(config)
        .with_clock(clock)
        .with_id_generator(Arc::clone(&ids))
        .with_store(store)
        .with_transport(agent)
        .build()?;
    let reclaimer = app.start_reclaimer();

    let owner = ids.generate_owner_id();
    let mut record_ids = Vec::with_capacity(args.records);
    for n in 0..args.records {
        let record = app
            .service
            .upload(NewRecording {
                owner_id: owner,
                bytes: vec![0x1a; 4096 * (n + 1)],
                extension: "webm".into(),
                duration_seconds: 3 + n as u32,
            })
            .await?;
        record_ids.push(record.id);
    }

    if let Some(&first) = record_ids.first() {
        tracing::info!(record_id = %first, "streaming status");
        let mut subscription = app.service.watch(first, owner).await?;
        while let Some(event) = subscription.recv().await {
            print!("{}", event.to_sse_frame());
        }
    }

    let deadline = Instant::now() + Duration::from_secs(args.wait_secs);
    let counts = loop {
        let counts = app.store.counts_by_status().await?;
        if counts.in_flight() == 0 || Instant::now() >= deadline {
            break counts;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };

    let history = app.service.history(owner, None, None).await?;
    for record in &history.items {
        tracing::info!(
            record_id = %record.id,
            status = %record.status,
            failed_dispatches = record.failed_dispatches,
            key = %record.blob.key,
            "final state"
        );
    }
    println!("{}", serde_json::to_string_pretty(&counts)?);

    reclaimer.shutdown_and_join().await;
    Ok(())
}
