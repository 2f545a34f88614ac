//! The orchestration facade: binds the canonical stages to adapters and
//! drives content runs, batches and audience engagement.
//!
//! Stages are appended in canonical order while their collaborator is
//! bound. The pipeline ends before the first unbound resource stage, so an
//! offline configuration with only a content generator still yields a
//! working topic and content pipeline.

use crate::adapters::{
    fallback, ContentGenerator, DryRunPublisher, EdgeTtsSynthesizer, EngagementChannel,
    FaceAnimator, GeminiClient, ImageSource, InMemoryEngagementChannel, Interaction,
    MarketingOptimizer, Publisher, ReplyWriter, SadTalkerAnimator, SpeechSynthesizer,
    StaticImageSource, TopicSource,
};
use crate::cancellation::CancellationToken;
use crate::config::AppConfig;
use crate::core::{PipelineState, StageName, StageTrace, StateField};
use crate::errors::{ClipflowError, StageError};
use crate::events::{EventSink, NoOpEventSink};
use crate::pipeline::{
    PipelineBuilder, PipelineRunner, Resolution, RetryOutcome, RetryPolicy, RunReport,
    StageDescriptor,
};
use crate::records::RunRecord;
use crate::stages::{
    AnimationStage, ContentStage, MarketingStage, PublishingStage, RunScope, TopicSelectionStage,
    VisualStage, VoiceStage,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Name of the content pipeline.
pub const CONTENT_PIPELINE: &str = "content";

/// Collaborators the orchestrator can bind. `None` leaves a stage unbound.
#[derive(Debug, Clone, Default)]
struct Bindings {
    topics: Option<Arc<dyn TopicSource>>,
    content: Option<Arc<dyn ContentGenerator>>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    images: Option<Arc<dyn ImageSource>>,
    animator: Option<Arc<dyn FaceAnimator>>,
    marketing: Option<Arc<dyn MarketingOptimizer>>,
    publisher: Option<Arc<dyn Publisher>>,
    engagement: Option<Arc<dyn EngagementChannel>>,
    replies: Option<Arc<dyn ReplyWriter>>,
}

/// Builder for [`Orchestrator`].
///
/// Unset text collaborators default to a [`GeminiClient`], which without an
/// API key fails with a configuration error and so degrades to fallback
/// content. Resource collaborators have no default.
#[must_use]
pub struct OrchestratorBuilder {
    config: AppConfig,
    bindings: Bindings,
    sink: Arc<dyn EventSink>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

impl OrchestratorBuilder {
    fn new(config: AppConfig) -> Self {
        Self {
            config,
            bindings: Bindings::default(),
            sink: Arc::new(NoOpEventSink),
            shutdown: CancellationToken::new(),
        }
    }

    /// Binds the topic source.
    pub fn with_topic_source(mut self, source: Arc<dyn TopicSource>) -> Self {
        self.bindings.topics = Some(source);
        self
    }

    /// Binds the content generator.
    pub fn with_content_generator(mut self, generator: Arc<dyn ContentGenerator>) -> Self {
        self.bindings.content = Some(generator);
        self
    }

    /// Binds the speech synthesizer.
    pub fn with_speech_synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.bindings.speech = Some(synthesizer);
        self
    }

    /// Binds the image source.
    pub fn with_image_source(mut self, source: Arc<dyn ImageSource>) -> Self {
        self.bindings.images = Some(source);
        self
    }

    /// Binds the face animator.
    pub fn with_face_animator(mut self, animator: Arc<dyn FaceAnimator>) -> Self {
        self.bindings.animator = Some(animator);
        self
    }

    /// Binds the marketing optimizer.
    pub fn with_marketing(mut self, optimizer: Arc<dyn MarketingOptimizer>) -> Self {
        self.bindings.marketing = Some(optimizer);
        self
    }

    /// Binds the publisher.
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.bindings.publisher = Some(publisher);
        self
    }

    /// Binds the engagement channel.
    pub fn with_engagement_channel(mut self, channel: Arc<dyn EngagementChannel>) -> Self {
        self.bindings.engagement = Some(channel);
        self
    }

    /// Binds the reply writer.
    pub fn with_reply_writer(mut self, writer: Arc<dyn ReplyWriter>) -> Self {
        self.bindings.replies = Some(writer);
        self
    }

    /// Sets the event sink for every run.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Uses `token` as the shutdown signal for every run.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Binds every collaborator the configuration can provide.
    ///
    /// Animation stays unbound without a SadTalker checkout and the visual
    /// stage without an avatar or stock search, which ends the pipeline
    /// before them.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a SadTalker path without
    /// `inference.py` or an HTTP client that cannot be built.
    pub fn with_configured_adapters(self) -> Result<Self, ClipflowError> {
        let config = self.config.clone();
        let gemini = Arc::new(GeminiClient::new(&config.content, &config.persona)?);
        let mut builder = self
            .with_topic_source(gemini.clone())
            .with_content_generator(gemini.clone())
            .with_marketing(gemini.clone())
            .with_reply_writer(gemini)
            .with_speech_synthesizer(Arc::new(EdgeTtsSynthesizer::new(&config.voice)))
            .with_publisher(Arc::new(DryRunPublisher))
            .with_engagement_channel(Arc::new(InMemoryEngagementChannel::new()));

        if let Some(images) = image_source(&config)? {
            builder = builder.with_image_source(images);
        } else {
            warn!("no avatar image configured, pipeline ends after voice");
        }

        if config.animation.sadtalker_path.is_some() {
            builder = builder.with_face_animator(Arc::new(SadTalkerAnimator::new(&config.animation)?));
        } else {
            warn!("SADTALKER_PATH not set, pipeline ends before animation");
        }
        Ok(builder)
    }

    /// Wires the pipelines.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the default client cannot be built
    /// or a validation error if the bound stages do not form a pipeline.
    pub fn build(self) -> Result<Orchestrator, ClipflowError> {
        let mut bindings = self.bindings;
        if bindings.topics.is_none()
            || bindings.content.is_none()
            || bindings.marketing.is_none()
            || bindings.replies.is_none()
        {
            let gemini = Arc::new(GeminiClient::new(&self.config.content, &self.config.persona)?);
            if !gemini.has_api_key() {
                warn!("GEMINI_API_KEY not set, text stages will use fallback content");
            }
            if bindings.topics.is_none() {
                bindings.topics = Some(gemini.clone());
            }
            if bindings.content.is_none() {
                bindings.content = Some(gemini.clone());
            }
            if bindings.marketing.is_none() {
                bindings.marketing = Some(gemini.clone());
            }
            if bindings.replies.is_none() {
                bindings.replies = Some(gemini);
            }
        }

        let with_topic = content_pipeline(&self.config, &bindings, &self.sink, true)?;
        let select_topic = content_pipeline(&self.config, &bindings, &self.sink, false)?;
        info!(stages = ?select_topic.stage_names(), "content pipeline ready");

        Ok(Orchestrator {
            config: self.config,
            bindings,
            with_topic,
            select_topic,
            shutdown: self.shutdown,
        })
    }
}

/// Builds the content pipeline for the bound collaborators.
fn content_pipeline(
    config: &AppConfig,
    bindings: &Bindings,
    sink: &Arc<dyn EventSink>,
    topic_given: bool,
) -> Result<PipelineRunner, ClipflowError> {
    let mut builder = PipelineBuilder::new(CONTENT_PIPELINE)
        .with_retry(config.retry.clone())
        .with_event_sink(Arc::clone(sink));

    if topic_given {
        builder = builder.with_initial_fields([StateField::Topic]);
    } else if let Some(ref topics) = bindings.topics {
        builder = builder.stage(
            TopicSelectionStage::new(Arc::clone(topics), config.persona.niche.clone()).descriptor(),
        );
    }
    if let Some(ref generator) = bindings.content {
        builder = builder.stage(ContentStage::new(Arc::clone(generator)).descriptor());
    }

    let resources: [Option<StageDescriptor>; 3] = [
        bindings
            .speech
            .clone()
            .map(|tts| VoiceStage::new(tts, config.voice.voice_id.clone()).descriptor()),
        bindings.images.clone().map(|images| VisualStage::new(images).descriptor()),
        bindings.animator.clone().map(|animator| AnimationStage::new(animator).descriptor()),
    ];
    let mut bound = 0;
    for descriptor in resources.into_iter().map_while(|d| d) {
        builder = builder.stage(descriptor);
        bound += 1;
    }

    if bound == 3 {
        if let Some(ref optimizer) = bindings.marketing {
            builder = builder.stage(MarketingStage::new(Arc::clone(optimizer)).descriptor());
        }
        if let Some(ref publisher) = bindings.publisher {
            builder = builder.stage(PublishingStage::new(Arc::clone(publisher)).descriptor());
        }
    }

    Ok(builder.build()?)
}

/// Outcome of one engagement pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementReport {
    /// The platform engaged with.
    pub platform: String,
    /// Interactions fetched.
    pub fetched: usize,
    /// Replies posted.
    pub replied: usize,
    /// Replies that used fallback text.
    pub degraded_replies: usize,
    /// One entry per step.
    pub trace: Vec<StageTrace>,
    /// The error that stopped the pass, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
}

impl EngagementReport {
    fn new(platform: &str) -> Self {
        Self {
            platform: platform.to_string(),
            fetched: 0,
            replied: 0,
            degraded_replies: 0,
            trace: Vec::new(),
            error: None,
        }
    }

    /// Returns true if every fetched interaction got a reply.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Drives content runs and engagement passes for one configuration.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: AppConfig,
    bindings: Bindings,
    with_topic: PipelineRunner,
    select_topic: PipelineRunner,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Starts a builder with nothing bound.
    pub fn builder(config: AppConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Binds every collaborator the configuration can provide.
    ///
    /// # Errors
    ///
    /// See [`OrchestratorBuilder::with_configured_adapters`].
    pub fn from_config(config: &AppConfig) -> Result<Self, ClipflowError> {
        Self::builder(config.clone()).with_configured_adapters()?.build()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Returns the token that cancels every in-flight run.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Returns the stages a run executes, with or without a given topic.
    #[must_use]
    pub fn stage_names(&self, topic_given: bool) -> Vec<StageName> {
        if topic_given {
            self.with_topic.stage_names()
        } else {
            self.select_topic.stage_names()
        }
    }

    /// Runs the content pipeline once and saves its run record.
    ///
    /// Without a topic (or with a blank one) topic selection runs first.
    /// Never fails: the outcome is in the report's state and trace.
    pub async fn produce_content(&self, topic: Option<&str>) -> RunReport {
        let topic = topic.map(str::trim).filter(|t| !t.is_empty());
        let (runner, initial) = match topic {
            Some(topic) => (&self.with_topic, PipelineState::new(topic)),
            None => (&self.select_topic, PipelineState::untitled()),
        };

        let run_id = Uuid::new_v4();
        let token = self.run_token();
        let scope = RunScope::new(run_id, &self.config.output.root, &Utc::now(), token.clone());
        info!(run_id = %run_id, topic = ?topic, "starting content run");

        let report = self
            .until_shutdown(&token, runner.run(initial.with_run_id(run_id), &scope))
            .await;

        let record = RunRecord::from_report(&report);
        if let Err(err) = record.save(&self.config.output.logs_dir()) {
            warn!(run_id = %run_id, error = %err, "failed to save run record");
        }
        report
    }

    /// Runs one independent content run per topic, up to
    /// `run.batch_concurrency` at a time. Reports come back in input order.
    pub async fn produce_batch<I, S>(&self, topics: I) -> Vec<RunReport>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: Vec<String> = topics.into_iter().map(Into::into).collect();
        info!(runs = topics.len(), "starting batch");

        stream::iter(topics)
            .map(|topic| async move { self.produce_content(Some(&topic)).await })
            .buffered(self.config.run.batch_concurrency.max(1))
            .collect()
            .await
    }

    /// Replies to new interactions on `platform`.
    ///
    /// Reply text degrades to a generic thank-you; fetching and posting
    /// propagate their failures and stop the pass.
    pub async fn engage_audience(&self, platform: &str) -> EngagementReport {
        let mut report = EngagementReport::new(platform);
        let Some(channel) = self.bindings.engagement.clone() else {
            report.error = Some(StageError::configuration("no engagement channel bound"));
            return report;
        };
        let Some(writer) = self.bindings.replies.clone() else {
            report.error = Some(StageError::configuration("no reply writer bound"));
            return report;
        };

        let token = self.run_token();
        let policy = RetryPolicy::new(self.config.retry.clone());
        self.until_shutdown(&token, async {
            let fetched = traced_step(
                &mut report.trace,
                "fetch_interactions",
                policy.run(&token, |_| channel.fetch_interactions(platform), |_| None),
            )
            .await;
            let interactions: Vec<Interaction> = match fetched {
                Ok((interactions, _)) => interactions,
                Err(err) => {
                    report.error = Some(err);
                    return;
                }
            };
            report.fetched = interactions.len();

            let persona = self.config.persona.name.as_str();
            for interaction in &interactions {
                let step = format!("reply:{}", interaction.id);
                let written = traced_step(
                    &mut report.trace,
                    &step,
                    policy.run(
                        &token,
                        |_| writer.write_reply(persona, interaction),
                        |_| Some(fallback::reply(&interaction.author)),
                    ),
                )
                .await;
                let reply = match written {
                    Ok((reply, degraded)) => {
                        if degraded {
                            report.degraded_replies += 1;
                        }
                        reply
                    }
                    Err(err) => {
                        report.error = Some(err);
                        return;
                    }
                };

                let step = format!("post:{}", interaction.id);
                let posted = traced_step(
                    &mut report.trace,
                    &step,
                    policy.run(
                        &token,
                        |_| channel.post_reply(platform, interaction, &reply),
                        |_| None,
                    ),
                )
                .await;
                if let Err(err) = posted {
                    report.error = Some(err);
                    return;
                }
                report.replied += 1;
            }
        })
        .await;

        info!(
            platform,
            fetched = report.fetched,
            replied = report.replied,
            degraded = report.degraded_replies,
            "engagement pass finished"
        );
        report
    }

    fn run_token(&self) -> CancellationToken {
        match self.config.run.deadline() {
            Some(deadline) => CancellationToken::with_timeout(deadline),
            None => CancellationToken::new(),
        }
    }

    /// Drives `work` to completion, cancelling `token` if shutdown fires
    /// first. The work still finishes so it can report the cancellation.
    async fn until_shutdown<T>(&self, token: &CancellationToken, work: impl Future<Output = T>) -> T {
        if self.shutdown.is_cancelled() {
            token.cancel(self.shutdown_reason());
        }
        let mut work = std::pin::pin!(work);
        tokio::select! {
            value = &mut work => value,
            () = self.shutdown.cancelled() => {
                token.cancel(self.shutdown_reason());
                work.await
            }
        }
    }

    fn shutdown_reason(&self) -> String {
        self.shutdown.reason().unwrap_or_else(|| "shutdown".to_string())
    }
}

/// Runs one retried engagement step and records its trace.
///
/// Returns the value and whether it came from fallback text.
async fn traced_step<T>(
    trace: &mut Vec<StageTrace>,
    name: &str,
    step: impl Future<Output = RetryOutcome<T>>,
) -> Result<(T, bool), StageError> {
    let mut entry = StageTrace::new(name);
    entry.start();
    let outcome = step.await;
    entry.attempts = outcome.attempts;
    entry.delays_ms = outcome.delays_ms();

    let result = match outcome.resolution {
        Resolution::Primary(value) => {
            entry.succeed();
            Ok((value, false))
        }
        Resolution::Degraded { value, cause } => {
            warn!(step = name, error = %cause, "using fallback reply");
            entry.degraded = true;
            entry.error = Some(cause);
            entry.succeed();
            Ok((value, true))
        }
        Resolution::Failed(err) => {
            entry.fail(err.clone());
            Err(err)
        }
    };
    trace.push(entry);
    result
}

fn image_source(config: &AppConfig) -> Result<Option<Arc<dyn ImageSource>>, ClipflowError> {
    #[cfg(feature = "stock-images")]
    if config.visual.stock_search {
        let pexels = crate::adapters::PexelsImageSource::new(&config.visual)?;
        return Ok(Some(Arc::new(pexels)));
    }

    Ok(config
        .visual
        .image_path
        .clone()
        .map(|path| Arc::new(StaticImageSource::new(Some(path))) as Arc<dyn ImageSource>))
}
