use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error};

use crate::agent::{CompletionRequest, CompletionSource, DeltaStream, RawDelta};
use crate::db::ChatStore;
use crate::errors::AppError;
use crate::models::{ChatRequest, Conversation, Message, StreamChunk, StreamEvent};
use crate::search::PromptAugmenter;
use crate::service::classifier::{Classified, EventClassifier};
use crate::service::encoder::ResponseStreamEncoder;
use crate::service::lifecycle::MessageLifecycleTracker;
use crate::service::observer::PipelineObserver;
use crate::service::stream_lock::StreamLocks;

const MAX_MESSAGE_LENGTH: usize = 10_000;
const MAX_TITLE_CHARS: usize = 60;
const OUTBOUND_BUFFER: usize = 64;

/// Per-deployment knobs for the reply pipeline.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub model: String,
    pub system_prompt: String,
    pub persist_thinking: bool,
}

/// Outbound chunks of one chat request. Dropping it cancels the request.
pub struct ChatStream {
    inner: ReceiverStream<StreamChunk>,
    _cancel_on_drop: DropGuard,
}

impl Stream for ChatStream {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn ChatStore>,
    augmenter: PromptAugmenter,
    completions: Arc<dyn CompletionSource>,
    locks: StreamLocks,
    observer: Arc<dyn PipelineObserver>,
    settings: ChatSettings,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        augmenter: PromptAugmenter,
        completions: Arc<dyn CompletionSource>,
        observer: Arc<dyn PipelineObserver>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            store,
            augmenter,
            completions,
            locks: StreamLocks::new(),
            observer,
            settings,
        }
    }

    pub async fn get_conversations(&self) -> Result<Vec<Conversation>, AppError> {
        self.store.list_conversations().await
    }

    pub async fn get_messages(&self, conversation_id: i64) -> Result<Vec<Message>, AppError> {
        if !self.store.conversation_exists(conversation_id).await? {
            return Err(AppError::ConversationNotFound { id: conversation_id });
        }
        self.store.list_messages(conversation_id).await
    }

    /// Accepts a chat request and starts streaming the reply.
    ///
    /// Everything that can reject the request (validation, unknown
    /// conversation, a reply already in progress) happens here, before any
    /// upstream call. The reply itself runs on its own task.
    pub async fn start_chat(&self, request: ChatRequest) -> Result<ChatStream, AppError> {
        let content = validate_content(&request.content)?;

        // ── Resolve or create conversation, then take its stream lock ─────────
        let (lease, created_conversation) = match request.conversation_id {
            Some(id) => {
                if !self.store.conversation_exists(id).await? {
                    return Err(AppError::ConversationNotFound { id });
                }
                (self.locks.try_acquire(id)?, None)
            }
            None => {
                let id = self.store.create_conversation(&title_for(&content)).await?;
                (self.locks.try_acquire(id)?, Some(id))
            }
        };
        let conversation_id = lease.conversation_id();

        // ── Persist user turn and the pending assistant message ───────────────
        self.store.save_user_message(conversation_id, &content).await?;
        let tracker = MessageLifecycleTracker::begin(
            Arc::clone(&self.store),
            Arc::clone(&self.observer),
            lease,
            self.settings.persist_thinking,
        )
        .await?;

        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let cancel = CancellationToken::new();
        let run = PipelineRun {
            content,
            enable_search: request.enable_search,
            enable_thinking: request.enable_thinking,
            created_conversation,
            tracker,
            encoder: ResponseStreamEncoder::new(tx),
            cancel: cancel.clone(),
        };

        let svc = self.clone();
        tokio::spawn(async move { svc.drive(run).await });

        Ok(ChatStream {
            inner: ReceiverStream::new(rx),
            _cancel_on_drop: cancel.drop_guard(),
        })
    }

    async fn drive(&self, mut run: PipelineRun) {
        let message_id = run.tracker.message_id();

        if let Some(id) = run.created_conversation {
            self.emit(&mut run.encoder, StreamEvent::ConversationCreated(id)).await;
        }
        self.emit(&mut run.encoder, StreamEvent::MessageCreated(message_id)).await;

        let mut classifier = EventClassifier::new(run.enable_thinking);

        let prompt = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => None,
            prompt = self.augmenter.augment(&run.content, run.enable_search) => Some(prompt),
        };

        let mut deltas: DeltaStream = match prompt {
            Some(prompt) => {
                self.observer.on_prompt_ready(message_id, prompt != run.content);
                self.completions.stream(
                    CompletionRequest {
                        model: self.settings.model.clone(),
                        system_prompt: self.settings.system_prompt.clone(),
                        user_content: prompt,
                        thinking: run.enable_thinking,
                    },
                    run.cancel.clone(),
                )
            }
            None => Box::pin(futures_util::stream::once(async {
                RawDelta::Failed(AppError::Cancelled)
            })),
        };
        classifier.start();

        while !classifier.is_closed() && !run.tracker.status().is_terminal() {
            let next = tokio::select! {
                biased;
                _ = run.cancel.cancelled() => Some(RawDelta::Failed(AppError::Cancelled)),
                delta = deltas.next() => delta,
            };
            let events = match next {
                Some(delta) => classifier.classify(delta),
                None => classifier.finish().into_iter().collect(),
            };
            self.relay(events, &mut run).await;
        }
        // Closes the upstream response, if still open.
        drop(deltas);

        if !run.encoder.is_closed() {
            error!("Pipeline for message {message_id} ended without a terminal event");
        }
        debug!(
            "Pipeline for message {message_id} finished as {} ({:?}) with {} chars",
            run.tracker.status(),
            classifier.phase(),
            run.tracker.content().len()
        );
    }

    async fn relay(&self, events: Vec<Classified>, run: &mut PipelineRun) {
        for classified in events {
            if let Some(event) = run.tracker.apply(classified).await {
                self.emit(&mut run.encoder, event).await;
            }
        }
    }

    async fn emit(&self, encoder: &mut ResponseStreamEncoder, event: StreamEvent) {
        self.observer.on_event(&event);
        if !encoder.emit(&event).await {
            debug!("Dropped outbound event, client is gone");
        }
    }
}

/// State owned by the task streaming one reply.
struct PipelineRun {
    content: String,
    enable_search: bool,
    enable_thinking: bool,
    created_conversation: Option<i64>,
    tracker: MessageLifecycleTracker,
    encoder: ResponseStreamEncoder,
    cancel: CancellationToken,
}

fn validate_content(raw: &str) -> Result<String, AppError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(AppError::EmptyField { field_name: "content".to_string() });
    }
    let length = content.chars().count();
    if length > MAX_MESSAGE_LENGTH {
        return Err(AppError::FieldTooLong {
            field_name: "content".to_string(),
            max_length: MAX_MESSAGE_LENGTH,
            actual_length: length,
        });
    }
    Ok(content.to_string())
}

fn title_for(content: &str) -> String {
    if content.chars().count() > MAX_TITLE_CHARS {
        format!("{}…", content.chars().take(MAX_TITLE_CHARS).collect::<String>())
    } else {
        content.to_string()
    }
}
