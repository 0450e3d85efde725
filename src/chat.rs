//! Chat orchestration loop
//!
//! Stateless across requests: the whole conversation is rebuilt from the
//! caller-supplied history on every call. One request drives one model
//! session and one outbound event stream:
//!
//! history → context → session → stream → (tool call → result → resume)* → done
//!
//! Tool dispatch is mediated here rather than inside the provider: a
//! function-call event is looked up in the registry, executed, and its
//! result re-submitted to the session before streaming resumes.

use crate::error::AgentError;
use crate::gemini::{ChatModel, Content};
use crate::knowledge::{retrieve, KnowledgeIndex, DEFAULT_TOP_N};
use crate::models::{ConversationTurn, ModelEvent, Role, StreamEvent};
use crate::persona::Persona;
use crate::tools::ToolRegistry;
use crate::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const MAX_TOOL_ROUNDS: u32 = 8;
const EVENT_CHANNEL_CAPACITY: usize = 32;

pub struct ChatOrchestrator {
    model: Arc<dyn ChatModel>,
    registry: Arc<ToolRegistry>,
    knowledge: Arc<dyn KnowledgeIndex>,
    persona: Persona,
}

impl ChatOrchestrator {
    pub fn new(
        model: Arc<dyn ChatModel>,
        registry: Arc<ToolRegistry>,
        knowledge: Arc<dyn KnowledgeIndex>,
        persona: Persona,
    ) -> Self {
        Self {
            model,
            registry,
            knowledge,
            persona,
        }
    }

    /// One request, one event stream.
    ///
    /// Any failure anywhere in the pipeline is collapsed into a single
    /// persona-voiced `Error` event; the stream always terminates with
    /// `End`. There is no retry.
    pub fn stream_reply(self: &Arc<Self>, history: Vec<ConversationTurn>) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let orchestrator = Arc::clone(self);

        tokio::spawn(async move {
            if let Err(e) = orchestrator.run(history, &tx).await {
                warn!("Chat pipeline failed: {}", e);
                let _ = tx
                    .send(StreamEvent::Error(format!(
                        "{}{}",
                        orchestrator.persona.error_prefix, e
                    )))
                    .await;
            }
            let _ = tx.send(StreamEvent::End).await;
        });

        rx
    }

    async fn run(&self, history: Vec<ConversationTurn>, tx: &mpsc::Sender<StreamEvent>) -> Result<()> {
        // Idle → ContextBuilt
        let (mut contents, question) = convert_history(&history)?;

        let context = if self.persona.use_knowledge {
            retrieve(self.knowledge.as_ref(), &question, DEFAULT_TOP_N).await
        } else {
            String::new()
        };
        let system_instruction = self.persona.system_instruction(&context);

        debug!(
            replayed_turns = contents.len(),
            context_chars = context.len(),
            "Context built"
        );

        // ContextBuilt → SessionCreated
        contents.push(Content::user_text(question));
        let declarations = self.registry.declarations();

        // SessionCreated → Streaming, with ToolPending detours
        let mut rounds = 0;
        loop {
            let mut events = self
                .model
                .stream_generate(
                    self.persona.model,
                    &system_instruction,
                    &contents,
                    &declarations,
                )
                .await?;

            let mut pending_call: Option<(String, serde_json::Value)> = None;

            while let Some(event) = events.recv().await {
                match event? {
                    ModelEvent::Text(text) => {
                        // Forward immediately, in arrival order, unbuffered.
                        if tx.send(StreamEvent::TextDelta(text)).await.is_err() {
                            // Caller went away; nothing left to stream to.
                            return Ok(());
                        }
                    }
                    ModelEvent::FunctionCall { name, args } => {
                        info!(tool = %name, "{} is analyzing data", self.persona.name);
                        pending_call = Some((name, args));
                    }
                }
            }

            // Streaming → Done
            let Some((name, args)) = pending_call else {
                return Ok(());
            };

            // Streaming → ToolPending
            rounds += 1;
            if rounds > MAX_TOOL_ROUNDS {
                return Err(AgentError::ToolError(format!(
                    "model requested more than {} tool rounds",
                    MAX_TOOL_ROUNDS
                )));
            }

            let _ = tx
                .send(StreamEvent::ToolInvocation {
                    name: name.clone(),
                    args: args.clone(),
                })
                .await;

            let tool = self
                .registry
                .get(&name)
                .ok_or_else(|| AgentError::ToolNotFound(name.clone()))?;
            let value = tool.execute(&args).await;

            debug!(tool = %name, "Tool round {} complete", rounds);
            let _ = tx
                .send(StreamEvent::ToolResult {
                    name: name.clone(),
                    value: value.clone(),
                })
                .await;

            // Feed the call and its result back into the session, then
            // resume streaming: ToolPending → Streaming.
            contents.push(Content::model_function_call(&name, args));
            contents.push(Content::function_response(&name, value));
        }
    }
}

/// Split the history: the last turn is the pending question, everything
/// before it replays in original order with roles preserved.
pub fn convert_history(history: &[ConversationTurn]) -> Result<(Vec<Content>, String)> {
    let Some((last, prior)) = history.split_last() else {
        return Err(AgentError::InvalidRequest("history is empty".to_string()));
    };

    let contents = prior
        .iter()
        .map(|turn| match turn.role {
            Role::User => Content::user_text(&turn.parts),
            Role::Model => Content::model_text(&turn.parts),
        })
        .collect();

    Ok((contents, last.parts.clone()))
}
