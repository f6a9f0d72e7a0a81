//! Conversation graph: summarizes finished rounds into a chain of nodes.
//!
//! Every `trigger_round` rounds the buffered question/answer pairs are handed
//! to the assistant model in a background task. Nodes are appended one at a
//! time, each parented to the current chain tail.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::ConfigStore;
use crate::events::{EventSink, LiveEvent};
use crate::llm::{LlmService, Message};

pub const DEFAULT_TRIGGER_ROUND: usize = 3;
pub const DEFAULT_SUMMARIZE_TIMEOUT: Duration = Duration::from_secs(30);

const TITLE_CHARS: usize = 15;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

fn next_node_id() -> String {
    format!("node-{}", NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "pid", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub title: String,
    pub question: String,
    pub answer: String,
}

/// One finished question/answer exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    pub question: String,
    pub answer: String,
}

/// Entry of the assistant model's JSON array
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SummaryEntry {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
}

struct GraphState {
    rounds: Vec<Round>,
    nodes: Vec<GraphNode>,
    /// Cancelled and replaced on every clear; pending summaries check it
    /// before appending
    generation: CancellationToken,
}

pub struct ConversationGraph {
    state: Mutex<GraphState>,
    config: Arc<ConfigStore>,
    llm: Arc<LlmService>,
    events: Arc<dyn EventSink>,
    trigger_round: usize,
    timeout: Duration,
    tasks: TaskTracker,
}

impl ConversationGraph {
    pub fn new(
        config: Arc<ConfigStore>,
        llm: Arc<LlmService>,
        events: Arc<dyn EventSink>,
        trigger_round: usize,
        timeout: Duration,
    ) -> Arc<Self> {
        let trigger_round = if trigger_round == 0 {
            DEFAULT_TRIGGER_ROUND
        } else {
            trigger_round
        };
        Arc::new(Self {
            state: Mutex::new(GraphState {
                rounds: Vec::new(),
                nodes: Vec::new(),
                generation: CancellationToken::new(),
            }),
            config,
            llm,
            events,
            trigger_round,
            timeout,
            tasks: TaskTracker::new(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffer one round; every `trigger_round` rounds a summary task is spawned.
    ///
    /// Must be called within a tokio runtime.
    pub fn push(self: &Arc<Self>, question: impl Into<String>, answer: impl Into<String>) {
        let batch = {
            let mut state = self.lock();
            state.rounds.push(Round {
                question: question.into(),
                answer: answer.into(),
            });
            debug!("Graph received round {}", state.rounds.len());

            if state.rounds.len() >= self.trigger_round {
                Some((std::mem::take(&mut state.rounds), state.generation.clone()))
            } else {
                None
            }
        };

        if let Some((rounds, generation)) = batch {
            let graph = Arc::clone(self);
            self.tasks
                .spawn(async move { graph.summarize(rounds, generation).await });
        }
    }

    /// Drop buffered rounds and all nodes; pending summaries are discarded.
    pub fn clear(&self) {
        {
            let mut state = self.lock();
            state.rounds.clear();
            state.nodes.clear();
            state.generation.cancel();
            state.generation = CancellationToken::new();
        }
        self.events.emit(LiveEvent::GraphClear);
    }

    pub fn nodes(&self) -> Vec<GraphNode> {
        self.lock().nodes.clone()
    }

    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Rounds buffered since the last trigger
    pub fn pending_rounds(&self) -> usize {
        self.lock().rounds.len()
    }

    /// Wait until every summary task spawned so far has finished.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    async fn summarize(&self, rounds: Vec<Round>, generation: CancellationToken) {
        let entries = tokio::select! {
            _ = generation.cancelled() => {
                debug!("Graph cleared, dropping summary of {} rounds", rounds.len());
                return;
            }
            entries = self.request_summary(&rounds) => entries,
        };

        let entries = entries.unwrap_or_else(|| naive_entries(&rounds));
        self.append(entries, &generation);
    }

    /// Ask the assistant model; `None` means fall back to naive nodes.
    async fn request_summary(&self, rounds: &[Round]) -> Option<Vec<SummaryEntry>> {
        let model = self.config.get().assistant_model;
        if model.is_empty() {
            debug!("No assistant model configured, using plain nodes");
            return None;
        }

        info!("Summarizing {} rounds with {}", rounds.len(), model);
        let provider = self.llm.provider();
        let prompt = build_prompt(rounds);
        let messages = [Message::user(prompt)];
        let call = provider.generate_content(&model, &messages);

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(reply)) => parse_response(&reply.content),
            Ok(Err(e)) => {
                warn!("Summary request failed: {:#}", e);
                None
            }
            Err(_) => {
                warn!("Summary request timed out after {:?}", self.timeout);
                None
            }
        }
    }

    fn append(&self, entries: Vec<SummaryEntry>, generation: &CancellationToken) {
        for entry in entries {
            let node = {
                let mut state = self.lock();
                if generation.is_cancelled() {
                    return;
                }
                let node = GraphNode {
                    id: next_node_id(),
                    parent_id: state.nodes.last().map(|n| n.id.clone()),
                    title: entry.title,
                    question: entry.question,
                    answer: entry.answer,
                };
                state.nodes.push(node.clone());
                node
            };
            info!("Graph node added: {}", node.title);
            self.events.emit(LiveEvent::GraphAddNode(node));
        }
    }
}

pub fn build_prompt(rounds: &[Round]) -> String {
    let mut transcript = String::new();
    for round in rounds {
        transcript.push_str(&format!(
            "\nQuestion: {}\nAnswer: {}\n",
            round.question, round.answer
        ));
    }

    format!(
        "Summarize the following interview exchanges into mind-map nodes.\n\
         Return only a JSON array. Each element must be an object with the keys \
         \"title\" (a short topic of at most 15 characters), \"question\" (the question, \
         condensed) and \"answer\" (the key points of the answer).\n\
         Merge exchanges that discuss the same topic.\n{}",
        transcript
    )
}

/// Parse the model reply, tolerating a surrounding code fence.
pub fn parse_response(response: &str) -> Option<Vec<SummaryEntry>> {
    let mut body = response.trim();
    for fence in ["```json", "```"] {
        if let Some(rest) = body.strip_prefix(fence) {
            body = rest.strip_suffix("```").unwrap_or(rest).trim();
            break;
        }
    }

    match serde_json::from_str::<Vec<SummaryEntry>>(body) {
        Ok(entries) => Some(entries),
        Err(e) => {
            warn!("Summary reply is not a JSON array: {}", e);
            None
        }
    }
}

/// One entry per round, titled by the start of the question.
pub fn naive_entries(rounds: &[Round]) -> Vec<SummaryEntry> {
    rounds
        .iter()
        .map(|round| SummaryEntry {
            title: truncate_title(&round.question),
            question: round.question.clone(),
            answer: round.answer.clone(),
        })
        .collect()
}

fn truncate_title(question: &str) -> String {
    if question.chars().count() > TITLE_CHARS {
        let mut title: String = question.chars().take(TITLE_CHARS).collect();
        title.push_str("...");
        title
    } else {
        question.to_string()
    }
}
