use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::agent::ConversationalAgent;
use crate::errors::AgentError;
use crate::models::role::Role;
use crate::registry::ToolRegistry;
use crate::session::{SessionStore, Turn, DEFAULT_SESSION_ID};

/// Content of the unit that closes every successful stream
pub const STREAM_END: &str = "[STREAM_END]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// One unit of streamed output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatChunk {
    Char(char),
    End,
}

impl ChatChunk {
    /// The text carried on the wire for this unit
    pub fn content(&self) -> String {
        match self {
            ChatChunk::Char(c) => c.to_string(),
            ChatChunk::End => STREAM_END.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error("{0}")]
    Agent(#[from] AgentError),
}

/// The rendered agent output of one successful chat call, ready to stream
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatReply {
    segments: Vec<String>,
}

impl ChatReply {
    /// Rendered text of each agent message, in production order
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn text(&self) -> String {
        self.segments.concat()
    }

    /// Every character of every segment in order, then the end marker
    pub fn into_chunks(self) -> impl Iterator<Item = ChatChunk> + Send {
        self.segments
            .into_iter()
            .flat_map(|segment| segment.chars().collect::<Vec<_>>())
            .map(ChatChunk::Char)
            .chain(std::iter::once(ChatChunk::End))
    }
}

/// Runs chat requests against the agent and keeps the session transcript
pub struct ChatService {
    store: Arc<SessionStore>,
    agent: Arc<dyn ConversationalAgent>,
    tools: Arc<ToolRegistry>,
}

impl ChatService {
    pub fn new(
        store: Arc<SessionStore>,
        agent: Arc<dyn ConversationalAgent>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            store,
            agent,
            tools,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Invoke the agent with the session transcript plus the new message.
    ///
    /// The transcript stays locked until the new turns are committed, so
    /// requests on the same session run one at a time. Nothing is committed
    /// when the agent fails.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        let session = self.store.get_or_create(DEFAULT_SESSION_ID);
        let mut transcript = session.lock().await;

        let pending = Turn::User(request.message);
        let mut context = transcript.to_messages();
        context.push(pending.to_message());

        tracing::debug!(
            "Invoking agent with {} messages of context",
            context.len()
        );
        let new_messages = self.agent.invoke(&context, &self.tools).await?;

        transcript.push(pending);
        let mut segments = Vec::new();
        for message in new_messages {
            if message.is_tool_exchange() {
                continue;
            }
            let text = message.render_text();
            match message.role {
                Role::User => transcript.push(Turn::User(text)),
                Role::Assistant => {
                    transcript.push(Turn::Agent(text.clone()));
                    segments.push(text);
                }
            }
        }

        tracing::info!(
            "Chat completed with {} agent messages, transcript has {} turns",
            segments.len(),
            transcript.len()
        );
        Ok(ChatReply { segments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::errors::AgentResult;
    use crate::models::message::Message;
    use crate::models::tool::ToolCall;
    use crate::providers::mock::MockProvider;
    use crate::registry::tests::MockSystem;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Agent that answers from a script and records the context it was given
    struct ScriptedAgent {
        replies: Mutex<Vec<AgentResult<Vec<Message>>>>,
        contexts: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedAgent {
        fn new(replies: Vec<AgentResult<Vec<Message>>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                contexts: Mutex::new(Vec::new()),
            }
        }

        fn contexts(&self) -> Vec<Vec<Message>> {
            self.contexts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ConversationalAgent for ScriptedAgent {
        async fn invoke(
            &self,
            context: &[Message],
            _tools: &ToolRegistry,
        ) -> AgentResult<Vec<Message>> {
            self.contexts.lock().unwrap().push(context.to_vec());
            self.replies.lock().unwrap().remove(0)
        }
    }

    fn service(agent: Arc<dyn ConversationalAgent>) -> ChatService {
        ChatService::new(
            Arc::new(SessionStore::new()),
            agent,
            Arc::new(ToolRegistry::new()),
        )
    }

    async fn transcript(service: &ChatService) -> Vec<Turn> {
        service
            .store()
            .get_or_create(DEFAULT_SESSION_ID)
            .turns()
            .await
    }

    fn stream_contents(reply: ChatReply) -> Vec<String> {
        reply.into_chunks().map(|chunk| chunk.content()).collect()
    }

    #[tokio::test]
    async fn test_chat_streams_characters_then_end() {
        let agent = Arc::new(ScriptedAgent::new(vec![Ok(vec![
            Message::assistant().with_text("Hi!")
        ])]));
        let service = service(agent);

        let reply = service
            .chat(ChatRequest {
                message: "hello".into(),
            })
            .await
            .unwrap();

        assert_eq!(stream_contents(reply), vec!["H", "i", "!", STREAM_END]);
        assert_eq!(
            transcript(&service).await,
            vec![Turn::User("hello".into()), Turn::Agent("Hi!".into())]
        );
    }

    #[tokio::test]
    async fn test_prior_turns_are_kept_and_sent_as_context() {
        let agent = Arc::new(ScriptedAgent::new(vec![
            Ok(vec![Message::assistant().with_text("first answer")]),
            Ok(vec![
                Message::user().with_text("follow-up from agent"),
                Message::assistant().with_text("second answer"),
            ]),
        ]));
        let service = service(agent.clone());

        service
            .chat(ChatRequest {
                message: "one".into(),
            })
            .await
            .unwrap();
        let before = transcript(&service).await;
        assert_eq!(before.len(), 2);

        let reply = service
            .chat(ChatRequest {
                message: "two".into(),
            })
            .await
            .unwrap();
        assert_eq!(reply.text(), "second answer");

        // N prior turns plus the request and the one (user, agent) pair produced
        let after = transcript(&service).await;
        assert_eq!(after.len(), before.len() + 1 + 2);
        assert_eq!(&after[..before.len()], before.as_slice());
        assert_eq!(after[2], Turn::User("two".into()));
        assert_eq!(after[3], Turn::User("follow-up from agent".into()));
        assert_eq!(after[4], Turn::Agent("second answer".into()));

        let contexts = agent.contexts();
        assert_eq!(contexts[1].len(), 3);
        assert_eq!(contexts[1][0].render_text(), "one");
        assert_eq!(contexts[1][1].role, Role::Assistant);
        assert_eq!(contexts[1][2].render_text(), "two");
    }

    #[tokio::test]
    async fn test_concatenated_stream_matches_agent_messages() {
        let agent = Arc::new(ScriptedAgent::new(vec![Ok(vec![
            Message::assistant().with_text("Première "),
            Message::assistant().with_text("réponse ✓"),
        ])]));
        let service = service(agent);

        let reply = service
            .chat(ChatRequest {
                message: "q".into(),
            })
            .await
            .unwrap();
        let contents = stream_contents(reply);

        assert_eq!(
            contents.iter().filter(|c| c.as_str() == STREAM_END).count(),
            1
        );
        assert_eq!(contents.last().map(String::as_str), Some(STREAM_END));
        assert!(contents[..contents.len() - 1]
            .iter()
            .all(|c| c.chars().count() == 1));
        assert_eq!(
            contents[..contents.len() - 1].concat(),
            "Première réponse ✓"
        );
    }

    #[tokio::test]
    async fn test_failure_leaves_transcript_untouched() {
        let agent = Arc::new(ScriptedAgent::new(vec![
            Ok(vec![Message::assistant().with_text("ok")]),
            Err(AgentError::Internal("model unavailable".into())),
        ]));
        let service = service(agent);

        service
            .chat(ChatRequest {
                message: "first".into(),
            })
            .await
            .unwrap();
        let before = transcript(&service).await;

        let result = service
            .chat(ChatRequest {
                message: "second".into(),
            })
            .await;
        assert_eq!(
            result,
            Err(ChatError::Agent(AgentError::Internal(
                "model unavailable".into()
            )))
        );
        assert_eq!(
            result.unwrap_err().to_string(),
            "Internal error: model unavailable"
        );
        assert_eq!(transcript(&service).await, before);
    }

    #[tokio::test]
    async fn test_structured_content_streams_as_json() {
        let value = json!({"balance": {"coin": "SUI", "amount": 42}, "owner": "0xabc"});
        let agent = Arc::new(ScriptedAgent::new(vec![Ok(vec![
            Message::assistant().with_structured(value.clone()),
        ])]));
        let service = service(agent);

        let reply = service
            .chat(ChatRequest {
                message: "balance?".into(),
            })
            .await
            .unwrap();
        let mut contents = stream_contents(reply);
        assert_eq!(contents.pop().as_deref(), Some(STREAM_END));

        let text = contents.concat();
        assert_eq!(text, serde_json::to_string_pretty(&value).unwrap());
        let decoded: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, value);
    }

    #[tokio::test]
    async fn test_tool_results_are_not_recorded_or_streamed() {
        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_request(
                "1",
                Ok(ToolCall::new("test__echo", json!({"message": "ping"}))),
            ),
            Message::assistant().with_text("pong"),
        ]);
        let service = ChatService::new(
            Arc::new(SessionStore::new()),
            Arc::new(Agent::new(Arc::new(provider))),
            Arc::new(ToolRegistry::new().with_system(Arc::new(MockSystem::new("test")))),
        );

        let reply = service
            .chat(ChatRequest {
                message: "ping".into(),
            })
            .await
            .unwrap();
        // The tool request renders to nothing but is still an agent turn
        assert_eq!(reply.segments(), &["".to_string(), "pong".to_string()]);
        assert_eq!(reply.text(), "pong");
        assert_eq!(
            transcript(&service).await,
            vec![
                Turn::User("ping".into()),
                Turn::Agent("".into()),
                Turn::Agent("pong".into())
            ]
        );
    }

    #[tokio::test]
    async fn test_several_pairs_in_one_call() {
        let structured = json!({"coins": [{"type": "0x2::sui::SUI", "balance": "1000"}]});
        let agent = Arc::new(ScriptedAgent::new(vec![
            Ok(vec![Message::assistant().with_text("warm-up")]),
            Ok(vec![
                Message::assistant().with_text("Checking your wallet. "),
                Message::user().with_text("also show coins"),
                Message::assistant().with_structured(structured.clone()),
                Message::user().with_text("thanks"),
                Message::assistant().with_text(" Done."),
            ]),
        ]));
        let service = service(agent);

        service
            .chat(ChatRequest {
                message: "hello".into(),
            })
            .await
            .unwrap();
        let before = transcript(&service).await;

        let reply = service
            .chat(ChatRequest {
                message: "balance?".into(),
            })
            .await
            .unwrap();

        // The request and the agent's first answer, then two more (user, agent) pairs
        let after = transcript(&service).await;
        assert_eq!(after.len(), before.len() + 2 * 3);
        assert_eq!(&after[..before.len()], before.as_slice());

        let pretty = serde_json::to_string_pretty(&structured).unwrap();
        assert_eq!(
            &after[before.len()..],
            &[
                Turn::User("balance?".into()),
                Turn::Agent("Checking your wallet. ".into()),
                Turn::User("also show coins".into()),
                Turn::Agent(pretty.clone()),
                Turn::User("thanks".into()),
                Turn::Agent(" Done.".into()),
            ]
        );

        let mut contents = stream_contents(reply);
        assert_eq!(contents.pop().as_deref(), Some(STREAM_END));
        assert!(!contents.iter().any(|c| c == STREAM_END));
        assert_eq!(
            contents.concat(),
            format!("Checking your wallet. {} Done.", pretty)
        );
    }

    #[tokio::test]
    async fn test_tool_round_then_structured_answer() {
        let structured = json!({"address": "0xabc", "balance": 42});
        let provider = MockProvider::new(vec![
            Message::assistant()
                .with_tool_request(
                    "1",
                    Ok(ToolCall::new("test__echo", json!({"message": "0xabc"}))),
                )
                .with_tool_request(
                    "2",
                    Ok(ToolCall::new("test__echo", json!({"message": "42"}))),
                ),
            Message::assistant().with_structured(structured.clone()),
        ]);
        let service = ChatService::new(
            Arc::new(SessionStore::new()),
            Arc::new(Agent::new(Arc::new(provider))),
            Arc::new(ToolRegistry::new().with_system(Arc::new(MockSystem::new("test")))),
        );

        let reply = service
            .chat(ChatRequest {
                message: "show my balance".into(),
            })
            .await
            .unwrap();
        let mut contents = stream_contents(reply);
        assert_eq!(contents.pop().as_deref(), Some(STREAM_END));
        let decoded: Value = serde_json::from_str(&contents.concat()).unwrap();
        assert_eq!(decoded, structured);

        assert_eq!(
            transcript(&service).await,
            vec![
                Turn::User("show my balance".into()),
                Turn::Agent("".into()),
                Turn::Agent(serde_json::to_string_pretty(&structured).unwrap()),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_reply_streams_only_end() {
        let agent = Arc::new(ScriptedAgent::new(vec![Ok(vec![])]));
        let service = service(agent);

        let reply = service
            .chat(ChatRequest {
                message: "anyone?".into(),
            })
            .await
            .unwrap();
        assert_eq!(stream_contents(reply), vec![STREAM_END]);
        assert_eq!(
            transcript(&service).await,
            vec![Turn::User("anyone?".into())]
        );
    }

    // Every request lands in the one fixed session, so separate callers see
    // each other's history. Pinned here so a change to per-caller sessions is
    // a deliberate one.
    #[tokio::test]
    async fn test_all_requests_share_the_fixed_session() {
        let agent = Arc::new(ScriptedAgent::new(vec![
            Ok(vec![Message::assistant().with_text("to alice")]),
            Ok(vec![Message::assistant().with_text("to bob")]),
        ]));
        let service = service(agent.clone());

        service
            .chat(ChatRequest {
                message: "I am alice".into(),
            })
            .await
            .unwrap();
        service
            .chat(ChatRequest {
                message: "I am bob".into(),
            })
            .await
            .unwrap();

        assert_eq!(service.store().len(), 1);
        let second_context = &agent.contexts()[1];
        assert_eq!(second_context[0].render_text(), "I am alice");
        assert_eq!(transcript(&service).await.len(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_requests_do_not_interleave() {
        let agent = Arc::new(ScriptedAgent::new(vec![
            Ok(vec![Message::assistant().with_text("a")]),
            Ok(vec![Message::assistant().with_text("b")]),
        ]));
        let service = Arc::new(service(agent));

        let first = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .chat(ChatRequest {
                        message: "1".into(),
                    })
                    .await
            })
        };
        let second = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .chat(ChatRequest {
                        message: "2".into(),
                    })
                    .await
            })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let turns = transcript(&service).await;
        assert_eq!(turns.len(), 4);
        // Each request's user turn is directly followed by its own answer
        assert!(matches!(turns[0], Turn::User(_)));
        assert!(matches!(turns[1], Turn::Agent(_)));
        assert!(matches!(turns[2], Turn::User(_)));
        assert!(matches!(turns[3], Turn::Agent(_)));
    }

    #[test]
    fn test_chunk_content() {
        assert_eq!(ChatChunk::Char('x').content(), "x");
        assert_eq!(ChatChunk::End.content(), "[STREAM_END]");
    }
}
