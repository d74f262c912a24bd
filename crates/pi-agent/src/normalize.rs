//! Cross-provider message normalisation (spec.md §4.A), supplemented from
//! `original_source/`: a pure function run before every request so
//! reasoning caches and response-item chains stay valid on same-provider
//! replay, while crossing providers strips signatures and rewrites
//! `Thinking` blocks to `<thinking>...</thinking>` text.

use crate::transcript::Message;
use pi_llm::{Api, AssistantMessage, ContentBlock, Provider};

/// Rewrite `messages` for a request that will target `target_provider`/
/// `target_api`. Non-assistant messages pass through untouched; assistant
/// messages whose own `provider`/`api` differ from the target are rewritten
/// block-by-block via [`ContentBlock::for_cross_provider`].
pub fn normalize_for_provider(
    messages: &[Message],
    target_provider: Provider,
    target_api: Api,
) -> Vec<Message> {
    messages
        .iter()
        .map(|message| match message {
            Message::AssistantMessage(assistant) => {
                Message::AssistantMessage(normalize_assistant_message(
                    assistant,
                    target_provider,
                    target_api,
                ))
            }
            other => other.clone(),
        })
        .collect()
}

fn normalize_assistant_message(
    message: &AssistantMessage,
    target_provider: Provider,
    target_api: Api,
) -> AssistantMessage {
    let same_provider = message.provider == target_provider && message.api == target_api;
    if same_provider {
        return message.clone();
    }
    let mut rewritten = message.clone();
    rewritten.content = rewritten
        .content
        .iter()
        .map(ContentBlock::for_cross_provider)
        .collect();
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use pi_llm::{StopReason, Usage};

    fn assistant(provider: Provider, api: Api, content: Vec<ContentBlock>) -> Message {
        Message::AssistantMessage(AssistantMessage {
            content,
            provider,
            api,
            model: "m".into(),
            usage: Usage::default(),
            stop_reason: StopReason::Stop,
            error: None,
        })
    }

    #[test]
    fn same_provider_passes_through_with_signatures() {
        let messages = vec![assistant(
            Provider::Anthropic,
            Api::Anthropic,
            vec![ContentBlock::Text {
                text: "hi".into(),
                signature: Some("sig-1".into()),
            }],
        )];
        let normalized = normalize_for_provider(&messages, Provider::Anthropic, Api::Anthropic);
        match &normalized[0] {
            Message::AssistantMessage(m) => match &m.content[0] {
                ContentBlock::Text { signature, .. } => {
                    assert_eq!(signature.as_deref(), Some("sig-1"))
                }
                _ => panic!("expected text block"),
            },
            _ => panic!("expected assistant message"),
        }
    }

    #[test]
    fn cross_provider_strips_signature_and_rewrites_thinking() {
        let messages = vec![assistant(
            Provider::Anthropic,
            Api::Anthropic,
            vec![
                ContentBlock::Thinking {
                    thinking: "because X".into(),
                    signature: Some("sig-1".into()),
                },
                ContentBlock::Text {
                    text: "answer".into(),
                    signature: Some("sig-2".into()),
                },
            ],
        )];
        let normalized = normalize_for_provider(&messages, Provider::OpenAi, Api::Responses);
        match &normalized[0] {
            Message::AssistantMessage(m) => {
                assert_eq!(
                    m.content[0],
                    ContentBlock::Text {
                        text: "<thinking>\nbecause X\n</thinking>".into(),
                        signature: None,
                    }
                );
                assert_eq!(
                    m.content[1],
                    ContentBlock::Text {
                        text: "answer".into(),
                        signature: None,
                    }
                );
            }
            _ => panic!("expected assistant message"),
        }
    }

    #[test]
    fn round_trip_back_to_original_provider_is_not_lossless_for_thinking() {
        // P4: X -> Y -> X is semantically equal except thinking blocks that
        // transited a different provider become Text, one-way.
        let messages = vec![assistant(
            Provider::Anthropic,
            Api::Anthropic,
            vec![ContentBlock::Thinking {
                thinking: "reasoning".into(),
                signature: Some("sig".into()),
            }],
        )];
        let via_openai = normalize_for_provider(&messages, Provider::OpenAi, Api::Responses);
        let back_to_anthropic =
            normalize_for_provider(&via_openai, Provider::Anthropic, Api::Anthropic);
        match &back_to_anthropic[0] {
            Message::AssistantMessage(m) => {
                assert_eq!(
                    m.content[0],
                    ContentBlock::Text {
                        text: "<thinking>\nreasoning\n</thinking>".into(),
                        signature: None,
                    }
                );
            }
            _ => panic!("expected assistant message"),
        }
    }
}
