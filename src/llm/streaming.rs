//! Streaming types for model responses.
//!
//! A provider yields [`StreamDelta`] events; the turn pipeline forwards text
//! deltas to the client as they arrive and folds every delta into a
//! [`StreamAccumulator`] so the completed step can be persisted as whole
//! message parts.

use crate::llm::{ContentBlock, StopReason, Usage};
use futures::Stream;
use std::collections::BTreeMap;
use std::pin::Pin;

/// One event of a streamed model step.
///
/// Every content delta names the block it belongs to; blocks come back in
/// `block_index` order once the step is complete.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    TextDelta {
        delta: String,
        block_index: usize,
    },
    /// Opens a tool call. Its input follows as `ToolInputDelta`s.
    ToolUseStart {
        id: String,
        name: String,
        block_index: usize,
    },
    /// A fragment of the tool call's JSON input. Fragments are only
    /// parseable once concatenated.
    ToolInputDelta {
        id: String,
        delta: String,
        block_index: usize,
    },
    Usage(Usage),
    Done {
        stop_reason: Option<StopReason>,
    },
    /// A provider-side failure. `recoverable` errors may be retried if
    /// nothing reached the client yet.
    Error {
        message: String,
        recoverable: bool,
    },
}

pub type StreamBox<'a> = Pin<Box<dyn Stream<Item = anyhow::Result<StreamDelta>> + Send + 'a>>;

#[derive(Debug)]
enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

/// Folds the deltas of one step into content blocks.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    blocks: BTreeMap<usize, PartialBlock>,
    usage: Option<Usage>,
    stop_reason: Option<StopReason>,
}

impl StreamAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, delta: &StreamDelta) {
        match delta {
            StreamDelta::TextDelta { delta, block_index } => {
                if let PartialBlock::Text(text) = self
                    .blocks
                    .entry(*block_index)
                    .or_insert_with(|| PartialBlock::Text(String::new()))
                {
                    text.push_str(delta);
                }
            }
            StreamDelta::ToolUseStart {
                id,
                name,
                block_index,
            } => {
                self.blocks.insert(
                    *block_index,
                    PartialBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input_json: String::new(),
                    },
                );
            }
            StreamDelta::ToolInputDelta { id, delta, .. } => {
                let call = self.blocks.values_mut().find_map(|block| match block {
                    PartialBlock::ToolUse {
                        id: call_id,
                        input_json,
                        ..
                    } if *call_id == *id => Some(input_json),
                    _ => None,
                });
                if let Some(input_json) = call {
                    input_json.push_str(delta);
                }
            }
            StreamDelta::Usage(usage) => self.usage = Some(usage.clone()),
            StreamDelta::Done { stop_reason } => self.stop_reason = *stop_reason,
            StreamDelta::Error { .. } => {}
        }
    }

    #[must_use]
    pub const fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    #[must_use]
    pub const fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    /// Drop tool calls whose input may still be incomplete.
    ///
    /// Used when a step is aborted mid-stream: the text received so far is
    /// kept, partially streamed tool calls are not.
    pub fn discard_tool_uses(&mut self) {
        self.blocks
            .retain(|_, block| matches!(block, PartialBlock::Text(_)));
    }

    /// The step's blocks in stream order. Empty text blocks are skipped and
    /// tool input that is not valid JSON becomes `null`.
    #[must_use]
    pub fn into_content_blocks(self) -> Vec<ContentBlock> {
        self.blocks
            .into_values()
            .filter_map(|block| match block {
                PartialBlock::Text(text) if text.is_empty() => None,
                PartialBlock::Text(text) => Some(ContentBlock::Text { text }),
                PartialBlock::ToolUse {
                    id,
                    name,
                    input_json,
                } => Some(ContentBlock::ToolUse {
                    id,
                    name,
                    input: serde_json::from_str(&input_json).unwrap_or(serde_json::Value::Null),
                }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(delta: &str, block_index: usize) -> StreamDelta {
        StreamDelta::TextDelta {
            delta: delta.to_string(),
            block_index,
        }
    }

    fn tool_start(id: &str, name: &str, block_index: usize) -> StreamDelta {
        StreamDelta::ToolUseStart {
            id: id.to_string(),
            name: name.to_string(),
            block_index,
        }
    }

    fn tool_input(id: &str, delta: &str, block_index: usize) -> StreamDelta {
        StreamDelta::ToolInputDelta {
            id: id.to_string(),
            delta: delta.to_string(),
            block_index,
        }
    }

    #[test]
    fn step_with_text_and_two_tool_calls_keeps_block_order() {
        let mut acc = StreamAccumulator::new();
        for delta in [
            text("Checking ", 0),
            tool_start("call_w", "getWeatherInformation", 1),
            text("both.", 0),
            tool_start("call_t", "getLocalTime", 2),
            tool_input("call_w", r#"{"city":"#, 1),
            tool_input("call_t", r#"{"location":"Lima"}"#, 2),
            tool_input("call_w", r#""Lima"}"#, 1),
        ] {
            acc.apply(&delta);
        }

        let blocks = acc.into_content_blocks();
        assert_eq!(blocks.len(), 3);
        assert!(matches!(&blocks[0], ContentBlock::Text { text } if text == "Checking both."));
        assert!(matches!(
            &blocks[1],
            ContentBlock::ToolUse { id, input, .. } if id == "call_w" && *input == json!({"city": "Lima"})
        ));
        assert!(matches!(
            &blocks[2],
            ContentBlock::ToolUse { id, input, .. } if id == "call_t" && *input == json!({"location": "Lima"})
        ));
    }

    #[test]
    fn aborted_step_keeps_only_text() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&text("Checking the weather", 0));
        acc.apply(&tool_start("call_w", "getWeatherInformation", 1));
        acc.apply(&tool_input("call_w", r#"{"city":"#, 1));
        acc.discard_tool_uses();

        let blocks = acc.into_content_blocks();
        assert_eq!(blocks.len(), 1);
        assert!(matches!(&blocks[0], ContentBlock::Text { text } if text == "Checking the weather"));
    }

    #[test]
    fn truncated_tool_input_becomes_null() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&tool_start("call_1", "getLocalTime", 0));
        acc.apply(&tool_input("call_1", r#"{"location":"#, 0));

        let blocks = acc.into_content_blocks();
        assert!(matches!(&blocks[0], ContentBlock::ToolUse { input, .. } if input.is_null()));
    }

    #[test]
    fn usage_and_stop_reason_are_recorded() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&text("", 0));
        acc.apply(&StreamDelta::Usage(Usage {
            input_tokens: 12,
            output_tokens: 3,
        }));
        acc.apply(&StreamDelta::Done {
            stop_reason: Some(StopReason::EndTurn),
        });

        assert_eq!(acc.usage().map(|usage| usage.output_tokens), Some(3));
        assert_eq!(acc.stop_reason(), Some(&StopReason::EndTurn));
        assert!(acc.into_content_blocks().is_empty());
    }
}
