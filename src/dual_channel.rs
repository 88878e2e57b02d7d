//! C10 — DualChannelProcessor. Wires C8's per-result callback to C9 and the
//! process-wide query-result event bus, then drives one recognized
//! utterance through both channels (spec §4.10). Modeled on the teacher's
//! global `PreloadedTtsState` (a `tauri::State`-registered
//! `Mutex<Option<T>>`) generalized per spec §9's "explicit dependency
//! injection" design note into an `Arc`-constructed bus passed in rather
//! than a true global singleton.

use std::sync::Arc;

use crate::collaborators::QueryResultEventBus;
use crate::conversation_channel::{ConversationChannel, ConversationMode};
use crate::execution_channel::ExecutionChannel;
use crate::operation::MultiOperationResult;
use crate::result::ExecutionResult;

pub struct DualChannelProcessor {
    execution: Arc<ExecutionChannel>,
    conversation: Arc<ConversationChannel>,
    event_bus: Arc<QueryResultEventBus>,
}

impl DualChannelProcessor {
    /// Wires C8's result callback: every `ExecutionResult` is appended to
    /// C9, and any result carrying an `operationId` in its data additionally
    /// publishes on the event bus (spec §4.10).
    pub fn new(execution: Arc<ExecutionChannel>, conversation: Arc<ConversationChannel>, event_bus: Arc<QueryResultEventBus>) -> Arc<Self> {
        let processor = Arc::new(Self { execution, conversation, event_bus });

        let conversation_for_callback = processor.conversation.clone();
        let bus_for_callback = processor.event_bus.clone();
        processor.execution.on_result(move |result: ExecutionResult| {
            conversation_for_callback.add_result(result.clone());
            if let Some(operation_id) = result
                .data
                .as_ref()
                .and_then(|data| data.get("operationId"))
                .and_then(|v| v.as_str())
            {
                bus_for_callback.publish(operation_id, result);
            }
        });

        processor
    }

    /// Enqueues every operation from one recognized utterance, drains the
    /// execution channel, then hands any chat content to the conversation
    /// channel (spec §4.10). Returns the reply generated by C9.
    pub async fn process(&self, recognition: MultiOperationResult, mode: ConversationMode) -> String {
        for op in recognition.operations {
            self.execution.enqueue(op).await;
        }
        self.execution.flush().await;

        if let Some(chat) = recognition.chat_content {
            self.conversation.set_chat_content(chat);
        }

        self.conversation.generate_response(mode)
    }

    pub fn event_bus(&self) -> &Arc<QueryResultEventBus> {
        &self.event_bus
    }
}
