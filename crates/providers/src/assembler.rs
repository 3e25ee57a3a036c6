//! Tool-call assembly from streamed fragments.

use std::collections::BTreeMap;

use ferrocode_core::tool::ToolCall;

use crate::wire::DeltaEvent;

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates [`DeltaEvent::ToolCallDelta`] fragments per slot.
///
/// Argument fragments are concatenated in arrival order. An id or name, once
/// set, is never replaced by a later empty value; backends commonly repeat
/// the field blank on continuation frames.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    slots: BTreeMap<u32, PartialCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Anything other than a tool-call delta is ignored.
    pub fn accumulate(&mut self, event: &DeltaEvent) {
        let DeltaEvent::ToolCallDelta {
            slot_index,
            id,
            name,
            args_fragment,
        } = event
        else {
            return;
        };

        let slot = self.slots.entry(*slot_index).or_default();
        if let Some(id) = id.as_deref().filter(|s| !s.is_empty()) {
            slot.id = id.to_string();
        }
        if let Some(name) = name.as_deref().filter(|s| !s.is_empty()) {
            slot.name = name.to_string();
        }
        if let Some(fragment) = args_fragment {
            slot.arguments.push_str(fragment);
        }
    }

    /// Whether any tool-call fragment has been seen.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Seal every slot into a [`ToolCall`], in slot order.
    ///
    /// A slot that never received an id gets `tool_call_{slot}`, which is
    /// echoed back in both the assistant message and the tool result.
    pub fn sealed(self) -> Vec<ToolCall> {
        self.slots
            .into_iter()
            .map(|(slot, partial)| {
                let id = if partial.id.is_empty() {
                    format!("tool_call_{slot}")
                } else {
                    partial.id
                };
                let call = ToolCall::new(id, partial.name, partial.arguments, slot);
                if !call.is_valid() {
                    tracing::debug!(
                        slot,
                        tool = %call.name,
                        error = call.parse_error().unwrap_or_default(),
                        "Sealed tool call has unparseable arguments"
                    );
                }
                call
            })
            .collect()
    }
}
