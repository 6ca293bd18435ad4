//! Instruction sinks
//!
//! The comparator writes into an [`InstructionSink`]. A [`BufferedSink`]
//! holds output for a subtree that may still be replaced by a full update;
//! it is either replayed into its parent sink or discarded.

use crate::instruction::Instruction;

/// Receives instructions in emission order
pub trait InstructionSink {
    /// Append one instruction
    fn emit(&mut self, instruction: Instruction);
}

impl InstructionSink for Vec<Instruction> {
    fn emit(&mut self, instruction: Instruction) {
        self.push(instruction);
    }
}

/// Speculative output for one subtree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferedSink {
    instructions: Vec<Instruction>,
    attributes: usize,
}

impl BufferedSink {
    /// Create empty buffer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire attributes accumulated so far
    #[inline]
    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.attributes
    }

    /// Buffered instructions
    #[inline]
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Whether nothing was buffered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Forward every buffered instruction to `sink`, in order
    pub fn replay_into(self, sink: &mut dyn InstructionSink) {
        for instruction in self.instructions {
            sink.emit(instruction);
        }
    }
}

impl InstructionSink for BufferedSink {
    fn emit(&mut self, instruction: Instruction) {
        self.attributes += instruction.attribute_count();
        self.instructions.push(instruction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delete(count: usize) -> Instruction {
        Instruction::DeleteTemplate {
            repeat_id: "r1".to_string(),
            parent_indexes: String::new(),
            count,
        }
    }

    #[test]
    fn buffer_counts_attributes() {
        let mut buffer = BufferedSink::new();
        assert!(buffer.is_empty());
        buffer.emit(delete(1));
        buffer.emit(delete(2));
        assert_eq!(buffer.attribute_count(), 6);
        assert_eq!(buffer.instructions().len(), 2);
    }

    #[test]
    fn replay_preserves_order() {
        let mut buffer = BufferedSink::new();
        buffer.emit(delete(1));
        buffer.emit(delete(2));

        let mut out: Vec<Instruction> = vec![delete(0)];
        buffer.replay_into(&mut out);
        assert_eq!(out, vec![delete(0), delete(1), delete(2)]);
    }
}
