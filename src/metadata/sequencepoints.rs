//! Optional symbol information mapping instruction addresses to source lines.
//!
//! Used only to decorate interpreted stack traces; execution never depends on it.

use std::collections::HashMap;

use crate::metadata::token::Token;

/// A single mapping from an instruction address to a source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencePoint {
    /// Instruction index inside the method body
    pub offset: u32,
    /// One based source line
    pub line: u32,
}

/// Sequence points of every method of a module.
#[derive(Debug, Clone, Default)]
pub struct SequencePoints {
    /// Source document the lines refer to
    pub document: String,
    points: HashMap<Token, Vec<SequencePoint>>,
}

impl SequencePoints {
    /// Creates an empty table for `document`
    pub fn new(document: impl Into<String>) -> Self {
        SequencePoints {
            document: document.into(),
            points: HashMap::new(),
        }
    }

    /// Records that the instructions of `method` starting at `offset` belong to `line`
    pub fn add(&mut self, method: Token, offset: u32, line: u32) {
        let points = self.points.entry(method).or_default();
        let at = points.partition_point(|p| p.offset <= offset);
        points.insert(at, SequencePoint { offset, line });
    }

    /// The source line of the instruction at `offset` in `method`
    #[must_use]
    pub fn line_for(&self, method: Token, offset: u32) -> Option<u32> {
        let points = self.points.get(&method)?;
        let at = points.partition_point(|p| p.offset <= offset);
        at.checked_sub(1).map(|i| points[i].line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_preceding_point_wins() {
        let method = Token(0x06000001);
        let mut points = SequencePoints::new("Program.cs");
        points.add(method, 4, 12);
        points.add(method, 0, 10);
        points.add(method, 9, 15);

        assert_eq!(points.line_for(method, 0), Some(10));
        assert_eq!(points.line_for(method, 3), Some(10));
        assert_eq!(points.line_for(method, 4), Some(12));
        assert_eq!(points.line_for(method, 20), Some(15));
        assert_eq!(points.line_for(Token(0x06000002), 0), None);
    }
}
