//! Nested (child) I/O statements.
//!
//! Defined-I/O procedures and internal-file formatting run a child statement
//! against the same unit while the parent statement is still active. Children
//! form a stack owned by the unit; each push moves the previous top into the
//! new node.

use crate::connection::Direction;
use crate::errors::{Error, Result};

/// What the engine needs to know about the parent statement driving a child.
#[derive(Debug, Clone, Copy)]
pub struct ParentIo {
    pub unformatted: bool,
    pub direction: Direction,
}

pub struct ChildIo {
    parent: ParentIo,
    pub(crate) depth: usize,
    pub(crate) previous: Option<Box<ChildIo>>,
}

impl ChildIo {
    pub(crate) fn new(parent: ParentIo, depth: usize, previous: Option<Box<ChildIo>>) -> Self {
        Self {
            parent,
            depth,
            previous,
        }
    }

    pub fn parent(&self) -> &ParentIo {
        &self.parent
    }

    /// A child transfer must agree with its parent on both formatting and
    /// direction.
    pub fn check_formatting_and_direction(
        &self,
        unformatted: bool,
        direction: Direction,
    ) -> Result<()> {
        if unformatted != self.parent.unformatted {
            if unformatted {
                Err(Error::UnformattedChildOnFormattedParent)
            } else {
                Err(Error::FormattedChildOnUnformattedParent)
            }
        } else if (self.parent.direction == Direction::Input) != (direction == Direction::Input) {
            if self.parent.direction == Direction::Input {
                Err(Error::ChildOutputToInputParent)
            } else {
                Err(Error::ChildInputFromOutputParent)
            }
        } else {
            Ok(())
        }
    }
}
