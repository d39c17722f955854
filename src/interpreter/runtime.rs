// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::ExprRef;
use crate::*;

use bitflags::bitflags;
use parking_lot::Mutex;

bitflags! {
    /// Flags carried by an execution frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ExecutionFlags: u32 {
        const ROOT = 1 << 0;
        /// The node is being run to expand it into its parent's arguments.
        const EXPAND = 1 << 1;
        /// The tree walk runs on a background worker.
        const THREADED_EVALUATION = 1 << 2;
        /// Null placeholders are handed to the caller even when threaded.
        const PASS_NULL = 1 << 3;

        /// Flags a child frame inherits from its parent.
        const TRANSFERABLE = Self::THREADED_EVALUATION.bits();
    }
}

/// One activation record of the execution stack.
#[derive(Debug, Clone)]
pub struct ExecutionFrame {
    pub id: u64,
    pub expression: Option<ExprRef>,
    pub args: Rc<[ExprRef]>,
    pub flags: ExecutionFlags,
}

impl ExecutionFrame {
    /// Text of the frame's expression, `<root>` for the root frame.
    pub fn describe(&self) -> String {
        match &self.expression {
            Some(e) => e.text().to_string(),
            None => "<root>".to_string(),
        }
    }
}

/// Stack of frames of one evaluation.
///
/// Lazy sequences interleave, so a frame is popped by id rather than by
/// position.
#[derive(Debug)]
pub struct Runtime {
    frames: Vec<ExecutionFrame>,
    next_id: u64,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(ExecutionFlags::empty())
    }
}

impl Runtime {
    pub fn new(flags: ExecutionFlags) -> Self {
        Self {
            frames: vec![ExecutionFrame {
                id: 0,
                expression: None,
                args: Rc::from(Vec::new()),
                flags: flags | ExecutionFlags::ROOT,
            }],
            next_id: 1,
        }
    }

    pub fn push(
        &mut self,
        expression: ExprRef,
        args: Rc<[ExprRef]>,
        flags: ExecutionFlags,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        log::trace!("push frame {id}: {}", expression.text());
        self.frames.push(ExecutionFrame {
            id,
            expression: Some(expression),
            args,
            flags,
        });
        id
    }

    /// Removes the frame `id`. The root frame is never removed.
    pub fn pop(&mut self, id: u64) -> Option<ExecutionFrame> {
        if id == 0 {
            return None;
        }
        let idx = self.frames.iter().rposition(|f| f.id == id)?;
        log::trace!("pop frame {id}");
        Some(self.frames.remove(idx))
    }

    pub fn current(&self) -> Option<&ExecutionFrame> {
        self.frames.last()
    }

    pub fn root(&self) -> Option<&ExecutionFrame> {
        self.frames.first()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[ExecutionFrame] {
        &self.frames
    }
}

/// Pops its frame when dropped, whether or not the sequence ran to the end.
pub struct FrameGuard {
    runtime: Rc<Mutex<Runtime>>,
    id: u64,
}

impl FrameGuard {
    pub fn push(
        runtime: &Rc<Mutex<Runtime>>,
        expression: ExprRef,
        args: Rc<[ExprRef]>,
        flags: ExecutionFlags,
    ) -> Self {
        let id = runtime.lock().push(expression, args, flags);
        Self {
            runtime: runtime.clone(),
            id,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.runtime.lock().pop(self.id);
    }
}
