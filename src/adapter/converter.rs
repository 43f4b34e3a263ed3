//! Translation between protocol and backend representations
//!
//! The converter owns the coordinate conventions negotiated in `initialize`
//! and the frame and variable pools, so every handle the client sees is
//! minted here and every handle it sends back is resolved here.

use std::path::Path;
use std::sync::Arc;

use crate::backend::{
    CompletionCandidate, DebuggeeThread, ExceptionFilter, ExceptionRecord, SourceLocation,
    StackFrame, VariableNode,
};
use crate::common::{Error, HandleKind, Result};
use crate::dap;

use super::breakpoints::ManagedBreakpoint;
use super::pool::ObjectPool;

/// Converts a line or column between the client's base and 0-based values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinateConverter {
    external_offset: i64,
}

impl CoordinateConverter {
    pub fn new(starts_at_one: bool) -> Self {
        Self {
            external_offset: i64::from(starts_at_one),
        }
    }

    pub fn to_internal(self, external: i64) -> i64 {
        external - self.external_offset
    }

    pub fn to_external(self, internal: i64) -> i64 {
        internal + self.external_offset
    }
}

impl Default for CoordinateConverter {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Protocol <-> backend translation plus the frame and variable pools
#[derive(Default)]
pub struct Converter {
    pub lines: CoordinateConverter,
    pub columns: CoordinateConverter,
    frames: ObjectPool<i64, Arc<dyn StackFrame>>,
    variables: ObjectPool<(), Arc<dyn VariableNode>>,
}

impl Converter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the conventions the client announced in `initialize`
    pub fn configure(&mut self, lines_start_at1: bool, columns_start_at1: bool) {
        self.lines = CoordinateConverter::new(lines_start_at1);
        self.columns = CoordinateConverter::new(columns_start_at1);
    }

    // === Breakpoints ===

    pub fn to_internal_location(
        &self,
        path: &Path,
        line: i64,
        column: Option<i64>,
    ) -> SourceLocation {
        SourceLocation {
            path: path.to_path_buf(),
            line: self.lines.to_internal(line),
            column: column.map(|c| self.columns.to_internal(c)),
        }
    }

    pub fn to_dap_breakpoint(&self, bp: &ManagedBreakpoint) -> dap::Breakpoint {
        dap::Breakpoint {
            id: Some(bp.id),
            verified: bp.verified(),
            message: bp.message(),
            source: Some(self.to_dap_source(&bp.requested.path)),
            line: Some(self.lines.to_external(bp.line())),
            column: bp.column().map(|c| self.columns.to_external(c)),
        }
    }

    pub fn to_dap_source(&self, path: &Path) -> dap::Source {
        dap::Source {
            name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
            path: Some(path.to_string_lossy().into_owned()),
            source_reference: None,
        }
    }

    pub fn to_dap_exception_filter(filter: ExceptionFilter) -> dap::ExceptionBreakpointsFilter {
        dap::ExceptionBreakpointsFilter {
            filter: filter.id().to_string(),
            label: filter.label().to_string(),
            default: false,
        }
    }

    pub fn to_internal_exception_filter(id: &str) -> Result<ExceptionFilter> {
        ExceptionFilter::from_id(id)
            .ok_or_else(|| Error::invalid_argument("filters", format!("unknown filter '{id}'")))
    }

    // === Threads and frames ===

    pub fn to_dap_thread(&self, thread: &dyn DebuggeeThread) -> dap::Thread {
        dap::Thread {
            id: thread.id(),
            name: thread.name(),
        }
    }

    /// Mint a frame handle owned by `thread_id`
    pub fn to_dap_stack_frame(&mut self, thread_id: i64, frame: Arc<dyn StackFrame>) -> dap::StackFrame {
        let name = frame.name();
        let position = frame.position();
        let id = self.frames.store(thread_id, frame);

        match position {
            Some(position) => dap::StackFrame {
                id,
                name,
                source: Some(self.to_dap_source(&position.source)),
                line: self.lines.to_external(position.line),
                column: self.columns.to_external(position.column.unwrap_or(0)),
            },
            None => dap::StackFrame {
                id,
                name,
                source: None,
                line: 0,
                column: 0,
            },
        }
    }

    pub fn to_internal_stack_frame(&self, frame_id: i64) -> Result<Arc<dyn StackFrame>> {
        self.frames
            .get_by_id(frame_id)
            .cloned()
            .ok_or_else(|| Error::unknown_handle(HandleKind::Frame, frame_id))
    }

    // === Variables ===

    /// Store a variable subtree, returning 0 for leaves
    pub fn store_variable_tree(&mut self, node: Arc<dyn VariableNode>) -> i64 {
        if node.has_children() {
            self.variables.store((), node)
        } else {
            0
        }
    }

    pub fn to_variable_tree(&self, reference: i64) -> Result<Arc<dyn VariableNode>> {
        self.variables
            .get_by_id(reference)
            .cloned()
            .ok_or_else(|| Error::unknown_handle(HandleKind::Variables, reference))
    }

    /// Scopes always get a handle so the client can expand them, even when empty
    pub fn to_dap_scope(&mut self, node: Arc<dyn VariableNode>) -> dap::Scope {
        let name = node.name();
        dap::Scope {
            name,
            variables_reference: self.variables.store((), node),
            expensive: false,
        }
    }

    pub fn to_dap_variable(&mut self, node: Arc<dyn VariableNode>) -> dap::Variable {
        let name = node.name();
        let value = node.value().unwrap_or_default();
        let type_name = node.type_name();
        dap::Variable {
            name,
            value,
            type_name,
            variables_reference: self.store_variable_tree(node),
        }
    }

    pub fn to_dap_completion(candidate: CompletionCandidate) -> dap::CompletionItem {
        dap::CompletionItem {
            label: candidate.label,
            text: candidate.text,
            item_type: candidate.kind,
        }
    }

    // === Exceptions ===

    pub fn to_dap_exception_details(exception: &ExceptionRecord) -> dap::ExceptionDetails {
        dap::ExceptionDetails {
            message: exception.message.clone(),
            type_name: exception.type_name.clone(),
            full_type_name: exception.full_type_name.clone(),
            stack_trace: exception.stack_trace.clone(),
            inner_exception: exception
                .cause
                .iter()
                .map(|cause| Self::to_dap_exception_details(cause))
                .collect(),
        }
    }

    // === Eviction ===

    /// Invalidate everything minted for a thread that is about to run
    ///
    /// Variable handles are not tagged by thread and are dropped wholesale.
    pub fn evict_thread(&mut self, thread_id: i64) {
        let frames = self.frames.remove_all_owned_by(&thread_id);
        let variables = self.variables.len();
        self.variables.clear();
        tracing::trace!(thread_id, frames, variables, "Evicted handles");
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.variables.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock::{MockFrame, MockVariable};
    use std::path::PathBuf;

    #[test]
    fn test_line_conversion_round_trips_for_both_bases() {
        for starts_at_one in [true, false] {
            let lines = CoordinateConverter::new(starts_at_one);
            for line in [0, 1, 41] {
                assert_eq!(lines.to_external(lines.to_internal(line)), line);
            }
        }
        assert_eq!(CoordinateConverter::new(true).to_internal(10), 9);
        assert_eq!(CoordinateConverter::new(false).to_internal(10), 10);
    }

    #[test]
    fn test_breakpoint_location_uses_negotiated_base() {
        let mut converter = Converter::new();
        converter.configure(true, false);

        let location = converter.to_internal_location(Path::new("/a/B.java"), 10, Some(4));
        assert_eq!(location.line, 9);
        assert_eq!(location.column, Some(4));
    }

    #[test]
    fn test_stack_frame_handles_are_owned_by_thread() {
        let mut converter = Converter::new();
        let frame = Arc::new(MockFrame::new("main").at("/a/Main.java", 4));

        let dap_frame = converter.to_dap_stack_frame(1, frame);
        assert_eq!(dap_frame.line, 5);
        assert_eq!(dap_frame.source.unwrap().name.as_deref(), Some("Main.java"));
        assert!(converter.to_internal_stack_frame(dap_frame.id).is_ok());

        converter.evict_thread(2);
        assert!(converter.to_internal_stack_frame(dap_frame.id).is_ok());

        converter.evict_thread(1);
        let err = converter.to_internal_stack_frame(dap_frame.id).err().unwrap();
        assert!(matches!(err, Error::UnknownHandle { kind: HandleKind::Frame, .. }));
    }

    #[test]
    fn test_leaf_variables_get_no_handle() {
        let mut converter = Converter::new();
        let leaf = MockVariable::leaf("count", "3", "int");
        let object = MockVariable::structured("list", "ArrayList", vec![MockVariable::leaf("size", "0", "int")]);

        assert_eq!(converter.to_dap_variable(leaf).variables_reference, 0);
        let reference = converter.to_dap_variable(object).variables_reference;
        assert!(reference > 0);
        assert_eq!(converter.to_variable_tree(reference).unwrap().name(), "list");
    }

    #[test]
    fn test_scopes_are_always_expandable() {
        let mut converter = Converter::new();
        let scope = converter.to_dap_scope(MockVariable::structured("Locals", "", Vec::new()));
        assert!(scope.variables_reference > 0);
    }

    #[test]
    fn test_exception_details_nest_causes() {
        let mut outer = ExceptionRecord::new("java.lang.RuntimeException: wrapped");
        outer.type_name = Some("RuntimeException".to_string());
        let mut inner = ExceptionRecord::new("java.io.IOException: disk");
        inner.message = Some("disk".to_string());
        outer.cause = Some(Box::new(inner));

        let details = Converter::to_dap_exception_details(&outer);
        assert_eq!(details.type_name.as_deref(), Some("RuntimeException"));
        assert_eq!(details.inner_exception.len(), 1);
        assert_eq!(details.inner_exception[0].message.as_deref(), Some("disk"));
    }

    #[test]
    fn test_unknown_exception_filter_is_rejected() {
        assert_eq!(Converter::to_internal_exception_filter("U").unwrap(), ExceptionFilter::Uncaught);
        assert!(Converter::to_internal_exception_filter("X").is_err());
    }

    #[test]
    fn test_pending_breakpoint_conversion() {
        let converter = Converter::new();
        let bp = ManagedBreakpoint {
            id: 1,
            requested: SourceLocation {
                path: PathBuf::from("/a/B.java"),
                line: 9,
                column: None,
            },
            status: super::super::breakpoints::BreakpointStatus::Pending,
        };

        let dap_bp = converter.to_dap_breakpoint(&bp);
        assert!(!dap_bp.verified);
        assert_eq!(dap_bp.line, Some(10));
        assert_eq!(dap_bp.message.as_deref(), Some("pending"));
    }
}
