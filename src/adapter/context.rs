//! Session-scoped debugging policy

use std::path::{Path, PathBuf};

use super::breakpoints::BreakpointManager;

/// State that outlives any single request but belongs to one session
#[derive(Default)]
pub struct DebugContext {
    pub breakpoints: BreakpointManager,
    /// Root of the project being debugged, known once launch or attach arrives
    project_root: Option<PathBuf>,
}

impl DebugContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the project root and move breakpoints set under relative paths onto it
    pub fn set_project_root(&mut self, root: PathBuf) {
        self.breakpoints.rebase(&root);
        self.project_root = Some(root);
    }

    /// Resolve a client-supplied source path against the project root
    pub fn resolve_source(&self, path: &Path) -> PathBuf {
        match &self.project_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SourceLocation;

    #[test]
    fn test_relative_sources_resolve_against_root() {
        let mut context = DebugContext::new();
        assert_eq!(context.resolve_source(Path::new("src/A.java")), PathBuf::from("src/A.java"));

        context.set_project_root(PathBuf::from("/work/app"));
        assert_eq!(
            context.resolve_source(Path::new("src/A.java")),
            PathBuf::from("/work/app/src/A.java")
        );
        assert_eq!(context.resolve_source(Path::new("/abs/B.java")), PathBuf::from("/abs/B.java"));
    }

    #[test]
    fn test_setting_root_rekeys_relative_breakpoints() {
        let mut context = DebugContext::new();
        let relative = Path::new("src/A.java");
        let location = SourceLocation {
            path: relative.to_path_buf(),
            line: 4,
            column: None,
        };
        context.breakpoints.set_all_in(relative, vec![location]).unwrap();

        context.set_project_root(PathBuf::from("/work/app"));

        let absolute = context.resolve_source(relative);
        assert!(context.breakpoints.breakpoints_in(relative).is_empty());
        let moved = context.breakpoints.breakpoints_in(&absolute);
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].requested.path, absolute);
    }
}
