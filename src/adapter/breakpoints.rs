//! Breakpoint bookkeeping
//!
//! Source breakpoints are kept per file with replace-all semantics: every
//! `setBreakpoints` for a file removes what was installed there before and
//! installs the new set. Breakpoints requested before a debuggee exists are
//! kept as pending and installed when one is bound.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::{Debuggee, ExceptionFilter, InstalledBreakpoint, SourceLocation};
use crate::common::Result;

/// Installation state of one managed breakpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointStatus {
    /// No debuggee yet
    Pending,
    /// The backend accepted the request (possibly unverified)
    Installed(InstalledBreakpoint),
    /// The backend rejected the request
    Failed(String),
}

/// A source breakpoint as requested by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedBreakpoint {
    /// Adapter-assigned id, unique for the session
    pub id: i64,
    pub requested: SourceLocation,
    pub status: BreakpointStatus,
}

impl ManagedBreakpoint {
    pub fn verified(&self) -> bool {
        matches!(&self.status, BreakpointStatus::Installed(i) if i.verified)
    }

    /// Line the breakpoint is effectively at (0-based)
    pub fn line(&self) -> i64 {
        match &self.status {
            BreakpointStatus::Installed(i) => i.line.unwrap_or(self.requested.line),
            _ => self.requested.line,
        }
    }

    pub fn column(&self) -> Option<i64> {
        match &self.status {
            BreakpointStatus::Installed(i) => i.column.or(self.requested.column),
            _ => self.requested.column,
        }
    }

    pub fn message(&self) -> Option<String> {
        match &self.status {
            BreakpointStatus::Pending => Some("pending".to_string()),
            BreakpointStatus::Installed(i) => i.message.clone(),
            BreakpointStatus::Failed(reason) => Some(reason.clone()),
        }
    }
}

/// The set of exception filters currently enabled
#[derive(Debug, Default)]
pub struct ExceptionBreakpoints {
    enabled: BTreeSet<ExceptionFilter>,
}

impl ExceptionBreakpoints {
    pub fn enabled(&self) -> &BTreeSet<ExceptionFilter> {
        &self.enabled
    }

    /// Replace the enabled set, toggling only the filters that changed
    ///
    /// The recorded set follows the backend one filter at a time, so after
    /// a backend failure it still describes what is actually enabled.
    pub fn set_all(
        &mut self,
        filters: BTreeSet<ExceptionFilter>,
        target: Option<&dyn Debuggee>,
    ) -> Result<()> {
        let removed: Vec<ExceptionFilter> = self.enabled.difference(&filters).copied().collect();
        let added: Vec<ExceptionFilter> = filters.difference(&self.enabled).copied().collect();

        for filter in removed {
            if let Some(target) = target {
                target.set_exception_filter(filter, false)?;
            }
            self.enabled.remove(&filter);
        }
        for filter in added {
            if let Some(target) = target {
                target.set_exception_filter(filter, true)?;
            }
            self.enabled.insert(filter);
        }

        tracing::debug!(filters = ?self.enabled, "Exception filters updated");
        Ok(())
    }
}

/// Owns every breakpoint of the session
#[derive(Default)]
pub struct BreakpointManager {
    next_id: i64,
    by_source: HashMap<PathBuf, Vec<ManagedBreakpoint>>,
    exceptions: ExceptionBreakpoints,
    target: Option<Arc<dyn Debuggee>>,
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every breakpoint in `source` with `locations`
    ///
    /// Returns the new breakpoints in request order, each carrying what the
    /// backend reported for it.
    pub fn set_all_in(
        &mut self,
        source: &Path,
        locations: Vec<SourceLocation>,
    ) -> Result<Vec<ManagedBreakpoint>> {
        if let Some(target) = &self.target {
            target.clear_breakpoints(source)?;
        }

        let mut breakpoints = Vec::with_capacity(locations.len());
        for location in locations {
            self.next_id += 1;
            let status = match &self.target {
                Some(target) => install(target.as_ref(), &location),
                None => BreakpointStatus::Pending,
            };
            breakpoints.push(ManagedBreakpoint {
                id: self.next_id,
                requested: location,
                status,
            });
        }

        tracing::debug!(
            source = %source.display(),
            count = breakpoints.len(),
            "Breakpoints replaced"
        );

        if breakpoints.is_empty() {
            self.by_source.remove(source);
        } else {
            self.by_source.insert(source.to_path_buf(), breakpoints.clone());
        }
        Ok(breakpoints)
    }

    pub fn set_exception_filters(&mut self, filters: BTreeSet<ExceptionFilter>) -> Result<()> {
        let target = self.target.clone();
        self.exceptions.set_all(filters, target.as_deref())
    }

    /// Move breakpoints recorded under relative paths beneath `root`
    ///
    /// Only applies while unbound. When a relative and an absolute spelling
    /// of the same source both hold a set, the more recently requested set
    /// wins.
    pub fn rebase(&mut self, root: &Path) {
        if self.target.is_some() {
            return;
        }

        let relative: Vec<PathBuf> = self
            .by_source
            .keys()
            .filter(|path| path.is_relative())
            .cloned()
            .collect();

        for path in relative {
            let Some(mut breakpoints) = self.by_source.remove(&path) else {
                continue;
            };
            let source = root.join(&path);
            for bp in &mut breakpoints {
                bp.requested.path = source.clone();
            }

            let newest = |set: &[ManagedBreakpoint]| set.iter().map(|bp| bp.id).max();
            let keep_moved = match self.by_source.get(&source) {
                Some(existing) => newest(existing.as_slice()) < newest(breakpoints.as_slice()),
                None => true,
            };
            if keep_moved {
                tracing::debug!(from = %path.display(), to = %source.display(), "Breakpoints rebased");
                self.by_source.insert(source, breakpoints);
            }
        }
    }

    /// Attach a debuggee and install everything requested so far
    ///
    /// Returns the breakpoints whose status changed, for `breakpoint` events.
    pub fn bind(&mut self, target: Arc<dyn Debuggee>) -> Result<Vec<ManagedBreakpoint>> {
        // Filters first so a failure leaves every breakpoint pending
        for filter in self.exceptions.enabled().iter().copied() {
            target.set_exception_filter(filter, true)?;
        }

        let mut changed = Vec::new();
        for breakpoints in self.by_source.values_mut() {
            for bp in breakpoints.iter_mut() {
                if bp.status == BreakpointStatus::Pending {
                    bp.status = install(target.as_ref(), &bp.requested);
                    changed.push(bp.clone());
                }
            }
        }
        changed.sort_by_key(|bp| bp.id);

        self.target = Some(target);
        Ok(changed)
    }

    /// Undo [`BreakpointManager::bind`] for a debuggee that never came up
    ///
    /// Whatever was installed on `target` is cleared and every breakpoint
    /// goes back to pending, ready for the next debuggee.
    pub fn rollback(&mut self, target: &dyn Debuggee) {
        self.target = None;
        for (source, breakpoints) in self.by_source.iter_mut() {
            if let Err(e) = target.clear_breakpoints(source) {
                tracing::debug!(source = %source.display(), error = %e, "Could not clear breakpoints");
            }
            for bp in breakpoints.iter_mut() {
                bp.status = BreakpointStatus::Pending;
            }
        }
    }

    /// Forget the debuggee; breakpoints stay recorded
    pub fn unbind(&mut self) {
        self.target = None;
    }
}

fn install(target: &dyn Debuggee, location: &SourceLocation) -> BreakpointStatus {
    match target.install_breakpoint(location) {
        Ok(installed) => BreakpointStatus::Installed(installed),
        Err(e) => {
            tracing::warn!(
                source = %location.path.display(),
                line = location.line,
                error = %e,
                "Backend rejected breakpoint"
            );
            BreakpointStatus::Failed(e.to_string())
        }
    }
}
