//! Progress reporting.
//!
//! Sinks are best-effort observers: a panicking sink is caught and logged,
//! never allowed to abort the analysis.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use crate::checkpoint::AnalysisPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Totals reported with the terminal `Completed` event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub files_scanned: usize,
    pub nodes_created: usize,
    pub relationships_created: usize,
}

/// Typed progress events, in the order a run emits them
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    PhaseChanged {
        phase: AnalysisPhase,
    },
    Progress {
        phase: AnalysisPhase,
        percent: u8,
        current: usize,
        total: usize,
    },
    Log {
        level: LogLevel,
        phase: AnalysisPhase,
        message: String,
    },
    Completed {
        success: bool,
        stats: RunTotals,
    },
}

/// Observer supplied by the caller
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Wraps an optional sink and isolates its failures
#[derive(Clone, Default)]
pub struct ProgressReporter {
    sink: Option<Arc<dyn ProgressSink>>,
}

impl ProgressReporter {
    pub fn new(sink: Option<Arc<dyn ProgressSink>>) -> Self {
        Self { sink }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sink) = &self.sink {
            let result = catch_unwind(AssertUnwindSafe(|| sink.on_event(event)));
            if result.is_err() {
                warn!("progress sink panicked; event dropped");
            }
        }
    }

    pub fn phase(&self, phase: AnalysisPhase) {
        self.emit(ProgressEvent::PhaseChanged { phase });
    }

    pub fn progress(&self, phase: AnalysisPhase, current: usize, total: usize) {
        let percent = if total == 0 {
            100
        } else {
            ((current * 100) / total).min(100) as u8
        };
        self.emit(ProgressEvent::Progress {
            phase,
            percent,
            current,
            total,
        });
    }

    pub fn log(&self, level: LogLevel, phase: AnalysisPhase, message: impl Into<String>) {
        self.emit(ProgressEvent::Log {
            level,
            phase,
            message: message.into(),
        });
    }

    pub fn completed(&self, success: bool, stats: RunTotals) {
        self.emit(ProgressEvent::Completed { success, stats });
    }
}
