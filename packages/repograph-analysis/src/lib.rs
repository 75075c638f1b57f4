//! Analysis pipeline for repograph.
//!
//! Ingests a source repository and produces a labeled property graph:
//! scan -> build inspection -> incremental classification -> parse (pass 1)
//! -> resolve (pass 2) -> batched storage, with crash-safe checkpoints
//! persisted into the graph store and per-repository incremental state.
//!
//! Language parsers are pluggable collaborators behind
//! [`parser::LanguageParser`]; everything else in the pipeline is
//! language-agnostic.

pub mod analytics;
pub mod build;
pub mod checkpoint;
pub mod error;
pub mod incremental;
pub mod orchestrator;
pub mod parser;
pub mod progress;
pub mod resolver;
pub mod scanner;
pub mod synthesis;

pub use build::{
    BuildFileResult, BuildSystemInspector, BuildSystemKind, ExternalDependency, ModuleInfo,
    ModuleKind, ProjectDependency, ProjectStructure,
};
pub use checkpoint::{
    AnalysisPhase, Checkpoint, CheckpointManager, CheckpointSeed, CheckpointStatus,
};
pub use error::{AnalyzerError, Result};
pub use incremental::{IncrementalIndexManager, IncrementalResult, IndexState, IndexedFile};
pub use orchestrator::{AnalysisReport, AnalyzeOptions, AnalyzerConfig, AnalyzerOrchestrator};
pub use parser::{
    LanguageParser, ParseCollector, ParseFailure, ParseOutput, ParseStats, ParserConfig,
    ParserRegistry, SingleFileParseResult,
};
pub use progress::{LogLevel, ProgressEvent, ProgressReporter, ProgressSink, RunTotals};
pub use resolver::{NodeIndex, RelationshipResolver, ResolutionStats};
pub use scanner::{enrich_with_modules, FileScanner, ScannerConfig};
pub use synthesis::{synthesize, StructuralGraph};
