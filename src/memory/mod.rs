pub mod cluster;
pub mod engine;
pub mod facts;
pub mod types;

pub use engine::{
    ConsolidationReport, ExportFormat, MemoryCounters, MemoryEngine, MemoryEngineStats, NewMemory,
};
pub use types::{Importance, MemoryCluster, MemoryContext, MemoryRecord, MemoryType};
