//! Typed records shared across the structuring and comparison pipelines.

pub mod comparison;
pub mod document;
pub mod progress;
pub mod structured;
pub mod template;

pub use comparison::{
    AdditionalSearch, ApproachDifference, ComparisonDescriptor, ComparisonMode, ComparisonRecord,
    DocumentInfo, FoundPassage, Importance, IterativeSearchMode, MappingMethod, ModifiedItem,
    NumericalChange, NumericalDifference, SectionDetailedComparison, SectionMapping, TextChanges,
    TextDifference, ToneAnalysis,
};
pub use document::{
    DocumentRecord, ExtractionMetadata, ExtractionMethod, ProcessingStatus, StageOutcome,
};
pub use progress::{ProgressRecord, ProgressStatus};
pub use structured::{
    AccountingNote, ExtractedContent, FactValue, FactualItem, FinancialFact, MessageItem, Page,
    ScalarValue, SectionInfo, StructuredData, Table, Tone,
};
pub use template::{DocumentTemplate, TemplateSection};
