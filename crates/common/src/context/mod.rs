//! Context Engine Core Components
//!
//! The reasoning layer on top of retrieval:
//! - Query understanding (intent, key terms)
//! - Context structuring (key-term re-ranking, reasoning trace)
//! - Grounded answer generation
//! - The pipeline that sequences them

mod pipeline;
mod structurer;
mod synthesizer;
mod understanding;

pub use pipeline::{QueryAnswer, RagPipeline, Source, NOT_FOUND_ANSWER, NOT_FOUND_REASONING};
pub use structurer::{ChunkRelevance, ContextStructure, ContextStructurer};
pub use synthesizer::{build_prompt, format_context, AnswerGenerator, NO_CONTEXT_ANSWER};
pub use understanding::{QueryUnderstander, QueryUnderstanding};
