/*!
 * Run orchestration: phases, progress and the terminal result.
 */

pub mod orchestrator;
pub mod progress;
pub mod result;

pub use self::orchestrator::{TranslationPipeline, TranslationPipelineBuilder};
pub use self::progress::{PipelinePhase, ProgressEvent, ProgressSink};
pub use self::result::{PipelineResult, PreflightCheck, RunReport};
