pub mod assistant;
pub mod chord;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod score;
pub mod timing;

pub use assistant::{Assistant, AssistantOptions, InputKind, PerformanceEvent, PerformanceState};
pub use engine::{EngineCommand, EngineHandle, EngineUpdate, spawn_engine};
pub use error::{AssistantError, DefinitionError, DeviceError, Error, SequencingError};
pub use events::Message;
pub use score::{PerformanceConfig, PerformanceMode, ScoreDef, VoiceDef, VoiceObject};
