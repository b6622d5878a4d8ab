pub mod collector;
pub mod entities;
pub mod graph;
pub mod interface;
pub mod model;
pub mod session;
pub mod validator;

pub use collector::CollectionStage;
pub use graph::{next_step, Collaborators, Step, WorkflowGraph};
pub use interface::{InterfaceStage, Route};
pub use model::LlmAnswerModel;
pub use session::SessionManager;
pub use validator::{parse_grade, ValidationStage};
