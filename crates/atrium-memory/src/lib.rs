pub mod store;

pub use store::{KnowledgeStore, Passage};
