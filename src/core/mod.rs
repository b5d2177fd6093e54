pub mod llm;
pub mod title;

pub use llm::{ModelRequest, ModelRuntime, OllamaClient};
pub use title::TitleGenerator;
