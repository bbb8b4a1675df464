pub mod core;
pub mod kb;
pub mod llm;
pub mod rag;
pub mod server;
pub mod state;
