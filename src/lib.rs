pub mod component;
pub mod debug_tool;
pub mod llm;
pub mod project;
pub mod sys;
