pub mod prompt;
pub mod resume;
