pub mod import;
pub mod tagging;
