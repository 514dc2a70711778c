pub mod history;
pub mod relay;
