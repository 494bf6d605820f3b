pub mod dispatcher;
pub mod selector;
