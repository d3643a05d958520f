pub mod manager;
pub mod processor;
pub mod text;
pub mod validator;
