pub mod connection;
pub mod directory;
pub mod dispatcher;
