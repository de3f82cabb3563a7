pub mod cookie;
pub mod encoding;
