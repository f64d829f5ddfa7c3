pub mod file_io;
pub mod path;
pub mod time;
