pub mod buf;
pub mod io_bytes;
pub mod signing;

pub use buf::DiskBuffer;
