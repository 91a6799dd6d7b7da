pub mod launcher;
pub mod port;

pub use launcher::build_command;
pub use port::allocate_cdp_port;
