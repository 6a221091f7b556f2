pub mod count;
pub mod failed;
pub mod list;
pub mod lock;
pub mod process;
