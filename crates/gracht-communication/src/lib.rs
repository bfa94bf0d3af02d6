mod arena;
mod workqueue;

pub use arena::{Arena, ArenaSlot};
pub use workqueue::WorkQueue;
