mod alloc_index;
mod backend;
mod pager;

pub use alloc_index::*;
pub use backend::*;
pub use pager::*;
