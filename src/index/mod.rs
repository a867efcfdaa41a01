mod btree;
mod cursor;
mod node;

pub use btree::BTree;
pub use cursor::Cursor;
