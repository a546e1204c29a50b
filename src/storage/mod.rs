pub mod layout;
pub mod file_lock;
pub mod catalog;
pub mod freespace;
pub mod cursor;
pub mod record_store;
