//! Builtin export routines.
//!
//! A routine receives a message and an extension-less output path and is
//! solely responsible for writing bytes; it picks its own file extension.
//! Single-file routines append into a shared path and use the `is_first`
//! flag to initialize the file. Grouping in the scheduler guarantees one
//! writer per path, so no file locking is needed here.

pub mod image;
pub mod pointcloud;
pub mod record;

use crate::registry::Registry;

pub fn register_builtins(reg: &mut Registry) {
    record::register(reg);
    image::register(reg);
    pointcloud::register(reg);
}
