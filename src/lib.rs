//! Utilities to introspect a host application's binary-compiled Python extension
//! modules and its procedure registry, and generate the predefined completion
//! files ([pypredef stubs](https://www.pydev.org/manual_101_interpreter.html))
//! that give IDEs code completion for modules they cannot parse directly.

pub use crate::introspection::{introspect_library, remove_class_docstrings};
pub use crate::registry::{introspect_registry, read_registry_dump, TypeTable};
pub use crate::stubs::module_stub_files;
pub use crate::writer::write_stub_files;

pub mod cli;
mod introspection;
pub mod model;
pub mod registry;
mod stubs;
mod writer;
