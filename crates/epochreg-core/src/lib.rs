pub mod artifact;
pub mod catalog;
pub mod collab;
pub mod consts;
pub mod error;
pub mod exposure;
pub mod io;
pub mod pipeline;
pub mod reference;
