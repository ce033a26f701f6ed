//! fnbuild CLI - build and push function images without a container daemon.

pub mod commands;
